//! Cross-block messages.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Block-qualified name of a locally discovered cluster.
///
/// Names order by block, then by local cluster index. When clusters from several
/// blocks turn out to be one, the smallest name is the canonical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterName {
    /// Block that discovered the cluster.
    pub block: usize,
    /// Cluster index inside that block.
    pub cluster: usize,
}

impl ClusterName {
    /// Name of local cluster `cluster` in `block`.
    pub fn new(block: usize, cluster: usize) -> Self {
        Self { block, cluster }
    }
}

/// What a [`Query`] asks of its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueryPayload {
    /// A core point of the sender, currently known under this cluster name, lies
    /// within epsilon of the destination point.
    Link(ClusterName),
    /// Ask the destination for the global id of its cluster `dst_local_id`.
    IdRequest,
    /// Global id of the sender's cluster `src_local_id`.
    IdResponse(i32),
    /// Final label of the destination row in its original block.
    Assignment {
        /// Global cluster id or [`NOISE`](crate::NOISE).
        cluster_id: i32,
        /// The row is a core observation.
        is_core: bool,
    },
}

/// Message from one block to another.
///
/// Field order is significant: queries sort by destination first, so a sorted
/// inbox is grouped by target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Query {
    /// Receiving block.
    pub dst_block: usize,
    /// Row (or cluster, for id resolution) addressed in the receiving block.
    pub dst_local_id: usize,
    /// Sending block.
    pub src_block: usize,
    /// Row (or cluster) of the sender the query is about.
    pub src_local_id: usize,
    /// Instruction.
    pub payload: QueryPayload,
}

/// Sort and drop duplicates. The same merge is usually found from both sides
/// of a halo.
pub fn normalize(mut queries: Vec<Query>) -> Vec<Query> {
    queries.sort_unstable();
    queries.dedup();
    queries
}

/// Deliver queries into one normalized inbox per block.
pub fn route<I>(queries: I, n_blocks: usize) -> Result<Vec<Vec<Query>>>
where
    I: IntoIterator<Item = Query>,
{
    let mut inboxes: Vec<Vec<Query>> = vec![Vec::new(); n_blocks];
    for query in queries {
        let inbox = inboxes.get_mut(query.dst_block).ok_or_else(|| {
            Error::inconsistent(
                "query routing",
                format!(
                    "query for block {} but only {} blocks exist",
                    query.dst_block, n_blocks
                ),
            )
        })?;
        inbox.push(query);
    }
    Ok(inboxes.into_iter().map(normalize).collect())
}

pub(crate) fn check_destination(step: &'static str, block: usize, query: &Query) -> Result<()> {
    if query.dst_block != block {
        return Err(Error::inconsistent(
            step,
            format!("block {block} received a query for block {}", query.dst_block),
        ));
    }
    Ok(())
}
