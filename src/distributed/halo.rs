//! Halo exchange (step 5).
//!
//! A row is copied to every other block whose bounding box lies within epsilon
//! of it. Distance to a box never exceeds distance to any point inside it, so
//! after the exchange each block holds every foreign row that can be a neighbor
//! of one of its own rows. The test is inclusive, like the neighbor relation.

use serde::{Deserialize, Serialize};

use super::partition::BoundingBox;
use crate::error::{Error, Result};
use crate::params::DbscanParams;
use crate::points::{cast, PointSet, Real};

/// Current identity of a row: its block and its index inside that block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointId {
    /// Owning block.
    pub block: usize,
    /// Row inside the owning block.
    pub index: usize,
}

/// Rows one block sends to one neighbor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaloData<T> {
    /// Copied rows (with weights).
    pub points: PointSet<T>,
    /// Index of each copied row in the sending block.
    pub indices: Vec<usize>,
}

/// Step 5: compute the halo this block sends to every block.
///
/// `boxes[b]` is the bounding box of block `b` (`None` for empty blocks). The
/// entry for `block_index` itself is always empty.
pub fn step5<T: Real>(
    block_index: usize,
    points: &PointSet<T>,
    boxes: &[Option<BoundingBox<T>>],
    params: &DbscanParams,
) -> Result<Vec<HaloData<T>>> {
    params.validate()?;
    if block_index >= boxes.len() {
        return Err(Error::inconsistent(
            "step5",
            format!("block {block_index} of {} boxes", boxes.len()),
        ));
    }
    for bbox in boxes.iter().flatten() {
        points.require_features(bbox.n_features())?;
    }
    let epsilon: T = cast(params.epsilon, "epsilon")?;
    let eps2 = epsilon * epsilon;

    Ok(boxes
        .iter()
        .enumerate()
        .map(|(dst, bbox)| {
            let indices: Vec<usize> = match bbox {
                Some(bbox) if dst != block_index => points
                    .data()
                    .outer_iter()
                    .enumerate()
                    .filter(|(_, row)| bbox.sq_distance(row.view()) <= eps2)
                    .map(|(i, _)| i)
                    .collect(),
                _ => Vec::new(),
            };
            HaloData {
                points: points.select_rows(&indices),
                indices,
            }
        })
        .collect())
}

/// All halo rows a block received, in sending-block order.
#[derive(Debug, Clone, PartialEq)]
pub struct HaloSet<T> {
    /// Received rows.
    pub points: PointSet<T>,
    /// Owner of each received row.
    pub owners: Vec<PointId>,
}

impl<T: Real> HaloSet<T> {
    /// Halo with no rows.
    pub fn empty(n_features: usize) -> Self {
        Self {
            points: PointSet::empty(n_features),
            owners: Vec::new(),
        }
    }

    /// Join the halos sent by each block, `(sender, data)`.
    pub fn gather(n_features: usize, incoming: Vec<(usize, HaloData<T>)>) -> Result<Self> {
        let mut owners = Vec::new();
        for (src, data) in &incoming {
            if data.indices.len() != data.points.n_rows() {
                return Err(Error::inconsistent(
                    "halo gather",
                    format!(
                        "block {src} sent {} rows with {} indices",
                        data.points.n_rows(),
                        data.indices.len()
                    ),
                ));
            }
            owners.extend(data.indices.iter().map(|&index| PointId { block: *src, index }));
        }
        let tables: Vec<&PointSet<T>> = incoming.iter().map(|(_, d)| &d.points).collect();
        Ok(Self {
            points: PointSet::concat(n_features, &tables)?,
            owners,
        })
    }

    /// Number of halo rows.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// True when no rows were received.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
