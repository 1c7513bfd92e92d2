//! Steps that need a view over all blocks: 3, 7, 9 and 13.
//!
//! None of these keep state between calls, so any block can play the master.

use log::trace;
use serde::{Deserialize, Serialize};

use super::partition::{check_group, BlockSummary, BoundingBox, Split};
use super::query::{check_destination, Query, QueryPayload};
use crate::cluster::util::weighted_quantile;
use crate::error::{Error, Result};
use crate::points::Real;

/// Step 3: choose the split of a group of `left_blocks + right_blocks` blocks.
///
/// The feature is the widest extent of the group's combined bounding box. The
/// threshold is the weighted quantile of the block samples at
/// `left_blocks / (left_blocks + right_blocks)`, each sample standing for
/// `n_rows / sample_len` rows of its block. A group without rows gives a split
/// on feature 0 at zero.
pub fn step3<T: Real>(
    summaries: &[BlockSummary<T>],
    left_blocks: usize,
    right_blocks: usize,
) -> Result<Split<T>> {
    check_group(left_blocks, right_blocks)?;
    if summaries.len() != left_blocks + right_blocks {
        return Err(Error::InvalidParameter {
            name: "summaries",
            message: "need exactly one summary per block of the group",
        });
    }

    let mut boxes = summaries.iter().filter_map(|s| s.bbox.as_ref());
    let Some(first) = boxes.next() else {
        return Ok(Split {
            feature: 0,
            threshold: T::zero(),
        });
    };
    let n_features = first.n_features();
    let mut merged = first.clone();
    for bbox in boxes {
        check_width(n_features, bbox.n_features())?;
        merged.merge(bbox);
    }
    if n_features == 0 {
        return Err(Error::InvalidParameter {
            name: "n_features",
            message: "must be at least 1",
        });
    }

    let feature = widest_feature(&merged);
    let mut values = Vec::new();
    let mut total = 0.0;
    for summary in summaries {
        let len = summary.sample.nrows();
        if len == 0 {
            continue;
        }
        check_width(n_features, summary.sample.ncols())?;
        let weight = summary.n_rows as f64 / len as f64;
        total += summary.n_rows as f64;
        values.extend(summary.sample.column(feature).iter().map(|&x| (x, weight)));
    }

    let target = total * left_blocks as f64 / (left_blocks + right_blocks) as f64;
    let threshold = weighted_quantile(values, target).unwrap_or(merged.upper()[feature]);
    trace!(
        "split {}:{} on feature {} (extent {:?}) at {:?}",
        left_blocks,
        right_blocks,
        feature,
        merged.extent(feature),
        threshold
    );
    Ok(Split { feature, threshold })
}

fn widest_feature<T: Real>(bbox: &BoundingBox<T>) -> usize {
    (1..bbox.n_features()).fold(0, |best, k| {
        if bbox.extent(k) > bbox.extent(best) {
            k
        } else {
            best
        }
    })
}

fn check_width(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(Error::DimensionMismatch { expected, found });
    }
    Ok(())
}

/// Step 7: the loop is over once every block reports finished.
pub fn step7(flags: &[bool]) -> bool {
    flags.iter().all(|&f| f)
}

/// Prefix sums of per-block cluster counts (`n_blocks + 1` entries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterOffsets {
    offsets: Vec<usize>,
}

impl ClusterOffsets {
    /// Number of blocks covered.
    pub fn n_blocks(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total number of global clusters.
    pub fn n_clusters(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// First global id of `block`.
    pub fn offset(&self, block: usize) -> Option<usize> {
        self.range(block).map(|(start, _)| start)
    }

    /// Number of global ids reserved for `block`.
    pub fn count(&self, block: usize) -> Option<usize> {
        self.range(block).map(|(_, count)| count)
    }

    /// `(first id, count)` of `block`.
    pub fn range(&self, block: usize) -> Option<(usize, usize)> {
        let start = *self.offsets.get(block)?;
        let end = *self.offsets.get(block + 1)?;
        Some((start, end - start))
    }

    /// The raw prefix sums.
    pub fn as_slice(&self) -> &[usize] {
        &self.offsets
    }
}

/// Step 9: renumber the rooted clusters of every block.
pub fn step9(counts: &[usize]) -> ClusterOffsets {
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    offsets.push(0);
    let mut total = 0;
    for &c in counts {
        total += c;
        offsets.push(total);
    }
    ClusterOffsets { offsets }
}

/// Final labels of one original block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAssignments {
    /// Global cluster id or [`NOISE`](crate::NOISE), in original row order.
    pub assignments: Vec<i32>,
    /// Core flag, in original row order.
    pub is_core: Vec<bool>,
}

impl BlockAssignments {
    /// Ascending indices of the core rows.
    pub fn core_indices(&self) -> Vec<usize> {
        self.is_core
            .iter()
            .enumerate()
            .filter(|&(_, &core)| core)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Step 13: assemble the labels of original block `block_index` from the
/// assignment queries addressed to it. Every row must be covered exactly once.
pub fn step13(block_index: usize, n_rows: usize, queries: &[Query]) -> Result<BlockAssignments> {
    let mut slots: Vec<Option<(i32, bool)>> = vec![None; n_rows];
    for query in queries {
        check_destination("step13", block_index, query)?;
        let QueryPayload::Assignment { cluster_id, is_core } = query.payload else {
            return Err(Error::inconsistent(
                "step13",
                format!("unexpected {:?}", query.payload),
            ));
        };
        let slot = slots.get_mut(query.dst_local_id).ok_or_else(|| {
            Error::inconsistent(
                "step13",
                format!("row {} of {}", query.dst_local_id, n_rows),
            )
        })?;
        if slot.replace((cluster_id, is_core)).is_some() {
            return Err(Error::inconsistent(
                "step13",
                format!("row {} assigned twice", query.dst_local_id),
            ));
        }
    }

    let mut assignments = Vec::with_capacity(n_rows);
    let mut is_core = Vec::with_capacity(n_rows);
    for (row, slot) in slots.into_iter().enumerate() {
        let (id, core) = slot.ok_or_else(|| {
            Error::inconsistent("step13", format!("row {row} of block {block_index} has no label"))
        })?;
        assignments.push(id);
        is_core.push(core);
    }
    Ok(BlockAssignments {
        assignments,
        is_core,
    })
}
