//! Geometric partitioning (steps 1, 2 and 4; the step 3 split lives in
//! [`master`](super::master)).
//!
//! A group of blocks is bisected along the widest feature of its combined
//! bounding box. Every block then deals its left rows over the group's left
//! blocks and its right rows over the right blocks. Repeating this on each half
//! until groups hold one block leaves every block with a compact region of
//! space, which keeps halos small.

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::cluster::util::strided_indices;
use crate::error::{Error, Result};
use crate::points::{PointSet, Real};

/// Rows sampled per block for choosing a split threshold.
pub const SPLIT_SAMPLE_SIZE: usize = 256;

/// Original position of a row, kept through every repartition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartialOrder {
    /// Block that held the row when the run started.
    pub block: usize,
    /// Row index in that block.
    pub index: usize,
}

/// Step 1: tag every row of a block with its pre-partition identity.
pub fn step1(block_index: usize, n_rows: usize) -> Vec<PartialOrder> {
    (0..n_rows)
        .map(|index| PartialOrder {
            block: block_index,
            index,
        })
        .collect()
}

/// Per-feature `[lower, upper]` range of a non-empty point set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox<T> {
    lower: Vec<T>,
    upper: Vec<T>,
}

impl<T: Real> BoundingBox<T> {
    /// Box around all rows, `None` for an empty set.
    pub fn of(points: &PointSet<T>) -> Option<Self> {
        let data = points.data();
        let mut rows = data.outer_iter();
        let first = rows.next()?;
        let mut bbox = Self {
            lower: first.to_vec(),
            upper: first.to_vec(),
        };
        for row in rows {
            for (k, &x) in row.iter().enumerate() {
                bbox.lower[k] = bbox.lower[k].min(x);
                bbox.upper[k] = bbox.upper[k].max(x);
            }
        }
        Some(bbox)
    }

    /// Grow to cover `other` as well.
    pub fn merge(&mut self, other: &Self) {
        for k in 0..self.lower.len() {
            self.lower[k] = self.lower[k].min(other.lower[k]);
            self.upper[k] = self.upper[k].max(other.upper[k]);
        }
    }

    /// Feature dimensionality.
    pub fn n_features(&self) -> usize {
        self.lower.len()
    }

    /// Lower corner.
    pub fn lower(&self) -> &[T] {
        &self.lower
    }

    /// Upper corner.
    pub fn upper(&self) -> &[T] {
        &self.upper
    }

    /// `upper - lower` along `feature`.
    pub fn extent(&self, feature: usize) -> T {
        self.upper[feature] - self.lower[feature]
    }

    /// Squared distance from `row` to the nearest point of the box.
    pub fn sq_distance(&self, row: ArrayView1<'_, T>) -> T {
        row.iter()
            .zip(self.lower.iter().zip(&self.upper))
            .fold(T::zero(), |acc, (&x, (&lo, &hi))| {
                let d = if x < lo {
                    lo - x
                } else if x > hi {
                    x - hi
                } else {
                    T::zero()
                };
                acc + d * d
            })
    }
}

/// Step 2 output: what the master needs to split a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary<T> {
    /// Bounding box of the block, `None` when it is empty.
    pub bbox: Option<BoundingBox<T>>,
    /// Number of rows in the block.
    pub n_rows: usize,
    /// Evenly strided rows, at most [`SPLIT_SAMPLE_SIZE`].
    pub sample: Array2<T>,
}

/// Step 2: summarize a block's current rows.
pub fn step2<T: Real>(points: &PointSet<T>) -> BlockSummary<T> {
    let picks = strided_indices(points.n_rows(), SPLIT_SAMPLE_SIZE);
    BlockSummary {
        bbox: BoundingBox::of(points),
        n_rows: points.n_rows(),
        sample: points.data().select(Axis(0), &picks),
    }
}

/// Feature and threshold bisecting a group of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Split<T> {
    /// Feature compared against the threshold.
    pub feature: usize,
    /// Rows with `row[feature] < threshold` go left.
    pub threshold: T,
}

impl<T: Real> Split<T> {
    /// Side of the split `row` falls on.
    #[inline]
    pub fn goes_left(&self, row: ArrayView1<'_, T>) -> bool {
        row[self.feature] < self.threshold
    }
}

/// A block's rows together with their original identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockData<T> {
    /// Current rows.
    pub points: PointSet<T>,
    /// Original identity of each row.
    pub order: Vec<PartialOrder>,
}

impl<T: Real> BlockData<T> {
    /// Pair rows with their tags.
    pub fn new(points: PointSet<T>, order: Vec<PartialOrder>) -> Result<Self> {
        if points.n_rows() != order.len() {
            return Err(Error::inconsistent(
                "block data",
                format!("{} rows but {} order tags", points.n_rows(), order.len()),
            ));
        }
        Ok(Self { points, order })
    }

    /// Stack buckets received from several blocks, in the given order.
    pub fn concat(n_features: usize, parts: Vec<BlockData<T>>) -> Result<Self> {
        let tables: Vec<&PointSet<T>> = parts.iter().map(|p| &p.points).collect();
        let points = PointSet::concat(n_features, &tables)?;
        let order = parts.iter().flat_map(|p| p.order.iter().copied()).collect();
        Self::new(points, order)
    }
}

pub(crate) fn check_group(left_blocks: usize, right_blocks: usize) -> Result<()> {
    if left_blocks == 0 {
        return Err(Error::InvalidParameter {
            name: "left_blocks",
            message: "must be at least 1",
        });
    }
    if right_blocks == 0 {
        return Err(Error::InvalidParameter {
            name: "right_blocks",
            message: "must be at least 1",
        });
    }
    Ok(())
}

/// Step 4: scatter a block into `left_blocks + right_blocks` buckets.
///
/// `block_index` is the block's position inside its group; it staggers the
/// round-robin start so the first rows of every block do not all land in the
/// same bucket.
pub fn step4<T: Real>(
    block: &BlockData<T>,
    split: &Split<T>,
    block_index: usize,
    left_blocks: usize,
    right_blocks: usize,
) -> Result<Vec<BlockData<T>>> {
    check_group(left_blocks, right_blocks)?;
    let n_features = block.points.n_features();
    if block.points.n_rows() > 0 && split.feature >= n_features {
        return Err(Error::inconsistent(
            "step4",
            format!("split feature {} of {n_features}", split.feature),
        ));
    }

    let sides: Vec<bool> = block
        .points
        .data()
        .outer_iter()
        .map(|row| split.goes_left(row))
        .collect();
    let n_left = sides.iter().filter(|&&l| l).count();
    let n_right = sides.len() - n_left;

    let n_buckets = left_blocks + right_blocks;
    let mut rows: Vec<Vec<usize>> = (0..n_buckets)
        .map(|b| {
            let total = if b < left_blocks { n_left } else { n_right };
            let width = if b < left_blocks { left_blocks } else { right_blocks };
            Vec::with_capacity(total.div_ceil(width))
        })
        .collect();

    let mut next_left = block_index % left_blocks;
    let mut next_right = block_index % right_blocks;
    for (i, &left) in sides.iter().enumerate() {
        if left {
            rows[next_left].push(i);
            next_left = (next_left + 1) % left_blocks;
        } else {
            rows[left_blocks + next_right].push(i);
            next_right = (next_right + 1) % right_blocks;
        }
    }

    rows.iter()
        .map(|picks| {
            BlockData::new(
                block.points.select_rows(picks),
                picks.iter().map(|&i| block.order[i]).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn step1_tags_rows_in_order() {
        let tags = step1(3, 2);
        assert_eq!(
            tags,
            vec![
                PartialOrder { block: 3, index: 0 },
                PartialOrder { block: 3, index: 1 }
            ]
        );
    }

    #[test]
    fn bounding_box_and_distance() {
        let p = PointSet::new(array![[0.0, 5.0], [2.0, -1.0], [1.0, 1.0]]);
        let bbox = BoundingBox::of(&p).unwrap();
        assert_eq!(bbox.lower(), &[0.0, -1.0]);
        assert_eq!(bbox.upper(), &[2.0, 5.0]);
        assert_eq!(bbox.extent(1), 6.0);
        assert_eq!(bbox.sq_distance(array![1.0, 0.0].view()), 0.0);
        assert_eq!(bbox.sq_distance(array![5.0, 9.0].view()), 9.0 + 16.0);
        assert!(BoundingBox::of(&PointSet::<f64>::empty(2)).is_none());
    }

    #[test]
    fn step2_samples_are_bounded() {
        let p = PointSet::new(Array2::from_shape_fn((1000, 2), |(i, j)| (i * (j + 1)) as f64));
        let summary = step2(&p);
        assert_eq!(summary.n_rows, 1000);
        assert_eq!(summary.sample.nrows(), SPLIT_SAMPLE_SIZE);
        assert_eq!(summary.bbox.unwrap().upper(), &[999.0, 1998.0]);
    }

    #[test]
    fn step4_deals_rows_round_robin() {
        let points = PointSet::new(array![[0.0], [9.0], [1.0], [8.0], [2.0], [7.0]]);
        let block = BlockData::new(points, step1(0, 6)).unwrap();
        let split = Split {
            feature: 0,
            threshold: 5.0,
        };
        let buckets = step4(&block, &split, 0, 2, 1).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].points.data(), array![[0.0], [2.0]]);
        assert_eq!(buckets[1].points.data(), array![[1.0]]);
        assert_eq!(buckets[2].points.data(), array![[9.0], [8.0], [7.0]]);
        assert_eq!(
            buckets[2].order.iter().map(|o| o.index).collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
    }

    #[test]
    fn step4_rejects_empty_sides() {
        let block = BlockData::new(PointSet::<f64>::empty(1), vec![]).unwrap();
        let split = Split {
            feature: 0,
            threshold: 0.0,
        };
        assert!(step4(&block, &split, 0, 0, 2).is_err());
        assert!(step4(&block, &split, 0, 1, 1).unwrap().iter().all(|b| b.order.is_empty()));
    }
}
