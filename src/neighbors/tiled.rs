//! Tiled GEMM neighborhood engine.
//!
//! Query rows are cut into row tiles that run in parallel; each row tile walks
//! the reference set in column tiles and computes one `ndarray` matrix product
//! per tile pair. Per-row outputs are disjoint, so the full scan needs no
//! synchronization. The random-access [`query`](NeighborhoodEngine::query) path
//! instead parallelizes over reference tiles and reduces thread-local
//! neighborhoods once at the end.
//!
//! The product form loses precision when `‖a‖²` and `‖b‖²` dwarf the distance,
//! so it is only trusted away from the radius. Pairs within a rounding bound of
//! `ε²` are recomputed directly, which keeps the neighbor relation exact and
//! symmetric no matter how rows are grouped into tiles or blocks.

use std::ops::Range;

use log::trace;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Slice};
use rayon::prelude::*;

use super::{check_pair, NeighborhoodEngine, SearchSet};
use crate::cluster::util::squared_euclidean;
use crate::containers::Neighborhood;
use crate::error::{Error, Result};
use crate::points::{cast, Real};

const DEFAULT_BLOCK: usize = 128;

/// Portable engine: dense distance tiles via matrix products, parallel over tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiledEngine {
    row_block: usize,
    col_block: usize,
}

impl Default for TiledEngine {
    fn default() -> Self {
        Self {
            row_block: DEFAULT_BLOCK,
            col_block: DEFAULT_BLOCK,
        }
    }
}

impl TiledEngine {
    /// Engine with the default 128 × 128 tiles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tile shape. Zero is bumped to one.
    pub fn with_block_sizes(mut self, row_block: usize, col_block: usize) -> Self {
        self.row_block = row_block.max(1);
        self.col_block = col_block.max(1);
        self
    }

    fn scan_rows<T, R, I, V>(
        &self,
        a: &SearchSet<'_, T>,
        b: &SearchSet<'_, T>,
        radius: &Radius<T>,
        init: I,
        visit: V,
    ) -> Result<Vec<R>>
    where
        T: Real,
        R: Send,
        I: Fn() -> R + Sync,
        V: Fn(&mut R, usize, T) -> Result<()> + Sync,
    {
        let n = a.len();
        let n_tiles = n.div_ceil(self.row_block);
        trace!(
            "scanning {} x {} rows in {} row tiles",
            n,
            b.len(),
            n_tiles
        );

        let tiles = (0..n_tiles)
            .into_par_iter()
            .map(|t| -> Result<Vec<R>> {
                let rows = t * self.row_block..((t + 1) * self.row_block).min(n);
                let a_tile = a.points().slice_axis_move(Axis(0), Slice::from(rows.clone()));
                let a_norms = a.sq_norms().slice_axis_move(Axis(0), Slice::from(rows.clone()));
                let mut acc: Vec<R> = rows.map(|_| init()).collect();

                for cols in col_tiles(b.len(), self.col_block) {
                    let d2 = tile_distances(a_tile, a_norms, b, cols.clone());
                    for (i, row) in d2.outer_iter().enumerate() {
                        for (offset, &approx) in row.iter().enumerate() {
                            let j = cols.start + offset;
                            if radius.within(approx, a_tile.row(i), a_norms[i], b, j) {
                                visit(&mut acc[i], j, b.weight(j))?;
                            }
                        }
                    }
                }
                Ok(acc)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(tiles.into_iter().flatten().collect())
    }
}

impl NeighborhoodEngine for TiledEngine {
    fn compute_full<T: Real>(
        &self,
        a: &SearchSet<'_, T>,
        b: &SearchSet<'_, T>,
        epsilon: T,
    ) -> Result<Vec<Neighborhood<T>>> {
        check_pair(a, b)?;
        let radius = Radius::new(epsilon, a.n_features())?;
        self.scan_rows(a, b, &radius, Neighborhood::new, |nb, j, w| nb.add(j, w))
    }

    fn weight_sums<T: Real>(
        &self,
        a: &SearchSet<'_, T>,
        b: &SearchSet<'_, T>,
        epsilon: T,
    ) -> Result<Vec<T>> {
        check_pair(a, b)?;
        let radius = Radius::new(epsilon, a.n_features())?;
        self.scan_rows(a, b, &radius, T::zero, |sum, _, w| {
            *sum = *sum + w;
            Ok(())
        })
    }

    fn query<T: Real>(
        &self,
        a: &SearchSet<'_, T>,
        indices: &[usize],
        b: &SearchSet<'_, T>,
        epsilon: T,
        out: &mut [Neighborhood<T>],
    ) -> Result<()> {
        check_pair(a, b)?;
        if out.len() != indices.len() {
            return Err(Error::inconsistent(
                "neighborhood query",
                format!("{} outputs for {} query rows", out.len(), indices.len()),
            ));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= a.len()) {
            return Err(Error::inconsistent(
                "neighborhood query",
                format!("row {bad} out of range for {} rows", a.len()),
            ));
        }
        if indices.is_empty() {
            return Ok(());
        }

        let radius = Radius::new(epsilon, a.n_features())?;
        let selected = a.points().select(Axis(0), indices);
        let norms: Array1<T> = indices.iter().map(|&i| a.sq_norms()[i]).collect();
        let k = indices.len();
        let tiles: Vec<Range<usize>> = col_tiles(b.len(), self.col_block).collect();

        let merged = tiles
            .into_par_iter()
            .try_fold(
                || vec![Neighborhood::new(); k],
                |mut acc, cols| -> Result<Vec<Neighborhood<T>>> {
                    let d2 = tile_distances(selected.view(), norms.view(), b, cols.clone());
                    for (i, row) in d2.outer_iter().enumerate() {
                        for (offset, &approx) in row.iter().enumerate() {
                            let j = cols.start + offset;
                            if radius.within(approx, selected.row(i), norms[i], b, j) {
                                acc[i].add(j, b.weight(j))?;
                            }
                        }
                    }
                    Ok(acc)
                },
            )
            .try_reduce(
                || vec![Neighborhood::new(); k],
                |mut left, right| -> Result<Vec<Neighborhood<T>>> {
                    for (l, r) in left.iter_mut().zip(&right) {
                        l.append(r)?;
                    }
                    Ok(left)
                },
            )?;

        for (slot, mut nb) in out.iter_mut().zip(merged) {
            nb.sort_indices();
            slot.append(&nb)?;
        }
        Ok(())
    }
}

fn col_tiles(n: usize, block: usize) -> impl Iterator<Item = Range<usize>> {
    (0..n.div_ceil(block)).map(move |t| t * block..((t + 1) * block).min(n))
}

/// Approximate squared distances between `a` rows and the `cols` rows of `b`.
fn tile_distances<T: Real>(
    a: ArrayView2<'_, T>,
    a_norms: ArrayView1<'_, T>,
    b: &SearchSet<'_, T>,
    cols: Range<usize>,
) -> Array2<T> {
    let b_tile = b.points().slice_axis_move(Axis(0), Slice::from(cols.clone()));
    let b_norms = b.sq_norms();
    let two = T::one() + T::one();
    let mut d2 = a.dot(&b_tile.t());
    for ((i, j), v) in d2.indexed_iter_mut() {
        *v = a_norms[i] + b_norms[cols.start + j] - two * *v;
    }
    d2
}

struct Radius<T> {
    eps2: T,
    slack: T,
}

impl<T: Real> Radius<T> {
    fn new(epsilon: T, n_features: usize) -> Result<Self> {
        let rounding: T = cast(2 * n_features + 8, "n_features")?;
        Ok(Self {
            eps2: epsilon * epsilon,
            slack: T::epsilon() * rounding,
        })
    }

    /// Exact `‖a − b_j‖² ≤ ε²` decision, given the product-form estimate.
    #[inline]
    fn within(
        &self,
        approx: T,
        a_row: ArrayView1<'_, T>,
        a_norm: T,
        b: &SearchSet<'_, T>,
        j: usize,
    ) -> bool {
        let tol = (a_norm + b.sq_norms()[j]) * self.slack;
        if approx > self.eps2 + tol {
            false
        } else if approx < self.eps2 - tol {
            true
        } else {
            squared_euclidean(a_row, b.points().row(j)) <= self.eps2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::PointSet;
    use rand::prelude::*;

    fn brute_force(p: &PointSet<f64>, eps: f64) -> Vec<Vec<usize>> {
        (0..p.n_rows())
            .map(|i| {
                (0..p.n_rows())
                    .filter(|&j| squared_euclidean(p.row(i), p.row(j)) <= eps * eps)
                    .collect()
            })
            .collect()
    }

    fn random_points(n: usize, d: usize, seed: u64) -> PointSet<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|_| (0..d).map(|_| rng.random_range(-3.0..3.0)).collect())
            .collect();
        PointSet::from_rows(&rows).unwrap()
    }

    #[test]
    fn full_scan_matches_brute_force_across_tile_shapes() {
        let p = random_points(97, 3, 7);
        let s = SearchSet::new(&p);
        let expected = brute_force(&p, 1.1);
        for (rb, cb) in [(1, 1), (5, 7), (128, 128), (200, 3)] {
            let engine = TiledEngine::new().with_block_sizes(rb, cb);
            let got = engine.compute_full(&s, &s, 1.1).unwrap();
            assert_eq!(got.len(), p.n_rows());
            for (i, nb) in got.iter().enumerate() {
                assert_eq!(nb.indices(), expected[i].as_slice(), "row {i} tiles {rb}x{cb}");
                assert_eq!(nb.weight(), expected[i].len() as f64);
            }
        }
    }

    #[test]
    fn ties_at_epsilon_are_inclusive() {
        let p = PointSet::new(ndarray::array![[0.0], [1.5], [3.0001]]);
        let s = SearchSet::new(&p);
        let got = TiledEngine::new().compute_full(&s, &s, 1.5).unwrap();
        assert_eq!(got[0].indices(), &[0, 1]);
        assert_eq!(got[1].indices(), &[0, 1]);
        assert_eq!(got[2].indices(), &[2]);
    }

    #[test]
    fn exact_ties_survive_large_offsets() {
        // Norms around 1e12 make the product form useless at this radius.
        let p = PointSet::new(ndarray::array![[1.0e6, 1.0e6], [1.0e6 + 0.25, 1.0e6]]);
        let s = SearchSet::new(&p);
        let got = TiledEngine::new().compute_full(&s, &s, 0.25).unwrap();
        assert_eq!(got[0].indices(), &[0, 1]);
        let got = TiledEngine::new().compute_full(&s, &s, 0.2499).unwrap();
        assert_eq!(got[0].indices(), &[0]);
    }

    #[test]
    fn query_agrees_with_full_scan() {
        let p = random_points(150, 2, 11);
        let s = SearchSet::new(&p);
        let engine = TiledEngine::new().with_block_sizes(16, 16);
        let full = engine.compute_full(&s, &s, 0.8).unwrap();

        let picks = [3usize, 149, 0, 77];
        let mut out = vec![Neighborhood::new(); picks.len()];
        engine.query(&s, &picks, &s, 0.8, &mut out).unwrap();
        for (k, &i) in picks.iter().enumerate() {
            assert_eq!(out[k].indices(), full[i].indices());
            assert_eq!(out[k].weight(), full[i].weight());
        }
    }

    #[test]
    fn weights_are_summed() {
        let p = PointSet::with_weights(
            ndarray::array![[0.0], [0.5], [5.0]],
            ndarray::array![2.0, 0.25, 1.0],
        )
        .unwrap();
        let s = SearchSet::new(&p);
        let sums = TiledEngine::new().weight_sums(&s, &s, 1.0).unwrap();
        assert_eq!(sums, vec![2.25, 2.25, 1.0]);
    }

    #[test]
    fn mismatched_dimensions_fail() {
        let a = PointSet::new(ndarray::array![[0.0, 1.0]]);
        let b = PointSet::new(ndarray::array![[0.0]]);
        let err = TiledEngine::new()
            .compute_full(&SearchSet::new(&a), &SearchSet::new(&b), 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn query_rejects_out_of_range_rows() {
        let p = random_points(4, 2, 1);
        let s = SearchSet::new(&p);
        let mut out = vec![Neighborhood::new(); 1];
        assert!(TiledEngine::new().query(&s, &[4], &s, 1.0, &mut out).is_err());
    }

    #[test]
    fn empty_sets_are_fine() {
        let e = PointSet::<f32>::empty(3);
        let s = SearchSet::new(&e);
        assert!(TiledEngine::new().compute_full(&s, &s, 1.0).unwrap().is_empty());
    }
}
