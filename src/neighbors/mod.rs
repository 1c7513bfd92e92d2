//! Epsilon-neighborhood search.
//!
//! The kernels only talk to a [`NeighborhoodEngine`]; [`TiledEngine`] is the
//! portable implementation. Both sides of a search are wrapped in a
//! [`SearchSet`], which caches the squared row norms the GEMM-style distance
//! decomposition needs:
//!
//! ```text
//! ‖a − b‖² = ‖a‖² + ‖b‖² − 2·a·b
//! ```
//!
//! A pair is a neighbor when `‖a − b‖² ≤ ε²`. The comparison is inclusive and
//! never takes a square root.

mod tiled;

use ndarray::{Array1, ArrayView1, ArrayView2};

use crate::containers::Neighborhood;
use crate::error::{Error, Result};
use crate::points::{PointSet, Real};

pub use tiled::TiledEngine;

/// Point rows prepared for neighborhood search.
#[derive(Debug, Clone)]
pub struct SearchSet<'a, T> {
    points: ArrayView2<'a, T>,
    weights: Option<ArrayView1<'a, T>>,
    sq_norms: Array1<T>,
}

impl<'a, T: Real> SearchSet<'a, T> {
    /// Prepare a point set.
    pub fn new(points: &'a PointSet<T>) -> Self {
        Self::from_parts(points.data(), points.weights())
    }

    fn from_parts(points: ArrayView2<'a, T>, weights: Option<ArrayView1<'a, T>>) -> Self {
        let sq_norms = points.outer_iter().map(|row| row.dot(&row)).collect();
        Self {
            points,
            weights,
            sq_norms,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feature dimensionality.
    pub fn n_features(&self) -> usize {
        self.points.ncols()
    }

    /// Weight of row `i` (1 when unweighted).
    #[inline]
    pub fn weight(&self, i: usize) -> T {
        self.weights.as_ref().map_or(T::one(), |w| w[i])
    }

    pub(crate) fn points(&self) -> ArrayView2<'a, T> {
        self.points
    }

    pub(crate) fn sq_norms(&self) -> ArrayView1<'_, T> {
        self.sq_norms.view()
    }
}

/// Strategy for finding all points of `b` within epsilon of points of `a`.
pub trait NeighborhoodEngine: Send + Sync {
    /// Full neighborhoods of every row of `a` against all of `b`, in row order.
    fn compute_full<T: Real>(
        &self,
        a: &SearchSet<'_, T>,
        b: &SearchSet<'_, T>,
        epsilon: T,
    ) -> Result<Vec<Neighborhood<T>>>;

    /// Neighborhood weight of every row of `a`, without keeping index lists.
    fn weight_sums<T: Real>(
        &self,
        a: &SearchSet<'_, T>,
        b: &SearchSet<'_, T>,
        epsilon: T,
    ) -> Result<Vec<T>>;

    /// Neighborhoods of the rows `indices` of `a`, appended to `out[k]` for
    /// `indices[k]`. Neighbor indices come out in ascending order.
    fn query<T: Real>(
        &self,
        a: &SearchSet<'_, T>,
        indices: &[usize],
        b: &SearchSet<'_, T>,
        epsilon: T,
        out: &mut [Neighborhood<T>],
    ) -> Result<()>;
}

pub(crate) fn check_pair<T: Real>(a: &SearchSet<'_, T>, b: &SearchSet<'_, T>) -> Result<()> {
    if a.n_features() != b.n_features() {
        return Err(Error::DimensionMismatch {
            expected: a.n_features(),
            found: b.n_features(),
        });
    }
    Ok(())
}
