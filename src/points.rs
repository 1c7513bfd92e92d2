//! Observation tables.
//!
//! A [`PointSet`] is a dense `rows × features` matrix plus an optional weight per
//! row. It is the only table shape the kernels need: row counts, column counts,
//! row-block views and allocation with a known shape all come from `ndarray`.

use std::fmt::Debug;

use ndarray::{
    Array1, Array2, ArrayView1, ArrayView2, Axis, LinalgScalar, ScalarOperand, Slice,
};
use num_traits::{Float, NumCast};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Floating-point element type accepted by the engine (`f32` or `f64`).
pub trait Real:
    Float + LinalgScalar + ScalarOperand + Send + Sync + Debug + Default + 'static
{
}

impl<T> Real for T where
    T: Float + LinalgScalar + ScalarOperand + Send + Sync + Debug + Default + 'static
{
}

/// Convert a count or parameter into the element type.
pub(crate) fn cast<T: Real, V: num_traits::ToPrimitive>(value: V, name: &'static str) -> Result<T> {
    <T as NumCast>::from(value).ok_or(Error::InvalidParameter {
        name,
        message: "not representable in the element type",
    })
}

/// Observations of a fixed dimensionality with optional non-negative weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSet<T> {
    data: Array2<T>,
    weights: Option<Array1<T>>,
}

impl<T: Real> PointSet<T> {
    /// Wrap an unweighted `rows × features` matrix.
    pub fn new(data: Array2<T>) -> Self {
        Self {
            data,
            weights: None,
        }
    }

    /// Wrap a matrix with one weight per row.
    pub fn with_weights(data: Array2<T>, weights: Array1<T>) -> Result<Self> {
        if weights.len() != data.nrows() {
            return Err(Error::DimensionMismatch {
                expected: data.nrows(),
                found: weights.len(),
            });
        }
        if let Some(index) = weights.iter().position(|w| !w.is_finite() || *w < T::zero()) {
            return Err(Error::InvalidWeight { index });
        }
        Ok(Self {
            data,
            weights: Some(weights),
        })
    }

    /// Build from row vectors. All rows must share one length.
    pub fn from_rows(rows: &[Vec<T>]) -> Result<Self> {
        let d = rows.first().map_or(0, Vec::len);
        Self::from_rows_with_dim(rows, d)
    }

    /// Build from row vectors with an explicit dimensionality, so an empty block
    /// still knows its feature count.
    pub fn from_rows_with_dim(rows: &[Vec<T>], n_features: usize) -> Result<Self> {
        let mut flat = Vec::new();
        flat.try_reserve_exact(rows.len() * n_features)
            .map_err(Error::allocation("point table", rows.len() * n_features))?;
        for row in rows {
            if row.len() != n_features {
                return Err(Error::DimensionMismatch {
                    expected: n_features,
                    found: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        Ok(Self::new(Array2::from_shape_vec((rows.len(), n_features), flat)?))
    }

    /// An empty table with `n_features` columns.
    pub fn empty(n_features: usize) -> Self {
        Self::new(Array2::zeros((0, n_features)))
    }

    pub(crate) fn from_parts(data: Array2<T>, weights: Option<Array1<T>>) -> Self {
        Self { data, weights }
    }

    /// Number of observations.
    pub fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of features.
    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    /// True when there are no observations.
    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    /// The feature matrix.
    pub fn data(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    /// Per-row weights, if any were supplied.
    pub fn weights(&self) -> Option<ArrayView1<'_, T>> {
        self.weights.as_ref().map(Array1::view)
    }

    /// Weight of one row (1 when unweighted).
    pub fn weight(&self, row: usize) -> T {
        self.weights.as_ref().map_or(T::one(), |w| w[row])
    }

    /// Feature values of one row.
    pub fn row(&self, row: usize) -> ArrayView1<'_, T> {
        self.data.row(row)
    }

    /// Copy of the rows `[start, end)`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        Self {
            data: self.data.slice_axis(Axis(0), Slice::from(start..end)).to_owned(),
            weights: self
                .weights
                .as_ref()
                .map(|w| w.slice_axis(Axis(0), Slice::from(start..end)).to_owned()),
        }
    }

    /// Copy of the selected rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            data: self.data.select(Axis(0), rows),
            weights: self.weights.as_ref().map(|w| w.select(Axis(0), rows)),
        }
    }

    /// Stack several tables with equal dimensionality on top of each other.
    ///
    /// A weight column is materialized as soon as any part carries weights.
    pub fn concat(n_features: usize, parts: &[&PointSet<T>]) -> Result<Self> {
        for part in parts {
            if part.n_features() != n_features {
                return Err(Error::DimensionMismatch {
                    expected: n_features,
                    found: part.n_features(),
                });
            }
        }
        let views: Vec<ArrayView2<'_, T>> = parts.iter().map(|p| p.data.view()).collect();
        let data = if views.is_empty() {
            Array2::zeros((0, n_features))
        } else {
            ndarray::concatenate(Axis(0), &views)?
        };

        let weights = if parts.iter().any(|p| p.weights.is_some()) {
            let mut all = Vec::with_capacity(data.nrows());
            for part in parts {
                match &part.weights {
                    Some(w) => all.extend(w.iter().copied()),
                    None => all.extend(std::iter::repeat(T::one()).take(part.n_rows())),
                }
            }
            Some(Array1::from(all))
        } else {
            None
        };
        Ok(Self { data, weights })
    }

    /// Feature dimensionality check shared by the kernels.
    pub(crate) fn require_features(&self, n_features: usize) -> Result<()> {
        if self.n_features() != n_features {
            return Err(Error::DimensionMismatch {
                expected: n_features,
                found: self.n_features(),
            });
        }
        Ok(())
    }
}
