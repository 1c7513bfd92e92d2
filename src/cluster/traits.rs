use crate::error::Result;
use crate::points::{PointSet, Real};

/// Common interface for hard clustering (one label per observation).
pub trait Clustering<T: Real> {
    /// Cluster `data` and return one label per row: a cluster id, or
    /// [`NOISE`](crate::NOISE) for observations in no cluster.
    fn fit_predict(&self, data: &PointSet<T>) -> Result<Vec<i32>>;
}

/// Labels with noise as `None`, for any [`Clustering`].
pub trait DbscanExt<T: Real> {
    /// Fit and predict, returning labels where noise is `None`.
    fn fit_predict_with_noise(&self, data: &PointSet<T>) -> Result<Vec<Option<usize>>>;
}

impl<T: Real, C: Clustering<T> + ?Sized> DbscanExt<T> for C {
    fn fit_predict_with_noise(&self, data: &PointSet<T>) -> Result<Vec<Option<usize>>> {
        Ok(self
            .fit_predict(data)?
            .into_iter()
            .map(|l| usize::try_from(l).ok())
            .collect())
    }
}
