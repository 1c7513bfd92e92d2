//! DBSCAN: Density-Based Spatial Clustering of Applications with Noise.
//!
//! # The Algorithm (Ester et al., 1996)
//!
//! - **Epsilon (ε)**: maximum distance between two neighbors (inclusive).
//! - **min_observations**: minimum neighborhood weight, the point itself
//!   included, for a point to be *core*. Unweighted points weigh 1.
//! - **Core point**: neighborhood weight ≥ `min_observations`.
//! - **Border point**: not core, but within ε of a core point.
//! - **Noise point**: neither.
//!
//! Points are scanned in index order. Every core point not yet in a cluster
//! seeds a new cluster, which grows breadth-first through core points; border
//! points join the first cluster that reaches them and are never expanded.
//!
//! ## Modes
//!
//! By default every neighborhood is computed once up front and kept for the
//! expansion. In memory-saving mode only neighborhood weights are computed up
//! front; each core point's neighbors are recomputed when the expansion
//! visits it, so peak memory stays O(n) instead of O(n · average degree).
//!
//! ## References
//!
//! Ester et al. (1996). "A Density-Based Algorithm for Discovering Clusters
//! in Large Spatial Databases with Noise." KDD-96.

use ndarray::{Array2, Axis};

use super::kernel::{self, ClusterStructure, NOISE};
use super::traits::Clustering;
use crate::error::Result;
use crate::neighbors::{NeighborhoodEngine, SearchSet, TiledEngine};
use crate::params::{DbscanParams, ResultsToCompute};
use crate::points::{cast, PointSet, Real};

/// Single-node DBSCAN clusterer.
#[derive(Debug, Clone)]
pub struct Dbscan<E = TiledEngine> {
    params: DbscanParams,
    engine: E,
}

impl Dbscan {
    /// Create a DBSCAN clusterer with the default engine.
    ///
    /// # Arguments
    ///
    /// * `epsilon` - Maximum distance between two points to be neighbors.
    /// * `min_observations` - Minimum neighborhood weight of a core point.
    pub fn new(epsilon: f64, min_observations: usize) -> Self {
        Self::from_params(DbscanParams::new(epsilon, min_observations))
    }

    /// Create a clusterer from a full parameter set.
    pub fn from_params(params: DbscanParams) -> Self {
        Self {
            params,
            engine: TiledEngine::default(),
        }
    }
}

impl Default for Dbscan {
    fn default() -> Self {
        Self::from_params(DbscanParams::default())
    }
}

impl<E: NeighborhoodEngine> Dbscan<E> {
    /// Set epsilon (neighborhood radius).
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.params.epsilon = epsilon;
        self
    }

    /// Set the core threshold.
    pub fn with_min_observations(mut self, min_observations: usize) -> Self {
        self.params.min_observations = min_observations;
        self
    }

    /// Recompute neighborhoods during expansion instead of caching them.
    pub fn with_memory_saving(mut self, enabled: bool) -> Self {
        self.params.memory_saving_mode = enabled;
        self
    }

    /// Request core indices and/or core rows in the result.
    pub fn with_results(mut self, results: ResultsToCompute) -> Self {
        self.params.results_to_compute = results;
        self
    }

    /// Swap the neighborhood engine.
    pub fn with_engine<E2: NeighborhoodEngine>(self, engine: E2) -> Dbscan<E2> {
        Dbscan {
            params: self.params,
            engine,
        }
    }

    /// Current parameters.
    pub fn params(&self) -> &DbscanParams {
        &self.params
    }

    /// Cluster `data`.
    pub fn fit<T: Real>(&self, data: &PointSet<T>) -> Result<DbscanResult<T>> {
        self.params.validate()?;
        let epsilon: T = cast(self.params.epsilon, "epsilon")?;
        let min_weight: T = cast(self.params.min_observations, "min_observations")?;

        let set = SearchSet::new(data);
        let structure = kernel::run_pass(
            &self.engine,
            &set,
            &set,
            epsilon,
            min_weight,
            self.params.memory_saving_mode,
            |_, _, _| Ok(()),
        )?;
        Ok(DbscanResult::from_structure(
            &structure,
            data,
            self.params.results_to_compute,
        ))
    }
}

impl<T: Real, E: NeighborhoodEngine> Clustering<T> for Dbscan<E> {
    fn fit_predict(&self, data: &PointSet<T>) -> Result<Vec<i32>> {
        Ok(self.fit(data)?.assignments)
    }
}

/// Output of a DBSCAN run.
#[derive(Debug, Clone, PartialEq)]
pub struct DbscanResult<T> {
    /// Cluster id per input row, or [`NOISE`].
    pub assignments: Vec<i32>,
    /// Number of clusters.
    pub n_clusters: usize,
    /// Ascending core row indices, if requested.
    pub core_indices: Option<Vec<usize>>,
    /// Feature rows of the core observations, if requested.
    pub core_observations: Option<Array2<T>>,
}

impl<T: Real> DbscanResult<T> {
    fn from_structure(
        structure: &ClusterStructure,
        data: &PointSet<T>,
        results: ResultsToCompute,
    ) -> Self {
        let wants_core = results.core_indices || results.core_observations;
        let core = wants_core.then(|| structure.core_indices());
        let core_observations = match (&core, results.core_observations) {
            (Some(rows), true) => Some(data.data().select(Axis(0), rows)),
            _ => None,
        };
        Self {
            assignments: structure.assignments(),
            n_clusters: structure.n_clusters(),
            core_indices: core.filter(|_| results.core_indices),
            core_observations,
        }
    }

    /// Number of noise observations.
    pub fn n_noise(&self) -> usize {
        self.assignments.iter().filter(|&&l| l == NOISE).count()
    }

    /// Number of observations in each cluster, indexed by cluster id.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &l in &self.assignments {
            if let Ok(id) = usize::try_from(l) {
                sizes[id] += 1;
            }
        }
        sizes
    }
}
