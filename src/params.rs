//! Clustering parameters.
//!
//! Parameters deserialize from any `serde` format, so they can live in a config
//! file next to the rest of a job description. Missing fields fall back to
//! [`DbscanParams::default`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Optional outputs beyond the assignments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsToCompute {
    /// Emit the ordered indices of core observations.
    pub core_indices: bool,
    /// Emit a copy of the core observations' feature rows.
    pub core_observations: bool,
}

impl ResultsToCompute {
    /// Request both core outputs.
    pub fn all() -> Self {
        Self {
            core_indices: true,
            core_observations: true,
        }
    }
}

/// DBSCAN parameters shared by the batch kernel and the distributed steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbscanParams {
    /// Neighborhood radius (inclusive).
    pub epsilon: f64,
    /// Minimum neighborhood weight, the point itself included, for a core point.
    pub min_observations: usize,
    /// Recompute neighborhoods during expansion instead of caching them.
    pub memory_saving_mode: bool,
    /// Optional outputs.
    pub results_to_compute: ResultsToCompute,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self {
            epsilon: 0.5,
            min_observations: 5,
            memory_saving_mode: false,
            results_to_compute: ResultsToCompute::default(),
        }
    }
}

impl DbscanParams {
    /// Parameters with the given radius and density threshold.
    pub fn new(epsilon: f64, min_observations: usize) -> Self {
        Self {
            epsilon,
            min_observations,
            ..Self::default()
        }
    }

    /// Set epsilon (neighborhood radius).
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set the core threshold.
    pub fn with_min_observations(mut self, min_observations: usize) -> Self {
        self.min_observations = min_observations;
        self
    }

    /// Toggle memory-saving mode.
    pub fn with_memory_saving(mut self, enabled: bool) -> Self {
        self.memory_saving_mode = enabled;
        self
    }

    /// Select optional outputs.
    pub fn with_results(mut self, results: ResultsToCompute) -> Self {
        self.results_to_compute = results;
        self
    }

    /// Reject parameters no kernel can run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.epsilon >= 0.0) || !self.epsilon.is_finite() {
            return Err(Error::InvalidParameter {
                name: "epsilon",
                message: "must be finite and non-negative",
            });
        }
        if self.min_observations == 0 {
            return Err(Error::InvalidParameter {
                name: "min_observations",
                message: "must be at least 1",
            });
        }
        Ok(())
    }
}
