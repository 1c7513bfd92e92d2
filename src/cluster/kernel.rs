//! Core detection and breadth-first cluster expansion.
//!
//! One pass classifies the `own` rows of a search against an `all` set that
//! starts with those same rows. In a batch run the two sets coincide. In a
//! distributed block `all` is the block's points followed by its halo, and every
//! time a core point reaches a halo row the caller's hook is told about it; halo
//! rows themselves are never classified or expanded here.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::containers::{Neighborhood, Queue};
use crate::error::Result;
use crate::neighbors::{NeighborhoodEngine, SearchSet};
use crate::points::Real;

/// Label of an observation that has not been classified yet.
pub const UNDEFINED: i32 = -2;
/// Label of an observation not density-reachable from any core point.
pub const NOISE: i32 = -1;

/// Clustering state of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointState {
    /// Cluster label, [`NOISE`] or [`UNDEFINED`].
    pub cluster_id: i32,
    /// Neighborhood weight reached the core threshold.
    pub is_core: bool,
    /// The expansion has already visited this point.
    pub is_processed: bool,
}

impl PointState {
    fn new(is_core: bool) -> Self {
        Self {
            cluster_id: UNDEFINED,
            is_core,
            is_processed: false,
        }
    }
}

/// Per-observation clustering state of one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStructure {
    entries: Vec<PointState>,
    n_clusters: usize,
}

impl ClusterStructure {
    /// Mark points whose neighborhood weight reaches `min_weight` as core.
    pub fn from_weights<T: Real>(weights: &[T], min_weight: T) -> Self {
        Self {
            entries: weights.iter().map(|&w| PointState::new(w >= min_weight)).collect(),
            n_clusters: 0,
        }
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no observations.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of clusters the expansion created.
    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    /// State of observation `i`.
    pub fn entry(&self, i: usize) -> &PointState {
        &self.entries[i]
    }

    /// All states, in observation order.
    pub fn entries(&self) -> &[PointState] {
        &self.entries
    }

    /// Indices of core observations, ascending.
    pub fn core_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_core)
            .map(|(i, _)| i)
            .collect()
    }

    /// Cluster label per observation.
    pub fn assignments(&self) -> Vec<i32> {
        self.entries.iter().map(|e| e.cluster_id).collect()
    }
}

/// Where the expansion gets neighbor lists from.
pub(crate) enum Neighbors<'s, 'a, T, E> {
    /// Lists computed up front for every own row.
    Cached(Vec<Neighborhood<T>>),
    /// Lists recomputed on every visit.
    OnDemand {
        engine: &'s E,
        own: &'s SearchSet<'a, T>,
        all: &'s SearchSet<'a, T>,
        epsilon: T,
        scratch: Vec<Neighborhood<T>>,
    },
}

impl<T: Real, E: NeighborhoodEngine> Neighbors<'_, '_, T, E> {
    fn of(&mut self, p: usize) -> Result<&[usize]> {
        match self {
            Neighbors::Cached(lists) => Ok(lists[p].indices()),
            Neighbors::OnDemand {
                engine,
                own,
                all,
                epsilon,
                scratch,
            } => {
                scratch[0].clear();
                engine.query(own, &[p], all, *epsilon, scratch.as_mut_slice())?;
                Ok(scratch[0].indices())
            }
        }
    }
}

/// Run one full classification pass.
///
/// `on_halo(core, halo, cluster)` fires once for every pair of an own core point
/// and a halo row (`halo` counted from the first row after the own rows).
pub(crate) fn run_pass<'s, 'a, T, E, F>(
    engine: &'s E,
    own: &'s SearchSet<'a, T>,
    all: &'s SearchSet<'a, T>,
    epsilon: T,
    min_weight: T,
    memory_saving: bool,
    on_halo: F,
) -> Result<ClusterStructure>
where
    T: Real,
    E: NeighborhoodEngine,
    F: FnMut(usize, usize, i32) -> Result<()>,
{
    let (weights, mut neighbors) = if memory_saving {
        let weights = engine.weight_sums(own, all, epsilon)?;
        let source = Neighbors::OnDemand {
            engine,
            own,
            all,
            epsilon,
            scratch: vec![Neighborhood::new()],
        };
        (weights, source)
    } else {
        let lists = engine.compute_full(own, all, epsilon)?;
        let weights = lists.iter().map(Neighborhood::weight).collect();
        (weights, Neighbors::Cached(lists))
    };

    let mut structure = ClusterStructure::from_weights(&weights, min_weight);
    expand(&mut structure, &mut neighbors, on_halo)?;
    debug!(
        "classified {} points: {} core, {} clusters{}",
        structure.len(),
        structure.entries.iter().filter(|e| e.is_core).count(),
        structure.n_clusters,
        if memory_saving { " (memory saving)" } else { "" }
    );
    Ok(structure)
}

fn expand<T, E, F>(
    structure: &mut ClusterStructure,
    neighbors: &mut Neighbors<'_, '_, T, E>,
    mut on_halo: F,
) -> Result<()>
where
    T: Real,
    E: NeighborhoodEngine,
    F: FnMut(usize, usize, i32) -> Result<()>,
{
    let n_own = structure.entries.len();
    let mut queue = Queue::new();
    let mut next_id: i32 = 0;

    for seed in 0..n_own {
        let state = structure.entries[seed];
        if state.is_processed || !state.is_core {
            continue;
        }

        let cluster = next_id;
        next_id += 1;
        structure.entries[seed].is_processed = true;
        structure.entries[seed].cluster_id = cluster;
        queue.push(seed)?;

        // Only core points are ever queued.
        while let Some(p) = queue.pop() {
            for &j in neighbors.of(p)? {
                if j >= n_own {
                    on_halo(p, j - n_own, cluster)?;
                    continue;
                }
                let entry = &mut structure.entries[j];
                if entry.is_processed {
                    continue;
                }
                entry.is_processed = true;
                entry.cluster_id = cluster;
                if entry.is_core {
                    queue.push(j)?;
                }
            }
        }
    }

    for entry in &mut structure.entries {
        if entry.cluster_id == UNDEFINED {
            entry.cluster_id = NOISE;
            entry.is_processed = true;
        }
    }
    structure.n_clusters = next_id as usize;
    Ok(())
}
