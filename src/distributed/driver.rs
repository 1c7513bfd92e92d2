//! In-process orchestration of the thirteen steps.
//!
//! [`DistributedDbscan`] plays every role at once: it owns one
//! [`LocalClusters`] per block, runs each step over all blocks in parallel and
//! carries queries between steps. Blocks only see their own state plus the
//! values routed to them, so the same step functions can run behind any other
//! transport.

use log::{debug, info};
use ndarray::{Array2, Axis};
use rayon::prelude::*;

use super::halo::{step5, HaloData, HaloSet};
use super::local::{LocalClusters, StepOutput};
use super::master::{step13, step3, step7, step9, BlockAssignments};
use super::partition::{step1, step2, step4, BlockData, BoundingBox};
use super::query::{route, Query};
use crate::cluster::Clustering;
use crate::error::{Error, Result};
use crate::neighbors::{NeighborhoodEngine, TiledEngine};
use crate::params::{DbscanParams, ResultsToCompute};
use crate::points::{PointSet, Real};

const DEFAULT_BLOCKS: usize = 4;

/// DBSCAN over data split into blocks.
///
/// ```rust
/// use halo_dbscan::{DistributedDbscan, PointSet};
/// use ndarray::Array2;
///
/// let left = PointSet::new(Array2::from_shape_fn((5, 1), |(i, _)| i as f64));
/// let right = PointSet::new(Array2::from_shape_fn((5, 1), |(i, _)| (i + 5) as f64));
///
/// let result = DistributedDbscan::new(1.5, 2).run(&[left, right]).unwrap();
/// assert_eq!(result.n_clusters, 1);
/// assert_eq!(result.assignments, vec![vec![0; 5], vec![0; 5]]);
/// ```
#[derive(Debug, Clone)]
pub struct DistributedDbscan<E = TiledEngine> {
    params: DbscanParams,
    engine: E,
    n_blocks: usize,
    max_rounds: Option<usize>,
}

impl DistributedDbscan {
    /// Distributed clusterer with the default engine.
    pub fn new(epsilon: f64, min_observations: usize) -> Self {
        Self::from_params(DbscanParams::new(epsilon, min_observations))
    }

    /// Distributed clusterer from a full parameter set.
    pub fn from_params(params: DbscanParams) -> Self {
        Self {
            params,
            engine: TiledEngine::default(),
            n_blocks: DEFAULT_BLOCKS,
            max_rounds: None,
        }
    }
}

impl Default for DistributedDbscan {
    fn default() -> Self {
        Self::from_params(DbscanParams::default())
    }
}

/// Output of a distributed run, per original block.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedResult<T> {
    /// Global cluster id or [`NOISE`](crate::NOISE) per row of each input block.
    pub assignments: Vec<Vec<i32>>,
    /// Number of global clusters.
    pub n_clusters: usize,
    /// Ascending core rows of each input block, if requested.
    pub core_indices: Option<Vec<Vec<usize>>>,
    /// Feature rows of each block's core observations, if requested.
    pub core_observations: Option<Vec<Array2<T>>>,
    /// Rounds of the merge loop (steps 7 and 8).
    pub merge_rounds: usize,
    /// Rounds of the id resolution loop (step 11).
    pub resolve_rounds: usize,
}

impl<T> DistributedResult<T> {
    /// All assignments, blocks concatenated in input order.
    pub fn concatenated(&self) -> Vec<i32> {
        self.assignments.iter().flatten().copied().collect()
    }
}

impl<E: NeighborhoodEngine> DistributedDbscan<E> {
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

    /// Number of blocks [`Clustering::fit_predict`] cuts its input into.
    pub fn with_blocks(mut self, n_blocks: usize) -> Self {
        self.n_blocks = n_blocks;
        self
    }

    /// Give up with [`Error::NotConverged`] after this many rounds of either loop.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }

    /// Swap the neighborhood engine.
    pub fn with_engine<E2: NeighborhoodEngine>(self, engine: E2) -> DistributedDbscan<E2> {
        DistributedDbscan {
            params: self.params,
            engine,
            n_blocks: self.n_blocks,
            max_rounds: self.max_rounds,
        }
    }

    /// Current parameters.
    pub fn params(&self) -> &DbscanParams {
        &self.params
    }

    /// Cluster the union of `blocks`; labels come back per block, in row order.
    pub fn run<T: Real>(&self, blocks: &[PointSet<T>]) -> Result<DistributedResult<T>> {
        self.params.validate()?;
        let n_blocks = blocks.len();
        let Some(first) = blocks.first() else {
            return Err(Error::InvalidParameter {
                name: "blocks",
                message: "at least one block is required",
            });
        };
        let n_features = first.n_features();
        for block in blocks {
            block.require_features(n_features)?;
        }
        if n_features == 0 && blocks.iter().any(|b| !b.is_empty()) {
            return Err(Error::InvalidParameter {
                name: "n_features",
                message: "must be at least 1",
            });
        }

        let tagged = blocks
            .par_iter()
            .enumerate()
            .map(|(b, points)| BlockData::new(points.clone(), step1(b, points.n_rows())))
            .collect::<Result<Vec<_>>>()?;
        let parts = partition(tagged, n_features)?;
        debug!(
            "partitioned {} blocks: {:?} rows",
            n_blocks,
            parts.iter().map(|p| p.points.n_rows()).collect::<Vec<_>>()
        );

        let halos = self.exchange_halos(&parts, n_features)?;
        let (mut states, outputs): (Vec<LocalClusters>, Vec<StepOutput>) = parts
            .par_iter()
            .zip(halos.par_iter())
            .enumerate()
            .map(|(b, (part, halo))| {
                LocalClusters::step6(&self.engine, b, &part.points, halo, &self.params)
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();

        let merge_rounds = self.converge("merge", &mut states, outputs, LocalClusters::step8)?;

        let counts: Vec<usize> = states.iter().map(LocalClusters::cluster_count).collect();
        let offsets = step9(&counts);
        debug!("{} global clusters, offsets {:?}", offsets.n_clusters(), offsets.as_slice());

        let outputs = states
            .par_iter_mut()
            .map(|s| s.step10(&offsets))
            .collect::<Result<Vec<_>>>()?;
        let resolve_rounds = self.converge("resolve", &mut states, outputs, LocalClusters::step11)?;

        let assignments = states
            .par_iter()
            .zip(parts.par_iter())
            .map(|(state, part)| state.step12(&part.order))
            .collect::<Result<Vec<_>>>()?;
        let inboxes = route(assignments.into_iter().flatten(), n_blocks)?;
        let finals = blocks
            .par_iter()
            .zip(inboxes.par_iter())
            .enumerate()
            .map(|(b, (points, inbox))| step13(b, points.n_rows(), inbox))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "distributed dbscan: {} rows in {} blocks, {} clusters, \
             {} merge rounds, {} resolve rounds",
            blocks.iter().map(PointSet::n_rows).sum::<usize>(),
            n_blocks,
            offsets.n_clusters(),
            merge_rounds,
            resolve_rounds
        );
        Ok(self.collect(blocks, finals, offsets.n_clusters(), merge_rounds, resolve_rounds))
    }

    fn exchange_halos<T: Real>(
        &self,
        parts: &[BlockData<T>],
        n_features: usize,
    ) -> Result<Vec<HaloSet<T>>> {
        let boxes: Vec<Option<BoundingBox<T>>> =
            parts.par_iter().map(|p| BoundingBox::of(&p.points)).collect();
        let outgoing = parts
            .par_iter()
            .enumerate()
            .map(|(b, part)| step5(b, &part.points, &boxes, &self.params))
            .collect::<Result<Vec<_>>>()?;

        let mut incoming: Vec<Vec<(usize, HaloData<T>)>> =
            (0..parts.len()).map(|_| Vec::new()).collect();
        for (src, per_dst) in outgoing.into_iter().enumerate() {
            for (dst, data) in per_dst.into_iter().enumerate() {
                if !data.indices.is_empty() {
                    incoming[dst].push((src, data));
                }
            }
        }
        debug!(
            "halo sizes {:?}",
            incoming
                .iter()
                .map(|v| v.iter().map(|(_, d)| d.indices.len()).sum::<usize>())
                .collect::<Vec<_>>()
        );
        incoming
            .into_par_iter()
            .map(|parts| HaloSet::gather(n_features, parts))
            .collect()
    }

    /// Deliver queries and apply `step` until every block reports finished.
    fn converge<F>(
        &self,
        loop_name: &'static str,
        states: &mut [LocalClusters],
        mut outputs: Vec<StepOutput>,
        step: F,
    ) -> Result<usize>
    where
        F: Fn(&mut LocalClusters, &[Query]) -> Result<StepOutput> + Sync,
    {
        let mut rounds = 0;
        loop {
            let flags: Vec<bool> = outputs.iter().map(|o| o.finished).collect();
            if step7(&flags) {
                return Ok(rounds);
            }
            if self.max_rounds.is_some_and(|max| rounds >= max) {
                return Err(Error::NotConverged { loop_name, rounds });
            }
            let in_flight: usize = outputs.iter().map(|o| o.queries.len()).sum();
            let inboxes = route(outputs.into_iter().flat_map(|o| o.queries), states.len())?;
            outputs = states
                .par_iter_mut()
                .zip(inboxes.par_iter())
                .map(|(state, inbox)| step(state, inbox.as_slice()))
                .collect::<Result<Vec<_>>>()?;
            rounds += 1;
            debug!("{loop_name} round {rounds}: {in_flight} queries delivered");
        }
    }

    fn collect<T: Real>(
        &self,
        blocks: &[PointSet<T>],
        finals: Vec<BlockAssignments>,
        n_clusters: usize,
        merge_rounds: usize,
        resolve_rounds: usize,
    ) -> DistributedResult<T> {
        let wanted = self.params.results_to_compute;
        let cores: Option<Vec<Vec<usize>>> = (wanted.core_indices || wanted.core_observations)
            .then(|| finals.iter().map(BlockAssignments::core_indices).collect());
        let core_observations = match (&cores, wanted.core_observations) {
            (Some(cores), true) => Some(
                blocks
                    .iter()
                    .zip(cores)
                    .map(|(points, rows)| points.data().select(Axis(0), rows))
                    .collect(),
            ),
            _ => None,
        };
        DistributedResult {
            assignments: finals.into_iter().map(|f| f.assignments).collect(),
            n_clusters,
            core_indices: cores.filter(|_| wanted.core_indices),
            core_observations,
            merge_rounds,
            resolve_rounds,
        }
    }
}

/// Bisect `group` recursively until every group holds a single block.
fn partition<T: Real>(group: Vec<BlockData<T>>, n_features: usize) -> Result<Vec<BlockData<T>>> {
    let len = group.len();
    if len <= 1 {
        return Ok(group);
    }
    let left = len / 2;
    let right = len - left;

    let summaries: Vec<_> = group.par_iter().map(|b| step2(&b.points)).collect();
    let split = step3(&summaries, left, right)?;
    let scattered = group
        .par_iter()
        .enumerate()
        .map(|(i, block)| step4(block, &split, i, left, right))
        .collect::<Result<Vec<_>>>()?;

    let mut gathered: Vec<Vec<BlockData<T>>> = (0..len).map(|_| Vec::with_capacity(len)).collect();
    for buckets in scattered {
        for (dst, bucket) in buckets.into_iter().enumerate() {
            gathered[dst].push(bucket);
        }
    }
    let mut merged = gathered
        .into_par_iter()
        .map(|parts| BlockData::concat(n_features, parts))
        .collect::<Result<Vec<_>>>()?;

    let right_group = merged.split_off(left);
    let (lower, upper) = rayon::join(
        || partition(merged, n_features),
        || partition(right_group, n_features),
    );
    let mut lower = lower?;
    lower.extend(upper?);
    Ok(lower)
}

impl<T: Real, E: NeighborhoodEngine> Clustering<T> for DistributedDbscan<E> {
    /// Cut `data` into contiguous row ranges, one per block, and run the
    /// protocol over them.
    fn fit_predict(&self, data: &PointSet<T>) -> Result<Vec<i32>> {
        if self.n_blocks == 0 {
            return Err(Error::InvalidParameter {
                name: "n_blocks",
                message: "must be at least 1",
            });
        }
        let n = data.n_rows();
        let blocks: Vec<PointSet<T>> = (0..self.n_blocks)
            .map(|b| data.slice_rows(b * n / self.n_blocks, (b + 1) * n / self.n_blocks))
            .collect();
        Ok(self.run(&blocks)?.concatenated())
    }
}
