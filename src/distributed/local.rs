//! Per-block clustering state (steps 6, 8, 10, 11 and 12).
//!
//! Each block clusters its own rows against its rows plus halo. A local cluster
//! starts out named `(block, local index)`. Whenever one of its core points
//! reaches a halo row the block remembers that edge and sends the cluster's
//! current name across it as a [`QueryPayload::Link`].
//!
//! A receiving core point adopts the name if it is smaller than its cluster's,
//! and the block forwards the lowered name over all edges of that cluster. A
//! receiving non-core point with no local cluster becomes a border point of the
//! smallest cluster offered to it. Names only decrease and every cluster has a
//! finite number of edges, so the exchange reaches a fixed point where each
//! connected cluster carries its minimum name everywhere.
//!
//! After renumbering (step 9) every block learns the global id of each name it
//! holds: names it owns from its offset, the rest through one
//! [`IdRequest`](QueryPayload::IdRequest)/[`IdResponse`](QueryPayload::IdResponse)
//! round trip with the owner.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use super::halo::{HaloSet, PointId};
use super::master::ClusterOffsets;
use super::partition::PartialOrder;
use super::query::{check_destination, normalize, ClusterName, Query, QueryPayload};
use crate::cluster::kernel::{self, ClusterStructure, NOISE};
use crate::containers::Vector;
use crate::error::{Error, Result};
use crate::neighbors::{NeighborhoodEngine, SearchSet};
use crate::params::DbscanParams;
use crate::points::{cast, PointSet, Real};

/// Result of one local round of a convergence loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Queries to deliver before the next round.
    pub queries: Vec<Query>,
    /// Nothing left to tell other blocks.
    pub finished: bool,
}

impl StepOutput {
    fn from_queries(queries: Vector<Query>, settled: bool) -> Self {
        let queries = normalize(queries.into_vec());
        let finished = settled && queries.is_empty();
        Self { queries, finished }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    core: usize,
    target: PointId,
}

/// Clustering state a block owns from step 6 until step 12.
#[derive(Debug, Clone)]
pub struct LocalClusters {
    block: usize,
    structure: ClusterStructure,
    canonical: Vec<ClusterName>,
    edges: Vec<Vec<Edge>>,
    borders: BTreeMap<usize, ClusterName>,
    rooted: Vec<Option<i32>>,
    resolved: BTreeMap<ClusterName, i32>,
    pending: BTreeSet<ClusterName>,
}

impl LocalClusters {
    /// Step 6: cluster the block's rows against rows + halo and emit the first
    /// round of links.
    pub fn step6<T, E>(
        engine: &E,
        block_index: usize,
        points: &PointSet<T>,
        halo: &HaloSet<T>,
        params: &DbscanParams,
    ) -> Result<(Self, StepOutput)>
    where
        T: Real,
        E: NeighborhoodEngine,
    {
        params.validate()?;
        let n_features = points.n_features();
        halo.points.require_features(n_features)?;
        if halo.owners.len() != halo.points.n_rows() {
            return Err(Error::inconsistent(
                "step6",
                format!(
                    "{} halo rows with {} owners",
                    halo.points.n_rows(),
                    halo.owners.len()
                ),
            ));
        }
        if let Some(own) = halo.owners.iter().find(|o| o.block == block_index) {
            return Err(Error::inconsistent(
                "step6",
                format!("halo row {} is owned by this block", own.index),
            ));
        }

        let epsilon: T = cast(params.epsilon, "epsilon")?;
        let min_weight: T = cast(params.min_observations, "min_observations")?;
        let extended = PointSet::concat(n_features, &[points, &halo.points])?;
        let own = SearchSet::new(points);
        let all = SearchSet::new(&extended);

        let mut edges: Vec<Vec<Edge>> = Vec::new();
        let structure = kernel::run_pass(
            engine,
            &own,
            &all,
            epsilon,
            min_weight,
            params.memory_saving_mode,
            |core, h, cluster| {
                let c = cluster as usize;
                if edges.len() <= c {
                    edges.resize_with(c + 1, Vec::new);
                }
                edges[c].push(Edge {
                    core,
                    target: halo.owners[h],
                });
                Ok(())
            },
        )?;
        let n_clusters = structure.n_clusters();
        edges.resize_with(n_clusters, Vec::new);

        let state = Self {
            block: block_index,
            canonical: (0..n_clusters)
                .map(|c| ClusterName::new(block_index, c))
                .collect(),
            rooted: vec![None; n_clusters],
            structure,
            edges,
            borders: BTreeMap::new(),
            resolved: BTreeMap::new(),
            pending: BTreeSet::new(),
        };
        let output = StepOutput::from_queries(state.links(0..n_clusters)?, true);
        debug!(
            "block {}: {} local clusters, {} halo rows, {} initial links",
            block_index,
            n_clusters,
            halo.len(),
            output.queries.len()
        );
        Ok((state, output))
    }

    fn links(&self, clusters: impl IntoIterator<Item = usize>) -> Result<Vector<Query>> {
        let mut out = Vector::new();
        for c in clusters {
            for edge in &self.edges[c] {
                out.push(Query {
                    dst_block: edge.target.block,
                    dst_local_id: edge.target.index,
                    src_block: self.block,
                    src_local_id: edge.core,
                    payload: QueryPayload::Link(self.canonical[c]),
                })?;
            }
        }
        Ok(out)
    }

    /// Step 8: apply received links and forward every lowered name.
    ///
    /// Applying the same link twice changes nothing.
    pub fn step8(&mut self, inbox: &[Query]) -> Result<StepOutput> {
        for query in inbox {
            check_destination("step8", self.block, query)?;
            if query.dst_local_id >= self.structure.len() {
                return Err(Error::inconsistent(
                    "step8",
                    format!("row {} of {}", query.dst_local_id, self.structure.len()),
                ));
            }
            if !matches!(query.payload, QueryPayload::Link(_)) {
                return Err(Error::inconsistent(
                    "step8",
                    format!("unexpected {:?}", query.payload),
                ));
            }
        }

        let mut lowered = BTreeSet::new();
        for query in inbox {
            let QueryPayload::Link(name) = query.payload else {
                continue;
            };
            let entry = *self.structure.entry(query.dst_local_id);
            if entry.is_core {
                let c = entry.cluster_id as usize;
                if name < self.canonical[c] {
                    self.canonical[c] = name;
                    lowered.insert(c);
                }
            } else if entry.cluster_id == NOISE {
                self.borders
                    .entry(query.dst_local_id)
                    .and_modify(|current| {
                        if name < *current {
                            *current = name;
                        }
                    })
                    .or_insert(name);
            }
        }

        let output = StepOutput::from_queries(self.links(lowered)?, true);
        debug!(
            "block {}: {} links in, {} links out",
            self.block,
            inbox.len(),
            output.queries.len()
        );
        Ok(output)
    }

    /// Clusters whose canonical name is their own; these get global ids here.
    pub fn cluster_count(&self) -> usize {
        self.canonical
            .iter()
            .enumerate()
            .filter(|&(c, name)| *name == ClusterName::new(self.block, c))
            .count()
    }

    /// Step 10: give owned clusters their global ids and ask the owners of all
    /// other names this block holds.
    pub fn step10(&mut self, offsets: &ClusterOffsets) -> Result<StepOutput> {
        let (start, count) = offsets.range(self.block).ok_or_else(|| {
            Error::inconsistent(
                "step10",
                format!("no offset for block {} of {}", self.block, offsets.n_blocks()),
            )
        })?;
        if count != self.cluster_count() {
            return Err(Error::inconsistent(
                "step10",
                format!(
                    "offsets reserve {count} ids but block {} owns {} clusters",
                    self.block,
                    self.cluster_count()
                ),
            ));
        }

        let mut rooted = vec![None; self.canonical.len()];
        let mut resolved = BTreeMap::new();
        let mut next = start;
        for (c, name) in self.canonical.iter().enumerate() {
            if *name == ClusterName::new(self.block, c) {
                let id = global_id(next)?;
                rooted[c] = Some(id);
                resolved.insert(*name, id);
                next += 1;
            }
        }

        let mut pending = BTreeSet::new();
        for name in self.canonical.iter().chain(self.borders.values()) {
            if name.block == self.block {
                if !resolved.contains_key(name) {
                    return Err(Error::inconsistent(
                        "step10",
                        format!("name {name:?} is neither owned nor foreign"),
                    ));
                }
            } else {
                pending.insert(*name);
            }
        }

        let mut out = Vector::new();
        for name in &pending {
            out.push(Query {
                dst_block: name.block,
                dst_local_id: name.cluster,
                src_block: self.block,
                src_local_id: name.cluster,
                payload: QueryPayload::IdRequest,
            })?;
        }

        self.rooted = rooted;
        self.resolved = resolved;
        self.pending = pending;
        Ok(StepOutput::from_queries(out, self.pending.is_empty()))
    }

    /// Step 11: answer id requests and record answers.
    pub fn step11(&mut self, inbox: &[Query]) -> Result<StepOutput> {
        let mut out = Vector::new();
        for query in inbox {
            check_destination("step11", self.block, query)?;
            match query.payload {
                QueryPayload::IdRequest => {
                    let id = self
                        .rooted
                        .get(query.dst_local_id)
                        .copied()
                        .flatten()
                        .ok_or_else(|| {
                            Error::inconsistent(
                                "step11",
                                format!(
                                    "block {} asked for cluster {} which block {} does not own",
                                    query.src_block, query.dst_local_id, self.block
                                ),
                            )
                        })?;
                    out.push(Query {
                        dst_block: query.src_block,
                        dst_local_id: query.dst_local_id,
                        src_block: self.block,
                        src_local_id: query.dst_local_id,
                        payload: QueryPayload::IdResponse(id),
                    })?;
                }
                QueryPayload::IdResponse(_) => {
                    let name = ClusterName::new(query.src_block, query.src_local_id);
                    if !self.pending.contains(&name) && !self.resolved.contains_key(&name) {
                        return Err(Error::inconsistent(
                            "step11",
                            format!("unrequested id for {name:?}"),
                        ));
                    }
                }
                other => {
                    return Err(Error::inconsistent(
                        "step11",
                        format!("unexpected {other:?}"),
                    ))
                }
            }
        }

        for query in inbox {
            if let QueryPayload::IdResponse(id) = query.payload {
                let name = ClusterName::new(query.src_block, query.src_local_id);
                self.pending.remove(&name);
                self.resolved.insert(name, id);
            }
        }
        Ok(StepOutput::from_queries(out, self.pending.is_empty()))
    }

    /// Final global label of every own row, in row order.
    pub fn final_assignments(&self) -> Result<Vec<i32>> {
        (0..self.structure.len())
            .map(|i| {
                let entry = self.structure.entry(i);
                let name = if entry.cluster_id >= 0 {
                    self.canonical[entry.cluster_id as usize]
                } else if let Some(name) = self.borders.get(&i) {
                    *name
                } else {
                    return Ok(NOISE);
                };
                self.resolved.get(&name).copied().ok_or_else(|| {
                    Error::inconsistent("final assignment", format!("{name:?} is unresolved"))
                })
            })
            .collect()
    }

    /// Step 12: address every row's final label to its original block.
    pub fn step12(&self, order: &[PartialOrder]) -> Result<Vec<Query>> {
        if order.len() != self.structure.len() {
            return Err(Error::inconsistent(
                "step12",
                format!("{} order tags for {} rows", order.len(), self.structure.len()),
            ));
        }
        let labels = self.final_assignments()?;
        let mut out = Vector::new();
        for (i, (tag, &cluster_id)) in order.iter().zip(&labels).enumerate() {
            out.push(Query {
                dst_block: tag.block,
                dst_local_id: tag.index,
                src_block: self.block,
                src_local_id: i,
                payload: QueryPayload::Assignment {
                    cluster_id,
                    is_core: self.structure.entry(i).is_core,
                },
            })?;
        }
        Ok(out.into_vec())
    }

    /// Block this state belongs to.
    pub fn block(&self) -> usize {
        self.block
    }

    /// Local clustering of the block's own rows.
    pub fn structure(&self) -> &ClusterStructure {
        &self.structure
    }

    /// Current canonical name of local cluster `c`.
    pub fn canonical_name(&self, c: usize) -> ClusterName {
        self.canonical[c]
    }

    /// Border rows claimed by clusters of other blocks.
    pub fn foreign_borders(&self) -> &BTreeMap<usize, ClusterName> {
        &self.borders
    }
}

fn global_id(value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::inconsistent("step10", format!("cluster id {value} overflows i32")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::halo::HaloData;
    use crate::distributed::master::step9;
    use crate::neighbors::TiledEngine;
    use ndarray::array;

    fn halo_from(block: usize, rows: ndarray::Array2<f64>, indices: Vec<usize>) -> HaloSet<f64> {
        HaloSet::gather(
            1,
            vec![(
                block,
                HaloData {
                    points: PointSet::new(rows),
                    indices,
                },
            )],
        )
        .unwrap()
    }

    fn local(
        block: usize,
        points: &PointSet<f64>,
        halo: &HaloSet<f64>,
        params: &DbscanParams,
    ) -> (LocalClusters, StepOutput) {
        LocalClusters::step6(&TiledEngine::new(), block, points, halo, params).unwrap()
    }

    #[test]
    fn step6_links_core_points_to_halo_rows() {
        let points = PointSet::new(array![[0.0], [1.0], [2.0]]);
        let halo = halo_from(1, array![[3.0]], vec![0]);
        let params = DbscanParams::new(1.0, 2);
        let (state, out) = local(0, &points, &halo, &params);
        assert_eq!(state.structure().assignments(), vec![0, 0, 0]);
        assert!(!out.finished);
        assert_eq!(
            out.queries,
            vec![Query {
                dst_block: 1,
                dst_local_id: 0,
                src_block: 0,
                src_local_id: 2,
                payload: QueryPayload::Link(ClusterName::new(0, 0)),
            }]
        );
    }

    #[test]
    fn step6_without_halo_is_finished() {
        let points = PointSet::new(array![[0.0], [0.5]]);
        let params = DbscanParams::new(1.0, 2);
        let (state, out) = local(0, &points, &HaloSet::empty(1), &params);
        assert!(out.finished);
        assert_eq!(state.cluster_count(), 1);
    }

    #[test]
    fn step8_lowers_names_idempotently() {
        let points = PointSet::new(array![[5.0], [6.0]]);
        let halo = halo_from(0, array![[4.0]], vec![3]);
        let params = DbscanParams::new(1.0, 2);
        let (mut state, _) = local(1, &points, &halo, &params);

        let link = Query {
            dst_block: 1,
            dst_local_id: 0,
            src_block: 0,
            src_local_id: 3,
            payload: QueryPayload::Link(ClusterName::new(0, 0)),
        };
        let out = state.step8(&[link]).unwrap();
        assert_eq!(state.canonical_name(0), ClusterName::new(0, 0));
        assert_eq!(out.queries.len(), 1);
        assert_eq!(out.queries[0].payload, QueryPayload::Link(ClusterName::new(0, 0)));

        let again = state.step8(&[link]).unwrap();
        assert!(again.finished);
        assert_eq!(state.cluster_count(), 0);
    }

    #[test]
    fn step8_claims_noise_as_border() {
        // Row 0 of this block is isolated locally but next to a foreign core point.
        let points = PointSet::new(array![[5.0]]);
        let params = DbscanParams::new(1.0, 3);
        let (mut state, out) = local(1, &points, &HaloSet::empty(1), &params);
        assert!(out.finished);
        assert_eq!(state.structure().assignments(), vec![NOISE]);

        let offer = |name| Query {
            dst_block: 1,
            dst_local_id: 0,
            src_block: 0,
            src_local_id: 0,
            payload: QueryPayload::Link(name),
        };
        state.step8(&[offer(ClusterName::new(2, 0))]).unwrap();
        state.step8(&[offer(ClusterName::new(0, 4))]).unwrap();
        state.step8(&[offer(ClusterName::new(3, 1))]).unwrap();
        assert_eq!(state.foreign_borders().get(&0), Some(&ClusterName::new(0, 4)));
    }

    #[test]
    fn step8_rejects_misaddressed_queries_without_mutating() {
        let points = PointSet::new(array![[0.0], [0.5]]);
        let params = DbscanParams::new(1.0, 2);
        let (mut state, _) = local(2, &points, &HaloSet::empty(1), &params);
        let good = Query {
            dst_block: 2,
            dst_local_id: 0,
            src_block: 0,
            src_local_id: 0,
            payload: QueryPayload::Link(ClusterName::new(0, 0)),
        };
        let bad = Query {
            dst_local_id: 9,
            ..good
        };
        assert!(state.step8(&[good, bad]).is_err());
        assert_eq!(state.canonical_name(0), ClusterName::new(2, 0));
    }

    #[test]
    fn resolution_round_trip() {
        let params = DbscanParams::new(1.0, 2);
        let engine = TiledEngine::new();
        // Block 0 owns the cluster, block 1 learned its name through a link.
        let (mut owner, _) = LocalClusters::step6(
            &engine,
            0,
            &PointSet::new(array![[0.0], [1.0]]),
            &halo_from(1, array![[2.0]], vec![0]),
            &params,
        )
        .unwrap();
        let (mut other, _) = LocalClusters::step6(
            &engine,
            1,
            &PointSet::new(array![[2.0], [3.0]]),
            &halo_from(0, array![[1.0]], vec![1]),
            &params,
        )
        .unwrap();
        other
            .step8(&[Query {
                dst_block: 1,
                dst_local_id: 0,
                src_block: 0,
                src_local_id: 1,
                payload: QueryPayload::Link(ClusterName::new(0, 0)),
            }])
            .unwrap();

        let offsets = step9(&[owner.cluster_count(), other.cluster_count()]);
        assert_eq!(offsets.n_clusters(), 1);
        let owner_out = owner.step10(&offsets).unwrap();
        let other_out = other.step10(&offsets).unwrap();
        assert!(owner_out.finished);
        assert!(!other_out.finished);
        assert_eq!(other_out.queries[0].payload, QueryPayload::IdRequest);

        let replies = owner.step11(&other_out.queries).unwrap();
        assert!(!replies.finished);
        let done = other.step11(&replies.queries).unwrap();
        assert!(done.finished);

        assert_eq!(owner.final_assignments().unwrap(), vec![0, 0]);
        assert_eq!(other.final_assignments().unwrap(), vec![0, 0]);

        let routed = other.step12(&[
            PartialOrder { block: 0, index: 7 },
            PartialOrder { block: 1, index: 0 },
        ]);
        let routed = routed.unwrap();
        assert_eq!(routed[0].dst_block, 0);
        assert_eq!(routed[0].dst_local_id, 7);
        assert_eq!(
            routed[1].payload,
            QueryPayload::Assignment {
                cluster_id: 0,
                is_core: true
            }
        );
    }

    #[test]
    fn step10_checks_offsets() {
        let params = DbscanParams::new(1.0, 2);
        let (mut state, _) = LocalClusters::step6(
            &TiledEngine::new(),
            0,
            &PointSet::new(array![[0.0], [0.5]]),
            &HaloSet::empty(1),
            &params,
        )
        .unwrap();
        assert!(state.step10(&step9(&[0])).is_err());
        assert!(state.step10(&step9(&[1])).is_ok());
    }
}
