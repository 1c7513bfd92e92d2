//! DBSCAN with a tiled neighborhood engine and a block-distributed protocol.
//!
//! `halo-dbscan` clusters dense `f32`/`f64` observations by density.
//!
//! - [`cluster::Dbscan`] runs on a single node, with cached neighborhoods or in
//!   memory-saving mode.
//! - [`distributed`] splits the work into blocks that exchange halos and
//!   cluster-merge queries, and produces the same partition of core points.
//! - [`neighbors`] holds the epsilon-neighborhood engine both share: squared
//!   distances from one matrix product per tile pair.
//!
//! Labels are `i32`: cluster ids from 0, [`NOISE`] for outliers.

#![forbid(unsafe_code)]

pub mod cluster;
pub mod containers;
pub mod distributed;
pub mod error;
pub mod neighbors;
pub mod params;
pub mod points;

pub use cluster::{Clustering, Dbscan, DbscanExt, DbscanResult, NOISE, UNDEFINED};
pub use distributed::{DistributedDbscan, DistributedResult};
pub use error::{Error, Result};
pub use neighbors::{NeighborhoodEngine, SearchSet, TiledEngine};
pub use params::{DbscanParams, ResultsToCompute};
pub use points::{PointSet, Real};
