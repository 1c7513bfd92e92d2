//! Density-based clustering on a single node.
//!
//! ## DBSCAN
//!
//! Density-based clustering that discovers non-convex clusters and identifies
//! outliers (noise points) without being told the number of clusters. See
//! [`Dbscan`] for the algorithm and its two neighborhood modes.
//!
//! The expansion itself lives in a kernel that the distributed pipeline reuses
//! for every block, against the block's points extended with its halo.
//!
//! ## Usage
//!
//! ```rust
//! use halo_dbscan::cluster::{Clustering, Dbscan};
//! use halo_dbscan::{PointSet, NOISE};
//!
//! let data = PointSet::from_rows(&[
//!     vec![0.0, 0.0],
//!     vec![0.1, 0.1],
//!     vec![10.0, 10.0],
//!     vec![10.1, 10.1],
//!     vec![50.0, 50.0],
//! ])
//! .unwrap();
//!
//! let labels = Dbscan::new(0.5, 2).fit_predict(&data).unwrap();
//! assert_eq!(labels[0], labels[1]);
//! assert_ne!(labels[0], labels[2]);
//! assert_eq!(labels[4], NOISE);
//! ```

mod dbscan;
pub(crate) mod kernel;
mod traits;
pub(crate) mod util;

pub use dbscan::{Dbscan, DbscanResult};
pub use kernel::{ClusterStructure, PointState, NOISE, UNDEFINED};
pub use traits::{Clustering, DbscanExt};
