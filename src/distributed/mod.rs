//! Block-distributed DBSCAN.
//!
//! The data lives in blocks that only exchange messages. A run has thirteen
//! steps:
//!
//! | step | role   | what happens |
//! |------|--------|--------------|
//! | 1    | block  | tag every row with its original `(block, index)` |
//! | 2    | block  | bounding box, row count and a sample of rows |
//! | 3    | master | pick the feature and threshold splitting a group of blocks |
//! | 4    | block  | deal rows into the group's left and right buckets |
//! | 5    | block  | copy rows within epsilon of another block's box to that block |
//! | 6    | block  | cluster own rows against own + halo rows, link across halos |
//! | 7    | master | AND of all finished flags |
//! | 8    | block  | apply links, forward lowered names |
//! | 9    | master | prefix sums of per-block cluster counts |
//! | 10   | block  | assign global ids, request the ones owned elsewhere |
//! | 11   | block  | answer and record id requests |
//! | 12   | block  | send every row's label to its original block |
//! | 13   | block  | rebuild labels in original row order |
//!
//! Steps 2 to 4 repeat on each half of the blocks until every group is a single
//! block. Steps 7 and 8 loop until no block has anything to send, and so do
//! steps 7 and 11.
//!
//! Every value that crosses blocks ([`Query`], [`BlockSummary`], [`Split`],
//! [`BlockData`], [`HaloData`], [`ClusterOffsets`]) is serde-serializable, so
//! the step functions can run behind any transport. [`DistributedDbscan`]
//! drives them in process.

mod driver;
pub mod halo;
pub mod local;
pub mod master;
pub mod partition;
pub mod query;

pub use driver::{DistributedDbscan, DistributedResult};
pub use halo::{step5, HaloData, HaloSet, PointId};
pub use local::{LocalClusters, StepOutput};
pub use master::{step13, step3, step7, step9, BlockAssignments, ClusterOffsets};
pub use partition::{step1, step2, step4, BlockData, BlockSummary, BoundingBox, PartialOrder, Split};
pub use query::{normalize, route, ClusterName, Query, QueryPayload};
