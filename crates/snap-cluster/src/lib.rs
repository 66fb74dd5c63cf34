//! # snap-cluster
//!
//! why: coordinate pop-disable and snapshot-create across nodes so snapshots form a consistent set
//! relations: uses snap-core to run snapshots, snap-storage for markers and workload data
//! what: log server pop state, worker context, snapshot client, verification, SnapTest workload

pub mod config;
pub mod coordinator;
pub mod error;
pub mod local;
pub mod retry;
pub mod tlog;
pub mod verify;
pub mod whitelist;
pub mod worker;
pub mod workload;

pub use config::{ClusterConfig, RunConfig, SnapTestConfig};
pub use coordinator::{snap_payload, SnapshotClient};
pub use error::SnapError;
pub use local::LocalCluster;
pub use tlog::{failure_marker_key, Admission, SnapPhase, TLogServer};
pub use whitelist::Whitelist;
pub use worker::Worker;
pub use workload::{SnapTestCase, SnapTestWorkload};
