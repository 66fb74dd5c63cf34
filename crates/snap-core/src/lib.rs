//! # snap-core
//!
//! why: run operator-approved snapshot programs against a node's data folder
//! relations: used by snap-cluster for protocol handling, snap-storage for uid types
//! what: command spec parsing, bounded process execution, snapshot invoker, node-local registries

pub mod cmd_spec;
pub mod error;
pub mod invoker;
pub mod process;
pub mod registry;
pub mod uid;

pub use cmd_spec::CommandSpec;
pub use error::ExecError;
pub use invoker::{ExecMode, InvokerConfig, NodeRole, SnapshotInvoker};
pub use process::{ProcessOutcome, ProcessRunner, WaitPolicy, FORCED_TERMINATION};
pub use registry::{InProgressGuard, NodeRegistry, TLogId};
pub use uid::OpUid;
