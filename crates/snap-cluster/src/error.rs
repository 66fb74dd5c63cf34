//! # error
//!
//! why: let clients tell protocol rejections apart from conflicts they should retry
//! relations: returned by worker.rs, coordinator.rs, verify.rs and workload.rs
//! what: SnapError enum

use snap_core::{ExecError, OpUid};
use snap_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapError {
    /// binary is not on the operator whitelist
    #[error("operation not permitted: {0:?} is not a whitelisted binary")]
    NotPermitted(String),

    /// pop was not disabled, or was disabled under another uid
    #[error("protocol violation for snapshot {uid}: {reason}")]
    ProtocolViolation { uid: OpUid, reason: &'static str },

    #[error("snapshot {uid} exited with code {code}")]
    ExecFailed { uid: OpUid, code: i32 },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl SnapError {
    /// Worth retrying with a fresh uid or a fresh transaction
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::ExecFailed { .. } => true,
            _ => false,
        }
    }

    /// Never retried: the uid is finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotPermitted(_) | Self::ProtocolViolation { .. })
    }
}
