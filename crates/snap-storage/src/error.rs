//! # error
//!
//! why: separate retryable transaction conflicts from hard storage failures
//! relations: returned by every KeyValueStore implementation and restart_info.rs
//! what: StoreError enum

use std::io;

use thiserror::Error;

/// Errors from the key-value store and restart metadata file
#[derive(Debug, Error)]
pub enum StoreError {
    /// concurrent writer won; the caller may retry the transaction
    #[error("transaction conflict")]
    Conflict,

    #[error("storage io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
