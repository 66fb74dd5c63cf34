//! # error
//!
//! why: typed failures for the few node-local operations that can fail outright
//! relations: returned by uid.rs parsing and invoker.rs setup
//! what: ExecError enum

use thiserror::Error;

/// Errors raised by snap-core
#[derive(Debug, Error)]
pub enum ExecError {
    /// uid text was not 32 hex characters
    #[error("invalid operation uid {0:?}")]
    InvalidUid(String),

    /// the command spec did not carry a `uid=` argument
    #[error("command spec {0:?} has no uid argument")]
    MissingUid(String),

    /// a configured duration was negative, zero where it must advance, or not a number
    #[error("invalid {name}: {value}")]
    InvalidConfig { name: &'static str, value: f64 },
}
