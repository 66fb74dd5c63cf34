//! # uid
//!
//! why: correlate a pop-disable command with its matching snapshot-create command
//! relations: carried in command spec payloads, keys failure markers and registries
//! what: OpUid newtype over a 128-bit uuid rendered as 32 hex characters

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecError;

/// Operation UID shared by every step of one cluster snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpUid(Uuid);

impl OpUid {
    /// Generate a fresh random uid
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OpUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for OpUid {
    type Err = ExecError;

    /// Accepts exactly the 32-hex-character form produced by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ExecError::InvalidUid(s.to_string()));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ExecError::InvalidUid(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_32_lowercase_hex() {
        let uid: OpUid = "A36B2CA0E8DAB0452AC3E12B6B926F4B".parse().unwrap();
        assert_eq!(uid.to_string(), "a36b2ca0e8dab0452ac3e12b6b926f4b");
    }

    #[test]
    fn hyphenated_form_is_rejected() {
        let res = "a36b2ca0-e8da-b045-2ac3-e12b6b926f4b".parse::<OpUid>();
        assert!(res.is_err());
    }

    #[test]
    fn random_uids_differ() {
        assert_ne!(OpUid::random(), OpUid::random());
    }
}
