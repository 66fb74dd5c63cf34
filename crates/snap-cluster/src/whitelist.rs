//! # whitelist
//!
//! why: only operator-approved programs may ever be run as snapshot scripts
//! relations: checked by coordinator.rs before any pop change and by worker.rs before invocation
//! what: Whitelist

use std::collections::HashSet;

use tracing::warn;

use crate::error::SnapError;

/// Operator-approved snapshot binaries; an empty whitelist approves nothing
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    paths: HashSet<String>,
}

impl Whitelist {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_permitted(&self, binary_path: &str) -> bool {
        self.paths.contains(binary_path)
    }

    pub fn check(&self, binary_path: &str) -> Result<(), SnapError> {
        if self.is_permitted(binary_path) {
            return Ok(());
        }
        warn!(binary = %binary_path, "snapshot binary not whitelisted");
        Err(SnapError::NotPermitted(binary_path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_listed_paths_pass() {
        let list = Whitelist::new(["/bin/snap_create.sh"]);
        assert!(list.check("/bin/snap_create.sh").is_ok());
        assert!(matches!(
            list.check("/bin/snap_create1.sh"),
            Err(SnapError::NotPermitted(_))
        ));
    }

    #[test]
    fn empty_list_permits_nothing() {
        assert!(!Whitelist::default().is_permitted("/bin/snap_create.sh"));
    }
}
