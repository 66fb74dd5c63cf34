//! # cmd_spec
//!
//! why: decode the compact `path[:arg0[,arg1...]]` string that names a snapshot program
//! relations: used by invoker.rs for the production path, by snap-cluster for payload uids
//! what: CommandSpec with ordered arguments and a first-wins key/value lookup

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::ExecError;
use crate::uid::OpUid;

/// A parsed command specification
///
/// Arguments keep their insertion order and may repeat. The lookup keeps
/// the first value seen for each key; later duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    cmd_value: String,
    binary_path: String,
    args: Vec<String>,
    lookup: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Parse a command specification string
    pub fn parse(cmd_value: impl Into<String>) -> Self {
        let mut spec = Self::default();
        spec.set_cmd_value_string(cmd_value);
        spec
    }

    /// Replace the current contents with a fresh parse of `cmd_value`
    ///
    /// Nothing from the previous parse survives.
    pub fn set_cmd_value_string(&mut self, cmd_value: impl Into<String>) {
        self.binary_path.clear();
        self.args.clear();
        self.lookup.clear();
        self.cmd_value = cmd_value.into();
        self.parse_cmd_value();
    }

    fn parse_cmd_value(&mut self) {
        let (binary_path, rest) = match self.cmd_value.split_once(':') {
            Some((path, rest)) => (path.to_string(), rest.to_string()),
            None => (self.cmd_value.clone(), String::new()),
        };
        self.binary_path = binary_path;

        if rest.is_empty() {
            return;
        }

        for token in rest.split(',') {
            self.args.push(token.to_string());
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            self.insert_if_absent(key, value);
        }
    }

    fn insert_if_absent(&mut self, key: &str, value: &str) {
        if self.lookup.contains_key(key) {
            return;
        }
        self.lookup.insert(key.to_string(), value.to_string());
    }

    /// The unparsed input string
    pub fn cmd_value_string(&self) -> &str {
        &self.cmd_value
    }

    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }

    /// Raw argument tokens in the order they appeared
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Value of the first `key=value` argument with this key
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.lookup.get(key).map(String::as_str)
    }

    /// The `uid=` argument decoded as an operation uid
    pub fn uid(&self) -> Result<OpUid, ExecError> {
        self.value_of("uid")
            .ok_or_else(|| ExecError::MissingUid(self.cmd_value.clone()))?
            .parse()
    }

    /// Emit the parsed fields as a single structured event
    pub fn debug_trace(&self) {
        debug!(
            cmd_value = %self.cmd_value,
            binary_path = %self.binary_path,
            args = ?self.args,
            "ExecCmdValueString"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_path_and_key_value_args() {
        let spec = CommandSpec::parse("/bin/snap.sh:k1=v1,k2=v2");
        assert_eq!(spec.binary_path(), "/bin/snap.sh");
        assert_eq!(spec.arguments(), ["k1=v1", "k2=v2"]);
        assert_eq!(spec.value_of("k1"), Some("v1"));
        assert_eq!(spec.value_of("k2"), Some("v2"));
        assert_eq!(spec.value_of("k3"), None);
    }

    #[test]
    fn duplicate_key_keeps_first_value() {
        let spec = CommandSpec::parse("p:k=v1,k=v2");
        assert_eq!(spec.value_of("k"), Some("v1"));
        assert_eq!(spec.arguments(), ["k=v1", "k=v2"]);
    }

    #[test]
    fn reparse_discards_previous_state() {
        let mut spec = CommandSpec::parse("p:a=1,b=2");
        spec.set_cmd_value_string("/usr/bin/other");
        assert_eq!(spec.binary_path(), "/usr/bin/other");
        assert!(spec.arguments().is_empty());
        assert_eq!(spec.value_of("a"), None);
        assert_eq!(spec.cmd_value_string(), "/usr/bin/other");
    }

    #[test]
    fn extracts_uid() {
        let spec = CommandSpec::parse("empty-binary:uid=a36b2ca0e8dab0452ac3e12b6b926f4b");
        assert_eq!(
            spec.uid().unwrap().to_string(),
            "a36b2ca0e8dab0452ac3e12b6b926f4b"
        );
    }
}
