//! # invoker
//!
//! why: capture a node's data folder under an operation uid
//! relations: uses cmd_spec.rs for the program, process.rs to run it; called by snap-cluster workers
//! what: SnapshotInvoker with a production (external program) and simulated (directory copy) path

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cmd_spec::CommandSpec;
use crate::error::ExecError;
use crate::process::{ProcessOutcome, ProcessRunner, WaitPolicy};
use crate::uid::OpUid;

/// Software version passed to snapshot programs as `version=<..>`
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether snapshots run a real external program or copy the folder locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    #[default]
    Production,
    Simulated,
}

/// Role of the process whose data folder is being captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Storage,
    TLog,
    Coordinator,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Storage => "storage",
            Self::TLog => "tlog",
            Self::Coordinator => "coord",
        };
        write!(f, "role={name}")
    }
}

/// Invoker timing and helper programs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    pub mode: ExecMode,
    /// wait bound for the snapshot program (and the simulated mkdir)
    pub snapshot_wait_secs: f64,
    pub poll_interval_secs: f64,
    /// wait bound for the simulated copy
    pub copy_wait_secs: f64,
    pub reap_grace_secs: f64,
    pub mkdir_bin: String,
    pub cp_bin: String,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            mode: ExecMode::Production,
            snapshot_wait_secs: 3.0,
            poll_interval_secs: 0.1,
            copy_wait_secs: 3.0,
            reap_grace_secs: 1.0,
            mkdir_bin: "mkdir".to_string(),
            cp_bin: "cp".to_string(),
        }
    }
}

impl InvokerConfig {
    pub fn simulated() -> Self {
        Self {
            mode: ExecMode::Simulated,
            ..Self::default()
        }
    }

    /// Reject durations that would not convert, or a poll interval that never advances
    pub fn validate(&self) -> Result<(), ExecError> {
        let positive = [("poll_interval_secs", self.poll_interval_secs)];
        let non_negative = [
            ("snapshot_wait_secs", self.snapshot_wait_secs),
            ("copy_wait_secs", self.copy_wait_secs),
            ("reap_grace_secs", self.reap_grace_secs),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ExecError::InvalidConfig { name, value });
            }
        }
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ExecError::InvalidConfig { name, value });
            }
        }
        Ok(())
    }
}

/// Location the simulated path copies `data_folder` into
pub fn snapshot_dir(data_folder: &Path, uid: OpUid) -> PathBuf {
    PathBuf::from(format!("{}-snap-{}", data_folder.display(), uid))
}

/// Runs snapshots of a local data folder
#[derive(Debug, Clone)]
pub struct SnapshotInvoker {
    config: InvokerConfig,
    runner: ProcessRunner,
}

impl SnapshotInvoker {
    /// `config` must have passed [`InvokerConfig::validate`]
    pub fn new(config: InvokerConfig) -> Self {
        let runner = ProcessRunner {
            poll_interval: Duration::from_secs_f64(config.poll_interval_secs),
            sync_timeout: Duration::from_secs_f64(config.copy_wait_secs),
            reap_grace: Duration::from_secs_f64(config.reap_grace_secs),
        };
        Self { config, runner }
    }

    /// Snapshot `data_folder` for `uid`
    ///
    /// Non-zero outcomes are returned as-is; there is no retry here.
    pub async fn snapshot(
        &self,
        spec: &CommandSpec,
        data_folder: &Path,
        role: NodeRole,
        uid: OpUid,
    ) -> ProcessOutcome {
        let outcome = match self.config.mode {
            ExecMode::Production => self.run_snapshot_program(spec, data_folder, role).await,
            ExecMode::Simulated => self.copy_data_folder(data_folder, uid).await,
        };
        if outcome.is_success() {
            info!(%uid, %role, folder = %data_folder.display(), "snapshot taken");
        } else {
            warn!(%uid, %role, folder = %data_folder.display(), code = outcome.exit_code, "snapshot failed");
        }
        outcome
    }

    async fn run_snapshot_program(
        &self,
        spec: &CommandSpec,
        data_folder: &Path,
        role: NodeRole,
    ) -> ProcessOutcome {
        let mut args = spec.arguments().to_vec();
        args.push(format!("path={}", data_folder.display()));
        args.push(format!("version={SOFTWARE_VERSION}"));
        args.push(role.to_string());

        let max_wait = Duration::from_secs_f64(self.config.snapshot_wait_secs);
        self.runner
            .run(spec.binary_path(), &args, WaitPolicy::BoundedAsync { max_wait })
            .await
    }

    async fn copy_data_folder(&self, data_folder: &Path, uid: OpUid) -> ProcessOutcome {
        let folder_to = snapshot_dir(data_folder, uid).display().to_string();
        let folder_from = data_folder.join(".").display().to_string();

        let max_wait = Duration::from_secs_f64(self.config.snapshot_wait_secs);
        let created = self
            .runner
            .run(
                &self.config.mkdir_bin,
                &[folder_to.clone()],
                WaitPolicy::BoundedAsync { max_wait },
            )
            .await;
        if !created.is_success() {
            return created;
        }

        let args = vec!["-a".to_string(), folder_from, folder_to];
        self.runner.run(&self.config.cp_bin, &args, WaitPolicy::BoundedSync).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_renders_as_argument() {
        assert_eq!(NodeRole::TLog.to_string(), "role=tlog");
        assert_eq!(NodeRole::Storage.to_string(), "role=storage");
    }

    #[test]
    fn snapshot_dir_appends_uid() {
        let uid: OpUid = "ba61e9612a561d60bd83ad83e1b63568".parse().unwrap();
        let dir = snapshot_dir(Path::new("/data/node1"), uid);
        assert_eq!(
            dir,
            PathBuf::from("/data/node1-snap-ba61e9612a561d60bd83ad83e1b63568")
        );
    }

    #[test]
    fn config_defaults() {
        let config = InvokerConfig::default();
        assert_eq!(config.mode, ExecMode::Production);
        assert_eq!(config.snapshot_wait_secs, 3.0);
        assert_eq!(InvokerConfig::simulated().mode, ExecMode::Simulated);
    }

    #[test]
    fn validate_rejects_bad_durations() {
        assert!(InvokerConfig::default().validate().is_ok());

        let config = InvokerConfig { copy_wait_secs: -1.0, ..InvokerConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ExecError::InvalidConfig { name: "copy_wait_secs", .. })
        ));

        let config = InvokerConfig { snapshot_wait_secs: f64::NAN, ..InvokerConfig::default() };
        assert!(config.validate().is_err());

        // a zero poll interval would never reach the deadline
        let config = InvokerConfig { poll_interval_secs: 0.0, ..InvokerConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ExecError::InvalidConfig { name: "poll_interval_secs", .. })
        ));
    }
}
