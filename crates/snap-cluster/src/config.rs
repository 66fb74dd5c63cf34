//! # config
//!
//! why: one place for protocol timings, retry bounds and the binary whitelist
//! relations: consumed by worker.rs, coordinator.rs, workload.rs and the snaptest binary
//! what: ClusterConfig, SnapTestConfig, RunConfig (TOML file)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snap_core::InvokerConfig;

use crate::error::SnapError;

/// Protocol configuration shared by every node and the snapshot client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// binaries a snapshot-create may name
    pub whitelist: Vec<String>,
    /// pop is re-enabled by itself after this long without a matching snapshot
    pub pop_disable_timeout_secs: f64,
    pub max_snap_retries: u32,
    pub retry_backoff_ms: u64,
    /// bound on each log server reply during verification
    pub tlog_reply_timeout_secs: f64,
    pub invoker: InvokerConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            whitelist: vec!["/bin/snap_create.sh".to_string()],
            pop_disable_timeout_secs: 300.0,
            max_snap_retries: 3,
            retry_backoff_ms: 100,
            tlog_reply_timeout_secs: 3.0,
            invoker: InvokerConfig::default(),
        }
    }
}

impl ClusterConfig {
    pub fn pop_disable_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.pop_disable_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn tlog_reply_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.tlog_reply_timeout_secs)
    }

    /// Reject timings that cannot become durations
    pub fn validate(&self) -> Result<(), SnapError> {
        non_negative("pop_disable_timeout_secs", self.pop_disable_timeout_secs)?;
        non_negative("tlog_reply_timeout_secs", self.tlog_reply_timeout_secs)?;
        self.invoker
            .validate()
            .map_err(|e| SnapError::OperationFailed(format!("bad invoker config: {e}")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), SnapError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SnapError::OperationFailed(format!("invalid {name}: {value}")))
    }
}

/// Options of the snapshot verification workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapTestConfig {
    pub num_snaps: u32,
    /// upper bound on the random delay before case 1 snapshots
    pub max_snap_delay: f64,
    pub snap_check: bool,
    pub test_id: u32,
    pub restart_info_location: PathBuf,
    pub snap_binary: String,
    /// binary used by case 8, expected to be off the whitelist
    pub forbidden_binary: String,
    pub key_prefix: String,
    pub keys_per_batch: usize,
}

impl Default for SnapTestConfig {
    fn default() -> Self {
        Self {
            num_snaps: 0,
            max_snap_delay: 25.0,
            snap_check: false,
            test_id: 0,
            restart_info_location: PathBuf::from("simfdb/restartInfo.ini"),
            snap_binary: "/bin/snap_create.sh".to_string(),
            forbidden_binary: "/bin/snap_create1.sh".to_string(),
            key_prefix: "snapKey".to_string(),
            keys_per_batch: 1000,
        }
    }
}

impl SnapTestConfig {
    pub fn validate(&self) -> Result<(), SnapError> {
        non_negative("max_snap_delay", self.max_snap_delay)
    }
}

/// Contents of a snaptest run file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub cluster: ClusterConfig,
    pub workload: SnapTestConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, SnapError> {
        let text = fs::read_to_string(path).map_err(snap_storage::StoreError::from)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| SnapError::OperationFailed(format!("bad config {}: {e}", path.display())))?;
        config.cluster.validate()?;
        config.workload.validate()?;
        Ok(config)
    }
}
