//! # coordinator
//!
//! why: sequence pop-disable and snapshot-create across every worker so the snapshots line up
//! relations: drives worker.rs commands; used by workload.rs and the snaptest binary
//! what: SnapshotClient (snap_create, bounded-retry wrapper, raw command senders)

use std::sync::Arc;
use std::time::Duration;

use snap_core::{NodeRole, OpUid};
use tracing::{info, warn};

use crate::config::ClusterConfig;
use crate::error::SnapError;
use crate::whitelist::Whitelist;
use crate::worker::Worker;

/// Payload carrying `uid` for `binary`
pub fn snap_payload(binary: &str, uid: OpUid) -> String {
    format!("{binary}:uid={uid}")
}

/// Client side of the cluster snapshot protocol
pub struct SnapshotClient {
    workers: Vec<Arc<Worker>>,
    whitelist: Whitelist,
    max_retries: u32,
    retry_backoff: Duration,
}

impl SnapshotClient {
    pub fn new(workers: Vec<Arc<Worker>>, config: &ClusterConfig) -> Self {
        Self {
            workers,
            whitelist: Whitelist::new(config.whitelist.iter().cloned()),
            max_retries: config.max_snap_retries,
            retry_backoff: config.retry_backoff(),
        }
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    fn tlog_workers(&self) -> impl Iterator<Item = &Arc<Worker>> {
        self.workers.iter().filter(|w| w.has_local_log_server())
    }

    /// Take one consistent snapshot of the whole cluster under `uid`
    ///
    /// Order: disable pop on log servers, snapshot storage, snapshot log
    /// servers, re-enable pop, snapshot coordinators. Pop is re-enabled
    /// even when a step fails.
    pub async fn snap_create(&self, binary: &str, uid: OpUid) -> Result<(), SnapError> {
        self.whitelist.check(binary)?;
        let payload = snap_payload(binary, uid);
        info!(%uid, %binary, "snapshot create started");

        let result = self.snapshot_data(&payload).await;
        let enabled = self.send_enable_pop(&payload).await;
        result?;
        enabled?;

        self.send_snapshot(&payload, NodeRole::Coordinator).await?;
        info!(%uid, "snapshot create succeeded");
        Ok(())
    }

    async fn snapshot_data(&self, payload: &str) -> Result<(), SnapError> {
        self.send_disable_pop(payload).await?;
        self.send_snapshot(payload, NodeRole::Storage).await?;
        self.send_snapshot(payload, NodeRole::TLog).await
    }

    /// `snap_create` with a fresh uid per attempt
    ///
    /// Protocol violations and non-whitelisted binaries end the loop at
    /// once; anything else is retried up to the configured bound.
    pub async fn snap_create_with_retry(&self, binary: &str) -> Result<OpUid, SnapError> {
        let mut retry = 0;
        loop {
            let uid = OpUid::random();
            match self.snap_create(binary, uid).await {
                Ok(()) => return Ok(uid),
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    retry += 1;
                    if retry > self.max_retries {
                        warn!(%uid, error = %e, retry, "SnapCreateCommandFailed");
                        return Err(SnapError::OperationFailed(format!(
                            "snapshot create failed after {retry} attempts: {e}"
                        )));
                    }
                    info!(%uid, error = %e, retry, "SnapCreateCommandFailed");
                    tokio::time::sleep(self.retry_backoff).await;
                }
            }
        }
    }

    /// Send a raw disable-log-pop command to every worker hosting a log server
    pub async fn send_disable_pop(&self, payload: &str) -> Result<(), SnapError> {
        for worker in self.tlog_workers() {
            worker.disable_pop(payload).await?;
        }
        Ok(())
    }

    /// Send a raw enable-log-pop command to every worker hosting a log server
    pub async fn send_enable_pop(&self, payload: &str) -> Result<(), SnapError> {
        let mut first_err = None;
        for worker in self.tlog_workers() {
            if let Err(e) = worker.enable_pop(payload).await {
                warn!(address = %worker.address(), error = %e, "enable pop failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Send a raw snapshot-create command for `role` to every worker hosting that role
    pub async fn send_snapshot(&self, payload: &str, role: NodeRole) -> Result<(), SnapError> {
        let hosts = |w: &Worker| match role {
            NodeRole::Storage => w.is_storage(),
            NodeRole::TLog => w.has_local_log_server(),
            NodeRole::Coordinator => w.is_coordinator(),
        };
        for worker in self.workers.iter().filter(|w| hosts(w)) {
            worker.snapshot(payload, role).await?;
        }
        Ok(())
    }
}
