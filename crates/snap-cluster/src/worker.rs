//! # worker
//!
//! why: one node process, owning its registries instead of sharing process-wide maps
//! relations: driven by coordinator.rs, hosts tlog.rs servers, runs snap-core invoker
//! what: Worker context, pop-disable/enable and snapshot-create command handling

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use snap_core::{CommandSpec, NodeRegistry, NodeRole, OpUid, SnapshotInvoker, TLogId};
use snap_storage::KeyValueStore;
use tracing::{debug, info, instrument};

use crate::config::ClusterConfig;
use crate::error::SnapError;
use crate::retry::retry_retryable;
use crate::tlog::{failure_marker_key, Admission, TLogServer};
use crate::whitelist::Whitelist;

/// A node process and the roles it hosts
pub struct Worker {
    registry: NodeRegistry,
    invoker: SnapshotInvoker,
    whitelist: Whitelist,
    /// store receiving durable failure markers
    markers: Arc<dyn KeyValueStore>,
    data_folder: PathBuf,
    storage: bool,
    coordinator_folder: Option<PathBuf>,
    tlogs: RwLock<Vec<Arc<TLogServer>>>,
    pop_disable_timeout: Duration,
    marker_retries: u32,
    retry_backoff: Duration,
}

impl Worker {
    pub fn new(
        address: SocketAddr,
        data_folder: impl Into<PathBuf>,
        config: &ClusterConfig,
        markers: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            registry: NodeRegistry::new(address),
            invoker: SnapshotInvoker::new(config.invoker.clone()),
            whitelist: Whitelist::new(config.whitelist.iter().cloned()),
            markers,
            data_folder: data_folder.into(),
            storage: false,
            coordinator_folder: None,
            tlogs: RwLock::new(Vec::new()),
            pop_disable_timeout: config.pop_disable_timeout(),
            marker_retries: config.max_snap_retries.max(1),
            retry_backoff: config.retry_backoff(),
        }
    }

    pub fn with_storage(mut self) -> Self {
        self.storage = true;
        self
    }

    pub fn with_coordinator(mut self, folder: impl Into<PathBuf>) -> Self {
        self.coordinator_folder = Some(folder.into());
        self
    }

    pub fn address(&self) -> SocketAddr {
        self.registry.address()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    pub fn is_storage(&self) -> bool {
        self.storage
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator_folder.is_some()
    }

    pub fn has_local_log_server(&self) -> bool {
        self.registry.has_local_log_server()
    }

    /// Start a log server in this process
    pub fn start_tlog(&self) -> Arc<TLogServer> {
        let tlog = TLogServer::new(TLogId::random(), self.pop_disable_timeout);
        self.registry.register_log_server(tlog.id());
        self.tlogs.write().push(tlog.clone());
        info!(address = %self.address(), tlog = %tlog.id(), "log server started");
        tlog
    }

    /// Stop a log server; requests still holding it go unanswered
    pub fn stop_tlog(&self, id: TLogId) {
        self.tlogs.write().retain(|t| {
            if t.id() == id {
                t.halt();
            }
            t.id() != id
        });
        self.registry.unregister_log_server(id);
        info!(address = %self.address(), tlog = %id, "log server stopped");
    }

    pub fn tlogs(&self) -> Vec<Arc<TLogServer>> {
        self.tlogs.read().clone()
    }

    /// Handle a disable-log-pop command; the binary in the payload is ignored
    pub async fn disable_pop(&self, payload: &str) -> Result<(), SnapError> {
        let uid = CommandSpec::parse(payload).uid()?;
        for tlog in self.tlogs() {
            tlog.disable_pop(uid);
        }
        Ok(())
    }

    /// Handle an enable-log-pop command
    pub async fn enable_pop(&self, payload: &str) -> Result<(), SnapError> {
        let uid = CommandSpec::parse(payload).uid()?;
        for tlog in self.tlogs() {
            tlog.enable_pop(uid)?;
        }
        Ok(())
    }

    /// Handle a snapshot-create command for one of this process's roles
    #[instrument(skip(self), fields(address = %self.address()))]
    pub async fn snapshot(&self, payload: &str, role: NodeRole) -> Result<(), SnapError> {
        let spec = CommandSpec::parse(payload);
        spec.debug_trace();
        self.whitelist.check(spec.binary_path())?;
        let uid = spec.uid()?;

        let folder = match role {
            NodeRole::Storage if !self.storage => return Ok(()),
            // the log server snapshot captures the shared data folder
            NodeRole::Storage if self.has_local_log_server() => {
                debug!(%uid, "storage snapshot skipped, log server co-located");
                return Ok(());
            }
            NodeRole::Storage => self.data_folder.clone(),
            NodeRole::TLog if !self.has_local_log_server() => return Ok(()),
            NodeRole::TLog => self.data_folder.clone(),
            NodeRole::Coordinator => match &self.coordinator_folder {
                Some(folder) => folder.clone(),
                None => return Ok(()),
            },
        };

        let Some(_in_progress) = self.registry.try_begin(uid) else {
            return Ok(());
        };

        let local = if role == NodeRole::TLog { self.tlogs() } else { Vec::new() };
        let checked = local.len();
        let mut tlogs = Vec::with_capacity(checked);
        for tlog in local {
            match tlog.check_snapshot(uid) {
                Ok(Admission::Run) => tlogs.push(tlog),
                Ok(Admission::AlreadyAccepted) => {}
                Ok(Admission::AlreadyFailed) => {
                    return Err(SnapError::ProtocolViolation {
                        uid,
                        reason: "snapshot already failed for this uid",
                    });
                }
                Err(e) => {
                    self.write_failure_marker(uid, &e).await?;
                    return Err(e);
                }
            }
        }
        if checked > 0 && tlogs.is_empty() {
            debug!(%uid, "snapshot already accepted, acknowledging retry");
            return Ok(());
        }

        let outcome = self.invoker.snapshot(&spec, &folder, role, uid).await;
        if !outcome.is_success() {
            tlogs.iter().for_each(|t| t.snapshot_failed(uid));
            return Err(SnapError::ExecFailed {
                uid,
                code: outcome.exit_code,
            });
        }
        tlogs.iter().for_each(|t| t.snapshot_accepted(uid));
        Ok(())
    }

    async fn write_failure_marker(&self, uid: OpUid, cause: &SnapError) -> Result<(), SnapError> {
        let key = failure_marker_key(uid);
        let value = cause.to_string();
        retry_retryable(self.marker_retries, self.retry_backoff, || async {
            self.markers.set(&key, &value).await.map_err(SnapError::from)
        })
        .await?;
        info!(%key, "failure marker written");
        Ok(())
    }
}
