//! # local
//!
//! why: stand up a whole cluster in one process so the protocol runs without real machines
//! relations: builds worker.rs nodes and a coordinator.rs client over snap-storage FileStores
//! what: LocalCluster

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snap_core::invoker::snapshot_dir;
use snap_core::OpUid;
use snap_storage::{FileStore, KeyValueStore, StoreError};
use tracing::info;

use crate::config::ClusterConfig;
use crate::coordinator::SnapshotClient;
use crate::error::SnapError;
use crate::worker::Worker;

const BASE_PORT: u16 = 4500;

/// Workers, client and stores of an in-process cluster
///
/// Worker 0 hosts a log server, storage and the coordinator. Every other
/// worker is storage only. User data lives with the first storage-only
/// worker when there is one.
pub struct LocalCluster {
    pub workers: Vec<Arc<Worker>>,
    pub client: Arc<SnapshotClient>,
    pub db: Arc<FileStore>,
    pub markers: Arc<FileStore>,
}

impl LocalCluster {
    pub fn build(root: &Path, worker_count: usize, config: &ClusterConfig) -> Result<Self, SnapError> {
        config.validate()?;
        let worker_count = worker_count.max(1);
        let markers = Arc::new(FileStore::new(root.join("system"))?);

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let folder = root.join(format!("worker-{i}"));
            fs::create_dir_all(&folder).map_err(StoreError::from)?;
            let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), BASE_PORT + i as u16);
            let marker_store: Arc<dyn KeyValueStore> = markers.clone();
            let mut worker = Worker::new(address, folder, config, marker_store).with_storage();
            if i == 0 {
                let coord = root.join("coord-0");
                fs::create_dir_all(&coord).map_err(StoreError::from)?;
                worker = worker.with_coordinator(coord);
            }
            let worker = Arc::new(worker);
            if i == 0 {
                worker.start_tlog();
            }
            workers.push(worker);
        }

        let db_index = usize::from(worker_count > 1);
        let db = Arc::new(FileStore::new(workers[db_index].data_folder())?);
        let client = Arc::new(SnapshotClient::new(workers.clone(), config));
        info!(root = %root.display(), workers = worker_count, "local cluster ready");

        Ok(Self {
            workers,
            client,
            db,
            markers,
        })
    }

    /// Open the copy of the user data taken by snapshot `uid`
    pub fn restored_db(&self, uid: OpUid) -> Result<FileStore, SnapError> {
        let dir: PathBuf = snapshot_dir(self.db.dir(), uid);
        if !dir.is_dir() {
            return Err(SnapError::OperationFailed(format!(
                "no snapshot directory {}",
                dir.display()
            )));
        }
        Ok(FileStore::new(dir)?)
    }
}
