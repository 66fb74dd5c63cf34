//! # workload
//!
//! why: exercise the snapshot protocol end to end, one numbered case per phase
//! relations: drives coordinator.rs, checks with verify.rs, writes snap-storage restart info
//! what: SnapTestCase, SnapTestWorkload (start + check)

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use snap_core::{NodeRole, OpUid};
use snap_storage::restart_info::save_restore_uid;
use snap_storage::KeyValueStore;
use tracing::{error, info};

use crate::config::SnapTestConfig;
use crate::coordinator::{snap_payload, SnapshotClient};
use crate::error::SnapError;
use crate::retry::retry_retryable;
use crate::tlog::{SNAP_FAIL_POP_NOT_SET, SNAP_FAIL_UID_MISMATCH};
use crate::verify::{check_snapshot_keys, failure_marker_present, verify_tlog_track_latest};

const AUTO_ENABLE_UID: &str = "a36b2ca0e8dab0452ac3e12b6b926f4b";
const POP_NOT_SET_UID: &str = "d78b08d47f341158e9a54d4baaf4a4dd";
const MISMATCH_DISABLE_UID: &str = "f49d27ddf7a28b6549d930743e0ebdbe";
const MISMATCH_SNAP_UID: &str = "ba61e9612a561d60bd83ad83e1b63568";

const COMMIT_ATTEMPTS: u32 = 10;
const COMMIT_BACKOFF: Duration = Duration::from_millis(50);

/// Numbered workload phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapTestCase {
    /// write even-id keys before the snapshot
    CreateEvenKeys,
    /// take the snapshot and record its uid for restore
    Snapshot,
    /// write odd-id keys after the snapshot
    CreateOddKeys,
    /// on the restored data, only the even keys may exist
    VerifyKeys,
    /// disable pop and walk away
    AbandonPopDisable,
    /// snapshot without disabling pop first
    SnapWithoutPopDisable,
    /// disable pop under one uid, snapshot under another
    MismatchedUids,
    /// snapshot naming a binary off the whitelist
    NonWhitelistedBinary,
}

impl TryFrom<u32> for SnapTestCase {
    type Error = SnapError;

    fn try_from(test_id: u32) -> Result<Self, Self::Error> {
        Ok(match test_id {
            0 => Self::CreateEvenKeys,
            1 => Self::Snapshot,
            2 => Self::CreateOddKeys,
            3 => Self::VerifyKeys,
            4 => Self::AbandonPopDisable,
            6 => Self::SnapWithoutPopDisable,
            7 => Self::MismatchedUids,
            8 => Self::NonWhitelistedBinary,
            other => return Err(SnapError::OperationFailed(format!("unknown snap test id {other}"))),
        })
    }
}

pub struct SnapTestWorkload {
    config: SnapTestConfig,
    client_id: u32,
    client: Arc<SnapshotClient>,
    /// user data written and verified by the key cases
    db: Arc<dyn KeyValueStore>,
    /// store holding failure markers
    markers: Arc<dyn KeyValueStore>,
    tlog_reply_timeout: Duration,
    snap_uid: Option<OpUid>,
}

impl SnapTestWorkload {
    pub fn new(
        config: SnapTestConfig,
        client: Arc<SnapshotClient>,
        db: Arc<dyn KeyValueStore>,
        markers: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            config,
            client_id: 0,
            client,
            db,
            markers,
            tlog_reply_timeout: Duration::from_secs(3),
            snap_uid: None,
        }
    }

    pub fn with_client_id(mut self, client_id: u32) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_tlog_reply_timeout(mut self, timeout: Duration) -> Self {
        self.tlog_reply_timeout = timeout;
        self
    }

    /// Uid of the snapshot this workload took
    pub fn snap_uid(&self) -> Option<OpUid> {
        self.snap_uid
    }

    /// Run the configured case; only client 0 does any work
    pub async fn start(&mut self) -> Result<(), SnapError> {
        info!(test_id = self.config.test_id, client_id = self.client_id, "SnapTestWorkloadStart");
        if self.client_id != 0 {
            return Ok(());
        }
        match SnapTestCase::try_from(self.config.test_id)? {
            SnapTestCase::CreateEvenKeys => self.create_keys(true).await,
            SnapTestCase::Snapshot => self.take_snapshots().await,
            SnapTestCase::CreateOddKeys => self.create_keys(false).await,
            SnapTestCase::VerifyKeys => self.verify_keys().await,
            SnapTestCase::AbandonPopDisable => {
                let payload = format!("empty-binary:uid={AUTO_ENABLE_UID}");
                self.commit_with_retry(|| self.client.send_disable_pop(&payload)).await
            }
            SnapTestCase::SnapWithoutPopDisable => {
                let uid: OpUid = POP_NOT_SET_UID.parse()?;
                self.expect_rejected_snapshot(uid).await
            }
            SnapTestCase::MismatchedUids => {
                let payload = format!("empty-binary:uid={MISMATCH_DISABLE_UID}");
                self.commit_with_retry(|| self.client.send_disable_pop(&payload)).await?;
                let uid: OpUid = MISMATCH_SNAP_UID.parse()?;
                self.expect_rejected_snapshot(uid).await
            }
            SnapTestCase::NonWhitelistedBinary => self.expect_not_permitted().await,
        }
    }

    /// Confirm the case left the cluster in the state it should have
    pub async fn check(&self) -> bool {
        info!(client_id = self.client_id, snap_check = self.config.snap_check, "SnapTestWorkloadCheck");
        if !self.config.snap_check || self.client_id != 0 {
            return true;
        }
        match self.config.test_id {
            // restore and quiet-database checks cover these
            0..=4 => true,
            6 => self.check_rejection(POP_NOT_SET_UID, SNAP_FAIL_POP_NOT_SET).await,
            7 => self.check_rejection(MISMATCH_SNAP_UID, SNAP_FAIL_UID_MISMATCH).await,
            _ => {
                error!(test_id = self.config.test_id, "InvalidPathCheckOptions");
                false
            }
        }
    }

    async fn check_rejection(&self, uid: &str, token: &str) -> bool {
        let Ok(uid) = uid.parse::<OpUid>() else {
            return false;
        };
        let marked = matches!(failure_marker_present(self.markers.as_ref(), uid).await, Ok(true));
        marked && verify_tlog_track_latest(self.client.workers(), token, self.tlog_reply_timeout).await
    }

    async fn commit_with_retry<F, Fut>(&self, op: F) -> Result<(), SnapError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), SnapError>>,
    {
        retry_retryable(COMMIT_ATTEMPTS, COMMIT_BACKOFF, op).await
    }

    async fn create_keys(&self, even: bool) -> Result<(), SnapError> {
        let writes: Vec<(String, String)> = random_ids(self.config.keys_per_batch, even)
            .into_iter()
            .map(|id| (format!("{}{id}", self.config.key_prefix), id.to_string()))
            .collect();
        self.commit_with_retry(|| async { self.db.commit(writes.clone()).await.map_err(SnapError::from) })
            .await?;
        info!(even, count = writes.len(), "snap test keys created");
        Ok(())
    }

    async fn take_snapshots(&mut self) -> Result<(), SnapError> {
        let to_delay = snap_delay(self.config.max_snap_delay);
        info!(to_delay, "ToDelay");
        tokio::time::sleep(Duration::from_secs_f64(to_delay)).await;

        for _ in 0..self.config.num_snaps.max(1) {
            let uid = self.client.snap_create_with_retry(&self.config.snap_binary).await?;
            self.snap_uid = Some(uid);
        }
        if let Some(uid) = self.snap_uid {
            save_restore_uid(&self.config.restart_info_location, uid)?;
            info!(%uid, location = %self.config.restart_info_location.display(), "Snapshot create succeeded");
        }
        Ok(())
    }

    async fn verify_keys(&self) -> Result<(), SnapError> {
        let check = check_snapshot_keys(self.db.as_ref(), &self.config.key_prefix).await?;
        if check.odd != 0 {
            return Err(SnapError::OperationFailed(format!(
                "{} keys written after the snapshot are present",
                check.odd
            )));
        }
        if check.even != self.config.keys_per_batch {
            return Err(SnapError::OperationFailed(format!(
                "expected {} keys from before the snapshot, found {}",
                self.config.keys_per_batch, check.even
            )));
        }
        Ok(())
    }

    async fn expect_rejected_snapshot(&mut self, uid: OpUid) -> Result<(), SnapError> {
        let payload = snap_payload(&self.config.snap_binary, uid);
        self.snap_uid = Some(uid);
        match self.client.send_snapshot(&payload, NodeRole::TLog).await {
            Err(SnapError::ProtocolViolation { reason, .. }) => {
                info!(%uid, reason, "SnapCreate rejected");
            }
            Err(e) => return Err(e),
            Ok(()) => {
                return Err(SnapError::OperationFailed(format!(
                    "snapshot {uid} accepted without matching pop disable"
                )))
            }
        }
        if !failure_marker_present(self.markers.as_ref(), uid).await? {
            return Err(SnapError::OperationFailed(format!("no failure marker for {uid}")));
        }
        Ok(())
    }

    async fn expect_not_permitted(&mut self) -> Result<(), SnapError> {
        match self.client.snap_create_with_retry(&self.config.forbidden_binary).await {
            Err(SnapError::NotPermitted(_)) => Ok(()),
            Err(e) => Err(e),
            Ok(uid) => Err(SnapError::OperationFailed(format!(
                "snapshot {uid} ran a non-whitelisted binary"
            ))),
        }
    }
}

fn snap_delay(max_snap_delay: f64) -> f64 {
    if !(max_snap_delay.is_finite() && max_snap_delay > 0.0) {
        return 0.0;
    }
    rand::thread_rng().gen_range(0.0..max_snap_delay)
}

fn random_ids(count: usize, even: bool) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let id = rng.gen_range(0..i64::MAX - 2);
            if (id % 2 == 0) == even {
                id
            } else {
                id + 1
            }
        })
        .collect()
}
