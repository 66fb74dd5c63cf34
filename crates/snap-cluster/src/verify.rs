//! # verify
//!
//! why: prove after the fact that the protocol held, both for rejections and for captured data
//! relations: reads markers written by worker.rs and events kept by tlog.rs; used by workload.rs
//! what: failure marker lookup, track-latest check across log servers, snapshot key consistency scan

use std::sync::Arc;
use std::time::Duration;

use snap_core::OpUid;
use snap_storage::KeyValueStore;
use tracing::{debug, error, info};

use crate::error::SnapError;
use crate::tlog::failure_marker_key;
use crate::worker::Worker;

const SCAN_PAGE_LIMIT: usize = 1000;

/// Whether a rejection marker exists for `uid`
pub async fn failure_marker_present(store: &dyn KeyValueStore, uid: OpUid) -> Result<bool, SnapError> {
    Ok(store.get(&failure_marker_key(uid)).await?.is_some())
}

/// Ask every log server for its latest event carrying `token`
///
/// Passes when at least one log server reports it. Topology queries can
/// include log servers from a remote region, so requiring every server to
/// answer would fail spuriously.
pub async fn verify_tlog_track_latest(workers: &[Arc<Worker>], token: &str, reply_timeout: Duration) -> bool {
    let mut found = 0;
    for worker in workers.iter().filter(|w| w.has_local_log_server()) {
        for tlog in worker.tlogs() {
            match tokio::time::timeout(reply_timeout, tlog.latest_event(token)).await {
                Ok(Some(event)) => {
                    debug!(address = %worker.address(), tlog = %tlog.id(), uid = %event.uid, token, "event found");
                    found += 1;
                }
                Ok(None) => {
                    info!(address = %worker.address(), tlog = %tlog.id(), token, "VerifyTLogTrackLatestMessageNotFound");
                }
                Err(_) => {
                    error!(address = %worker.address(), token, "UnableToRetrieveTLogMessages");
                    return false;
                }
            }
        }
    }
    if found < 1 {
        error!(token, found, "VerifyTLogTrackLatestMessageNotReachAllTLogservers");
        return false;
    }
    true
}

/// Tally of workload keys found under a prefix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyCheck {
    pub even: usize,
    pub odd: usize,
}

/// Scan every key under `prefix` and check that each value equals its key id
///
/// Even ids were written before the snapshot and odd ids after; odd keys
/// are counted but take no part in the value check.
pub async fn check_snapshot_keys(store: &dyn KeyValueStore, prefix: &str) -> Result<KeyCheck, SnapError> {
    let end = format!("{prefix}\u{ff}");
    let mut begin = prefix.to_string();
    let mut check = KeyCheck::default();

    loop {
        let page = store.scan(&begin, &end, SCAN_PAGE_LIMIT).await?;
        for (key, value) in &page.entries {
            let id = parse_id(&key[prefix.len()..], key)?;
            if id % 2 != 0 {
                check.odd += 1;
                continue;
            }
            if parse_id(value, key)? != id {
                return Err(SnapError::OperationFailed(format!("key {key} holds {value}")));
            }
            check.even += 1;
        }
        match page.entries.last() {
            Some((last, _)) if page.more => begin = format!("{last}\0"),
            _ => break,
        }
    }

    info!(prefix, even = check.even, odd = check.odd, "SnapTestVerifyCntValue");
    Ok(check)
}

fn parse_id(text: &str, key: &str) -> Result<i64, SnapError> {
    text.parse()
        .map_err(|_| SnapError::OperationFailed(format!("key {key} has non-numeric id {text:?}")))
}
