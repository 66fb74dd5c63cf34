//! # tlog
//!
//! why: a log server must keep its entries while a snapshot is cut, and only for the uid that asked
//! relations: owned by worker.rs, queried by verify.rs
//! what: TLogServer pop-disable state machine, auto re-enable timer, failure events

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use snap_core::{OpUid, TLogId};
use tracing::{info, warn};

use crate::error::SnapError;

/// Prefix of the durable marker written when a log server rejects a snapshot
pub const SNAP_FAILED_TLOG_PREFIX: &str = "SnapFailedTLog.";
/// Event token: snapshot arrived while pop was not disabled
pub const SNAP_FAIL_POP_NOT_SET: &str = "SnapFailIgnorePopNotSet";
/// Event token: snapshot uid differs from the uid that disabled pop
pub const SNAP_FAIL_UID_MISMATCH: &str = "SnapFailedDisableTLogUidMismatch";

pub fn failure_marker_key(uid: OpUid) -> String {
    format!("{SNAP_FAILED_TLOG_PREFIX}{uid}")
}

/// Where one operation stands on one log server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapPhase {
    PopEnabled,
    PopDisabled,
    SnapshotAccepted,
    Failed,
}

impl SnapPhase {
    /// Accepted and failed are final for a uid
    pub fn is_terminal(self) -> bool {
        matches!(self, SnapPhase::SnapshotAccepted | SnapPhase::Failed)
    }
}

/// Outcome of admitting a snapshot request on one log server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Pop is disabled by this uid; cut the snapshot
    Run,
    /// This uid already cut its snapshot here; acknowledge without rerunning
    AlreadyAccepted,
    /// This uid already failed here; nothing left to do for it
    AlreadyFailed,
}

/// Most recent rejection, kept for track-latest verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureEvent {
    pub token: &'static str,
    pub uid: OpUid,
}

#[derive(Debug, Clone, Copy)]
struct PopDisable {
    uid: OpUid,
    generation: u64,
}

#[derive(Debug, Default)]
struct TLogState {
    pop_disabled: Option<PopDisable>,
    generation: u64,
    phases: HashMap<OpUid, SnapPhase>,
    latest_failure: Option<FailureEvent>,
}

/// A log server hosted in a worker process
#[derive(Debug)]
pub struct TLogServer {
    id: TLogId,
    auto_enable_after: Duration,
    state: Mutex<TLogState>,
    halted: AtomicBool,
}

impl TLogServer {
    pub fn new(id: TLogId, auto_enable_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            auto_enable_after,
            state: Mutex::new(TLogState::default()),
            halted: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> TLogId {
        self.id
    }

    /// Uid currently holding pop disabled, if any
    pub fn pop_disabled_by(&self) -> Option<OpUid> {
        self.state.lock().pop_disabled.map(|d| d.uid)
    }

    pub fn phase(&self, uid: OpUid) -> SnapPhase {
        self.state
            .lock()
            .phases
            .get(&uid)
            .copied()
            .unwrap_or(SnapPhase::PopEnabled)
    }

    /// Stop popping for `uid`
    ///
    /// Repeating the same uid is a no-op. A different uid takes over the
    /// disable. Pop comes back on its own after the auto-enable window.
    pub fn disable_pop(self: &Arc<Self>, uid: OpUid) {
        let generation = {
            let mut state = self.state.lock();
            if let Some(current) = state.pop_disabled {
                if current.uid == uid {
                    return;
                }
                warn!(tlog = %self.id, old = %current.uid, new = %uid, "pop disable replaced");
            }
            state.generation += 1;
            let generation = state.generation;
            state.pop_disabled = Some(PopDisable { uid, generation });
            let phase = state.phases.entry(uid).or_insert(SnapPhase::PopDisabled);
            if !phase.is_terminal() {
                *phase = SnapPhase::PopDisabled;
            }
            generation
        };
        info!(tlog = %self.id, %uid, "TLogPopDisabled");

        let weak: Weak<Self> = Arc::downgrade(self);
        let after = self.auto_enable_after;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tlog) = weak.upgrade() {
                tlog.auto_enable(generation);
            }
        });
    }

    fn auto_enable(&self, generation: u64) {
        let mut state = self.state.lock();
        let Some(current) = state.pop_disabled else {
            return;
        };
        if current.generation != generation {
            return;
        }
        state.pop_disabled = None;
        if state.phases.get(&current.uid) == Some(&SnapPhase::PopDisabled) {
            state.phases.insert(current.uid, SnapPhase::PopEnabled);
        }
        info!(tlog = %self.id, uid = %current.uid, "TLogPopAutoEnabled");
    }

    /// Resume popping; only the uid that disabled pop may re-enable it
    pub fn enable_pop(&self, uid: OpUid) -> Result<(), SnapError> {
        let mut state = self.state.lock();
        let Some(current) = state.pop_disabled else {
            return Ok(());
        };
        if current.uid != uid {
            warn!(tlog = %self.id, disabled_by = %current.uid, %uid, "TLogPopDisableEnableUidMismatch");
            return Err(SnapError::ProtocolViolation {
                uid,
                reason: "enable uid differs from disable uid",
            });
        }
        state.pop_disabled = None;
        if state.phases.get(&uid) == Some(&SnapPhase::PopDisabled) {
            state.phases.insert(uid, SnapPhase::PopEnabled);
        }
        info!(tlog = %self.id, %uid, "TLogPopEnabled");
        Ok(())
    }

    /// Admit or reject a snapshot for `uid`
    ///
    /// A uid that already reached a terminal phase is reported as such and
    /// leaves no new failure behind. On rejection the operation is marked
    /// failed and the failure event is remembered; writing the durable marker
    /// is the caller's job.
    pub fn check_snapshot(&self, uid: OpUid) -> Result<Admission, SnapError> {
        let mut state = self.state.lock();
        match state.phases.get(&uid) {
            Some(SnapPhase::SnapshotAccepted) => return Ok(Admission::AlreadyAccepted),
            Some(SnapPhase::Failed) => return Ok(Admission::AlreadyFailed),
            _ => {}
        }
        let token = match state.pop_disabled {
            Some(current) if current.uid == uid => return Ok(Admission::Run),
            Some(_) => SNAP_FAIL_UID_MISMATCH,
            None => SNAP_FAIL_POP_NOT_SET,
        };
        state.phases.insert(uid, SnapPhase::Failed);
        state.latest_failure = Some(FailureEvent { token, uid });
        warn!(tlog = %self.id, %uid, token, "snapshot rejected");
        Err(SnapError::ProtocolViolation { uid, reason: token })
    }

    pub fn snapshot_accepted(&self, uid: OpUid) {
        self.settle(uid, SnapPhase::SnapshotAccepted);
    }

    pub fn snapshot_failed(&self, uid: OpUid) {
        self.settle(uid, SnapPhase::Failed);
    }

    fn settle(&self, uid: OpUid, outcome: SnapPhase) {
        let mut state = self.state.lock();
        let phase = state.phases.entry(uid).or_insert(outcome);
        if phase.is_terminal() && *phase != outcome {
            warn!(tlog = %self.id, %uid, kept = ?*phase, ignored = ?outcome, "late snapshot outcome");
            return;
        }
        *phase = outcome;
    }

    /// Stop answering event-log requests, as a log server that went away would
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Latest failure event carrying `token`, as an event-log request would return it
    ///
    /// A halted server never replies, so callers bound the wait.
    pub async fn latest_event(&self, token: &str) -> Option<FailureEvent> {
        if self.halted.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        tokio::task::yield_now().await;
        self.state.lock().latest_failure.filter(|e| e.token == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlog(window: Duration) -> Arc<TLogServer> {
        TLogServer::new(TLogId::random(), window)
    }

    #[tokio::test]
    async fn matching_uid_is_admitted() {
        let t = tlog(Duration::from_secs(300));
        let uid = OpUid::random();
        t.disable_pop(uid);
        assert_eq!(t.phase(uid), SnapPhase::PopDisabled);
        assert_eq!(t.check_snapshot(uid).unwrap(), Admission::Run);
        t.snapshot_accepted(uid);
        assert_eq!(t.phase(uid), SnapPhase::SnapshotAccepted);
    }

    #[tokio::test]
    async fn accepted_uid_stays_accepted() {
        let t = tlog(Duration::from_secs(300));
        let uid = OpUid::random();
        t.disable_pop(uid);
        t.check_snapshot(uid).unwrap();
        t.snapshot_accepted(uid);

        t.snapshot_failed(uid);
        assert_eq!(t.phase(uid), SnapPhase::SnapshotAccepted);
        assert_eq!(t.check_snapshot(uid).unwrap(), Admission::AlreadyAccepted);

        // pop back on: a late retry is still acknowledged and leaves no failure event
        t.enable_pop(uid).unwrap();
        assert_eq!(t.check_snapshot(uid).unwrap(), Admission::AlreadyAccepted);
        assert_eq!(t.phase(uid), SnapPhase::SnapshotAccepted);
        assert_eq!(t.latest_event(SNAP_FAIL_POP_NOT_SET).await, None);

        t.disable_pop(uid);
        assert_eq!(t.phase(uid), SnapPhase::SnapshotAccepted);
    }

    #[tokio::test]
    async fn failed_uid_is_not_revived() {
        let t = tlog(Duration::from_secs(300));
        let uid = OpUid::random();
        t.disable_pop(uid);
        t.snapshot_failed(uid);
        t.snapshot_accepted(uid);
        assert_eq!(t.phase(uid), SnapPhase::Failed);
        assert_eq!(t.check_snapshot(uid).unwrap(), Admission::AlreadyFailed);
    }

    #[tokio::test]
    async fn halted_server_never_answers() {
        let t = tlog(Duration::from_secs(300));
        t.check_snapshot(OpUid::random()).unwrap_err();
        t.halt();
        let reply = tokio::time::timeout(
            Duration::from_millis(100),
            t.latest_event(SNAP_FAIL_POP_NOT_SET),
        )
        .await;
        assert!(reply.is_err());
    }

    #[tokio::test]
    async fn disable_is_idempotent() {
        let t = tlog(Duration::from_secs(300));
        let uid = OpUid::random();
        t.disable_pop(uid);
        t.disable_pop(uid);
        assert_eq!(t.pop_disabled_by(), Some(uid));
    }

    #[tokio::test]
    async fn snapshot_without_disable_is_rejected() {
        let t = tlog(Duration::from_secs(300));
        let uid = OpUid::random();
        let err = t.check_snapshot(uid).unwrap_err();
        assert!(matches!(err, SnapError::ProtocolViolation { reason: SNAP_FAIL_POP_NOT_SET, .. }));
        assert_eq!(t.phase(uid), SnapPhase::Failed);
        assert_eq!(
            t.latest_event(SNAP_FAIL_POP_NOT_SET).await,
            Some(FailureEvent { token: SNAP_FAIL_POP_NOT_SET, uid })
        );
        assert_eq!(t.latest_event(SNAP_FAIL_UID_MISMATCH).await, None);
    }

    #[tokio::test]
    async fn mismatched_uid_is_rejected() {
        let t = tlog(Duration::from_secs(300));
        let (d1, d2) = (OpUid::random(), OpUid::random());
        t.disable_pop(d1);
        let err = t.check_snapshot(d2).unwrap_err();
        assert!(matches!(err, SnapError::ProtocolViolation { reason: SNAP_FAIL_UID_MISMATCH, .. }));
        assert_eq!(t.phase(d2), SnapPhase::Failed);
        assert_eq!(t.pop_disabled_by(), Some(d1));
    }

    #[tokio::test]
    async fn enable_requires_matching_uid() {
        let t = tlog(Duration::from_secs(300));
        let uid = OpUid::random();
        t.disable_pop(uid);
        assert!(t.enable_pop(OpUid::random()).is_err());
        assert_eq!(t.pop_disabled_by(), Some(uid));
        t.enable_pop(uid).unwrap();
        assert_eq!(t.pop_disabled_by(), None);
        t.enable_pop(uid).unwrap();
    }

    #[tokio::test]
    async fn pop_re_enables_after_window() {
        let t = tlog(Duration::from_millis(100));
        let uid = OpUid::random();
        t.disable_pop(uid);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(t.pop_disabled_by(), None);
        assert_eq!(t.phase(uid), SnapPhase::PopEnabled);
    }

    #[tokio::test]
    async fn stale_timer_does_not_enable_newer_disable() {
        let t = tlog(Duration::from_millis(200));
        let (first, second) = (OpUid::random(), OpUid::random());
        t.disable_pop(first);
        tokio::time::sleep(Duration::from_millis(120)).await;
        t.disable_pop(second);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(t.pop_disabled_by(), Some(second));
    }
}
