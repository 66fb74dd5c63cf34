//! # registry
//!
//! why: stop two snapshot runs for the same uid overlapping inside one node process
//! relations: owned by the snap-cluster worker context, consulted before invoker.rs runs
//! what: NodeRegistry (in-flight op uids + co-located log servers), InProgressGuard, TLogId

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::uid::OpUid;

/// Identifier of a log server hosted in a node process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TLogId(Uuid);

impl TLogId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Per-node bookkeeping, one instance per running node address
///
/// Marking a uid that is already in progress, or clearing one that is not,
/// is a logic bug and panics.
#[derive(Debug)]
pub struct NodeRegistry {
    address: SocketAddr,
    ops_in_progress: Mutex<HashSet<OpUid>>,
    tlogs_alive: Mutex<HashSet<TLogId>>,
}

impl NodeRegistry {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            ops_in_progress: Mutex::new(HashSet::new()),
            tlogs_alive: Mutex::new(HashSet::new()),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_in_progress(&self, uid: OpUid) -> bool {
        self.ops_in_progress.lock().contains(&uid)
    }

    pub fn mark_in_progress(&self, uid: OpUid) {
        let inserted = self.ops_in_progress.lock().insert(uid);
        assert!(inserted, "exec op {uid} already in progress on {}", self.address);
    }

    pub fn clear_in_progress(&self, uid: OpUid) {
        let removed = self.ops_in_progress.lock().remove(&uid);
        assert!(removed, "exec op {uid} not in progress on {}", self.address);
    }

    /// Check-and-mark under a single lock
    ///
    /// Returns `None` when the uid is already running here. The returned
    /// guard clears the uid when dropped.
    pub fn try_begin(&self, uid: OpUid) -> Option<InProgressGuard<'_>> {
        let mut ops = self.ops_in_progress.lock();
        if !ops.insert(uid) {
            debug!(%uid, address = %self.address, "exec op already in progress");
            return None;
        }
        Some(InProgressGuard { registry: self, uid })
    }

    pub fn register_log_server(&self, id: TLogId) {
        self.tlogs_alive.lock().insert(id);
    }

    pub fn unregister_log_server(&self, id: TLogId) {
        self.tlogs_alive.lock().remove(&id);
    }

    pub fn has_local_log_server(&self) -> bool {
        !self.tlogs_alive.lock().is_empty()
    }
}

/// Holds a uid in the in-progress set for its lifetime
#[derive(Debug)]
pub struct InProgressGuard<'a> {
    registry: &'a NodeRegistry,
    uid: OpUid,
}

impl InProgressGuard<'_> {
    pub fn uid(&self) -> OpUid {
        self.uid
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.registry.clear_in_progress(self.uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new("127.0.0.1:4500".parse().unwrap())
    }

    #[test]
    fn mark_then_clear() {
        let reg = registry();
        let uid = OpUid::random();
        reg.mark_in_progress(uid);
        assert!(reg.is_in_progress(uid));
        reg.clear_in_progress(uid);
        assert!(!reg.is_in_progress(uid));
    }

    #[test]
    #[should_panic(expected = "already in progress")]
    fn double_mark_panics() {
        let reg = registry();
        let uid = OpUid::random();
        reg.mark_in_progress(uid);
        reg.mark_in_progress(uid);
    }

    #[test]
    #[should_panic(expected = "not in progress")]
    fn clear_absent_panics() {
        registry().clear_in_progress(OpUid::random());
    }

    #[test]
    fn guard_rejects_duplicate_and_clears_on_drop() {
        let reg = registry();
        let uid = OpUid::random();
        {
            let guard = reg.try_begin(uid).expect("first begin");
            assert_eq!(guard.uid(), uid);
            assert!(reg.try_begin(uid).is_none());
        }
        assert!(!reg.is_in_progress(uid));
    }

    #[test]
    fn log_server_registration_is_idempotent() {
        let reg = registry();
        let id = TLogId::random();
        assert!(!reg.has_local_log_server());
        reg.register_log_server(id);
        reg.register_log_server(id);
        assert!(reg.has_local_log_server());
        reg.unregister_log_server(id);
        reg.unregister_log_server(id);
        assert!(!reg.has_local_log_server());
    }
}
