use parking_lot::Mutex;
use replicator_net::Connection;
use std::collections::HashSet;
use std::sync::Arc;

/// Coarse lifecycle state of the replicator or one of its sub-actors
/// (§4.0). `Offline`/`Connecting` are reserved for a real network
/// transport's connect phase; `LoopbackConnection` is always already
/// connected, so this implementation only ever visits `Idle`/`Busy`/
/// `CaughtUp`-folded-into-`Idle`/`Stopped`, but the variants are kept for
/// API completeness and for embedders plugging in a real `Connection`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Activity {
    Stopped,
    Offline,
    Connecting,
    Idle,
    Busy,
}

/// Transfer progress rolled up across outstanding work, mirroring
/// `replicator_net::Progress`'s shape for the embedder-facing status.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

#[derive(Clone, Debug)]
pub struct ReplicatorStatus {
    pub activity: Activity,
    pub progress: Progress,
    pub error: Option<String>,
}

impl Default for ReplicatorStatus {
    fn default() -> Self {
        ReplicatorStatus {
            activity: Activity::Idle,
            progress: Progress::default(),
            error: None,
        }
    }
}

/// A single sub-actor's activity, shared between the actor's worker
/// thread (which writes it) and the Replicator coordinator (which reads
/// it to roll up `ReplicatorStatus`).
#[derive(Clone)]
pub struct ActivityHandle(Arc<Mutex<Activity>>);

impl ActivityHandle {
    pub fn new() -> ActivityHandle {
        ActivityHandle(Arc::new(Mutex::new(Activity::Idle)))
    }

    pub fn set(&self, a: Activity) {
        *self.0.lock() = a;
    }

    pub fn get(&self) -> Activity {
        *self.0.lock()
    }
}

impl Default for ActivityHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the sequences of sends the Pusher currently has outstanding, so
/// `Replicator::status` can roll their `Connection::progress` up into one
/// figure without the Pusher itself needing to expose its send window.
#[derive(Clone)]
pub struct TransferTracker(Arc<Mutex<HashSet<u64>>>);

impl TransferTracker {
    pub fn new() -> TransferTracker {
        TransferTracker(Arc::new(Mutex::new(HashSet::new())))
    }

    pub fn track(&self, sequence: u64) {
        self.0.lock().insert(sequence);
    }

    pub fn untrack(&self, sequence: u64) {
        self.0.lock().remove(&sequence);
    }

    /// Sums `Connection::progress` across every still-outstanding sequence.
    /// Completed transfers are untracked as they finish, so this only ever
    /// reports what's actually in flight right now.
    pub fn rollup(&self, conn: &dyn Connection) -> Progress {
        let sequences = self.0.lock().clone();
        sequences.iter().fold(Progress::default(), |acc, seq| {
            let p = conn.progress(*seq);
            Progress {
                completed: acc.completed + p.completed,
                total: acc.total + p.total,
            }
        })
    }
}

impl Default for TransferTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The last fatal error a sub-actor hit, if any, surfaced through
/// `ReplicatorStatus::error` (§7 Propagation). Overwritten, not
/// accumulated: only the most recent failure matters to an embedder
/// polling status.
#[derive(Clone)]
pub struct ErrorSlot(Arc<Mutex<Option<String>>>);

impl ErrorSlot {
    pub fn new() -> ErrorSlot {
        ErrorSlot(Arc::new(Mutex::new(None)))
    }

    pub fn set(&self, message: impl Into<String>) {
        *self.0.lock() = Some(message.into());
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

impl Default for ErrorSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_activity_handle_defaults_to_idle() {
        let h = ActivityHandle::new();
        assert_eq!(h.get(), Activity::Idle);
    }

    #[test]
    fn test_activity_handle_set_is_visible_through_clone() {
        let h = ActivityHandle::new();
        let h2 = h.clone();
        h.set(Activity::Busy);
        assert_eq!(h2.get(), Activity::Busy);
    }

    #[test]
    fn test_replicator_status_default_is_idle_with_no_error() {
        let status = ReplicatorStatus::default();
        assert_eq!(status.activity, Activity::Idle);
        assert_eq!(status.progress, Progress::default());
        assert!(status.error.is_none());
    }

    struct FakeConnection;

    impl replicator_net::Connection for FakeConnection {
        fn send(&self, _msg: replicator_net::Msg) -> replicator_net::Result<()> {
            Ok(())
        }
        fn recv(&self) -> replicator_net::Result<Option<replicator_net::Msg>> {
            Ok(None)
        }
        fn progress(&self, sequence: u64) -> replicator_net::Progress {
            replicator_net::Progress {
                completed: sequence,
                total: sequence * 2,
            }
        }
        fn cancel(&self, _sequence: u64) {}
    }

    #[test]
    fn test_transfer_tracker_rolls_up_only_tracked_sequences() {
        let tracker = TransferTracker::new();
        tracker.track(1);
        tracker.track(2);
        let conn = FakeConnection;
        let rolled = tracker.rollup(&conn);
        assert_eq!(rolled.completed, 3);
        assert_eq!(rolled.total, 6);

        tracker.untrack(1);
        let rolled = tracker.rollup(&conn);
        assert_eq!(rolled.completed, 2);
        assert_eq!(rolled.total, 4);
    }

    #[test]
    fn test_error_slot_keeps_only_the_latest_message() {
        let slot = ErrorSlot::new();
        assert!(slot.get().is_none());
        slot.set("first");
        slot.set("second");
        assert_eq!(slot.get().as_deref(), Some("second"));
    }
}
