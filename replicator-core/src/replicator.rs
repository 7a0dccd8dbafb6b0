use crate::cookie::CookieStore;
use crate::dbactor::{DBActorHandle, DBActorThread};
use crate::puller::{Puller, PullerConfig};
use crate::pusher::{Pusher, PusherConfig};
use crate::router::Router;
use crate::status::{Activity, ActivityHandle, ErrorSlot, ReplicatorStatus, TransferTracker};
use crossbeam_channel::unbounded;
use replicator_net::{Connection, Msg, Profile, Properties};
use replicator_store::{checkpoint_key, Checkpoint, Database, DocId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplicatorDirection {
    Push,
    Pull,
    PushAndPull,
}

impl ReplicatorDirection {
    fn wants_push(self) -> bool {
        matches!(self, ReplicatorDirection::Push | ReplicatorDirection::PushAndPull)
    }
}

/// Embedder-supplied configuration (§6 "Configuration options"). Built
/// directly by the host application; this crate does no file/CLI parsing.
#[derive(Clone)]
pub struct ReplicatorOptions {
    pub local_uuid: String,
    pub remote_url: String,
    pub options_digest: String,
    pub direction: ReplicatorDirection,
    pub continuous: bool,
    pub doc_ids: Option<HashSet<DocId>>,
    pub skip_deleted: bool,
    pub batch_limit: usize,
    pub window_size: u8,
    pub insert_high_water_mark: usize,
}

impl Default for ReplicatorOptions {
    fn default() -> Self {
        ReplicatorOptions {
            local_uuid: String::new(),
            remote_url: String::new(),
            options_digest: String::new(),
            direction: ReplicatorDirection::PushAndPull,
            continuous: false,
            doc_ids: None,
            skip_deleted: false,
            batch_limit: 200,
            window_size: 32,
            insert_high_water_mark: 200,
        }
    }
}

/// The coordinator (§4.0): owns `DBActor`, spawns `Pusher`/`Puller` over a
/// shared `Router`, and rolls their [`ActivityHandle`]s plus the DBActor's
/// conflict log into one polled [`ReplicatorStatus`].
pub struct Replicator {
    dbactor: DBActorThread,
    router: Arc<Router>,
    checkpoint_key: String,
    stop: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
    puller_thread: Option<JoinHandle<()>>,
    pusher_thread: Option<JoinHandle<()>>,
    puller_activity: ActivityHandle,
    pusher_activity: Option<ActivityHandle>,
    cookies: Arc<CookieStore>,
    transfer: TransferTracker,
    errors: ErrorSlot,
}

impl Replicator {
    /// Derives the checkpoint key for this database/remote/options
    /// combination. Exposed so an embedder restarting a previous
    /// replication can use the same key to resume.
    pub fn checkpoint_key(options: &ReplicatorOptions) -> String {
        checkpoint_key(&options.local_uuid, &options.remote_url, &options.options_digest)
    }

    /// Starts the replication (§4.4, §5 lifecycle). Reconciles the local
    /// and remote checkpoint copies first -- local and remote are expected
    /// to agree; any disagreement resets the local copy to zero so the
    /// next push/pull re-derives it from scratch rather than resuming from
    /// a potentially stale cursor.
    pub fn start(db: Arc<dyn Database>, conn: Arc<dyn Connection>, options: ReplicatorOptions) -> Replicator {
        let cookies = Arc::new(CookieStore::new());
        let dbactor = DBActorThread::spawn(db, options.insert_high_water_mark, cookies.clone());
        let router = Arc::new(Router::new(conn));
        let key = Self::checkpoint_key(&options);
        let stop = Arc::new(AtomicBool::new(false));

        reconcile_checkpoint(&dbactor.handle, &router, &key);

        let (requests_tx, requests_rx) = unbounded::<Msg>();
        let dispatcher = Some(router.spawn_dispatcher(requests_tx, stop.clone()));

        let puller_activity = ActivityHandle::new();
        let puller = Puller::new(
            dbactor.handle.clone(),
            router.clone(),
            requests_rx,
            PullerConfig {
                remote_id: options.remote_url.clone(),
                checkpoint_key: key.clone(),
            },
            stop.clone(),
            puller_activity.clone(),
        );
        let puller_thread = Some(std::thread::spawn(move || puller.run()));

        let transfer = TransferTracker::new();
        let errors = ErrorSlot::new();

        let (pusher_thread, pusher_activity) = if options.direction.wants_push() {
            let activity = ActivityHandle::new();
            let pusher = Pusher::new(
                dbactor.handle.clone(),
                router.clone(),
                PusherConfig {
                    remote_id: options.remote_url.clone(),
                    doc_ids: options.doc_ids.clone(),
                    skip_deleted: options.skip_deleted,
                    batch_limit: options.batch_limit,
                    continuous: options.continuous,
                    skip_foreign: true,
                    window_size: options.window_size,
                },
                key.clone(),
                stop.clone(),
                activity.clone(),
                transfer.clone(),
                errors.clone(),
            );
            (Some(std::thread::spawn(move || pusher.run())), Some(activity))
        } else {
            (None, None)
        };

        Replicator {
            dbactor,
            router,
            checkpoint_key: key,
            stop,
            dispatcher,
            puller_thread,
            pusher_thread,
            puller_activity,
            pusher_activity,
            cookies,
            transfer,
            errors,
        }
    }

    pub fn cookies(&self) -> &Arc<CookieStore> {
        &self.cookies
    }

    pub fn checkpoint_key_in_use(&self) -> &str {
        &self.checkpoint_key
    }

    /// Rolls up sub-actor activity (§4.0). A one-shot push/pull that has
    /// finished and has no continuous pusher left running reports `Idle`;
    /// any actor still `Busy` makes the whole replicator `Busy`.
    pub fn status(&self) -> ReplicatorStatus {
        let activities = [
            Some(self.puller_activity.get()),
            self.pusher_activity.as_ref().map(|a| a.get()),
        ];
        let activity = if activities.iter().flatten().any(|a| *a == Activity::Busy) {
            Activity::Busy
        } else if activities.iter().flatten().all(|a| *a == Activity::Stopped) {
            Activity::Stopped
        } else {
            Activity::Idle
        };
        ReplicatorStatus {
            activity,
            progress: self.transfer.rollup(self.router.connection().as_ref()),
            error: self.errors.get(),
        }
    }

    /// Drains documents that ended up in conflict since the last call
    /// (§7 `DocumentConflict`, never fatal).
    pub fn take_conflicts(&self) -> Vec<DocId> {
        self.dbactor.handle.take_conflicts()
    }

    /// Cancellation (§5): signals every sub-actor to stop, waits for their
    /// threads to exit, then shuts the DBActor down (flushing any
    /// remaining queued inserts).
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.pusher_thread.take() {
            let _ = h.join();
        }
        if let Some(h) = self.puller_thread.take() {
            let _ = h.join();
        }
        if let Some(h) = self.dispatcher.take() {
            let _ = h.join();
        }
        self.dbactor.shutdown();
    }
}

fn reconcile_checkpoint(dbactor: &DBActorHandle, router: &Router, key: &str) {
    let (local, _is_empty) = match dbactor.get_checkpoint(key) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(target: "replicator", "could not load local checkpoint: {e:?}");
            return;
        }
    };

    let mut properties = Properties::new();
    properties.insert(crate::protocol::prop::CLIENT.to_string(), key.to_string());
    let request = Msg::request(Profile::GetCheckpoint, router.next_sequence(), properties, None);

    let reply = match router.request(request, Duration::from_secs(5)) {
        Ok(r) => r,
        Err(_) => {
            // Peer not reachable yet, or doesn't have a copy: nothing to
            // reconcile against, keep the local checkpoint as-is.
            return;
        }
    };

    let remote: Option<Checkpoint> = match reply.body_json() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(target: "replicator", "peer sent malformed checkpoint, ignoring: {e:?}");
            return;
        }
    };

    if let Some(remote) = remote {
        if remote != local {
            tracing::warn!(target: "replicator", "local/remote checkpoints for {key} disagree, resetting");
            if let Err(e) = dbactor.set_checkpoint(key, Checkpoint::default()) {
                tracing::error!(target: "replicator", "could not reset local checkpoint: {e:?}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use replicator_net::LoopbackConnection;
    use replicator_store::{root_revision, MemoryDatabase, RevId};
    use test_log::test;

    fn options() -> ReplicatorOptions {
        ReplicatorOptions {
            local_uuid: "local".into(),
            remote_url: "peer".into(),
            options_digest: "d".into(),
            ..ReplicatorOptions::default()
        }
    }

    #[test]
    fn test_one_shot_push_delivers_revision_to_peer() {
        let db_a: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let db_b: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        db_a.insert_revisions(vec![root_revision("doc1", "abc", b"{\"x\":1}".to_vec())])
            .unwrap();

        let (conn_a, conn_b) = LoopbackConnection::pair();

        let mut opts_a = options();
        opts_a.direction = ReplicatorDirection::Push;
        let repl_a = Replicator::start(db_a.clone(), Arc::new(conn_a), opts_a);

        let mut opts_b = options();
        opts_b.direction = ReplicatorDirection::Pull;
        let repl_b = Replicator::start(db_b.clone(), Arc::new(conn_b), opts_b);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while db_b.changes_since(0, 10).unwrap().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        let changes = db_b.changes_since(0, 10).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].doc_id, DocId::from_str("doc1"));

        let (checkpoint, _) = repl_a.dbactor.handle.get_checkpoint(&repl_a.checkpoint_key).unwrap();
        assert_eq!(checkpoint.last_pushed, changes[0].sequence);

        repl_a.stop();
        repl_b.stop();
    }

    /// §8 scenario 2: a process restart must resume pushing from
    /// the persisted checkpoint rather than re-scanning from scratch --
    /// modeled here as two independent `Replicator` lifetimes sharing the
    /// same underlying database and checkpoint key, with a fresh
    /// connection pair standing in for a reconnect.
    #[test]
    fn test_resumed_push_continues_from_the_persisted_checkpoint() {
        let db_a: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let db_b: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        db_a.insert_revisions(vec![root_revision("doc1", "abc", b"{\"x\":1}".to_vec())])
            .unwrap();

        {
            let (conn_a, conn_b) = LoopbackConnection::pair();
            let mut opts_a = options();
            opts_a.direction = ReplicatorDirection::Push;
            let repl_a = Replicator::start(db_a.clone(), Arc::new(conn_a), opts_a);
            let mut opts_b = options();
            opts_b.direction = ReplicatorDirection::Pull;
            let repl_b = Replicator::start(db_b.clone(), Arc::new(conn_b), opts_b);

            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while db_b.changes_since(0, 10).unwrap().is_empty() && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            let (checkpoint, _) = repl_a.dbactor.handle.get_checkpoint(&repl_a.checkpoint_key).unwrap();
            assert_eq!(checkpoint.last_pushed, 1);
            repl_a.stop();
            repl_b.stop();
        }

        // A second document shows up while the replicator is "offline",
        // simulating the gap a restart leaves.
        db_a.insert_revisions(vec![root_revision("doc2", "def", b"{\"x\":2}".to_vec())])
            .unwrap();

        let (conn_a, conn_b) = LoopbackConnection::pair();
        let mut opts_a = options();
        opts_a.direction = ReplicatorDirection::Push;
        let repl_a = Replicator::start(db_a.clone(), Arc::new(conn_a), opts_a);
        let mut opts_b = options();
        opts_b.direction = ReplicatorDirection::Pull;
        let repl_b = Replicator::start(db_b.clone(), Arc::new(conn_b), opts_b);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while db_b.changes_since(0, 10).unwrap().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        let changes = db_b.changes_since(0, 10).unwrap();
        assert_eq!(changes.len(), 2);
        let (checkpoint, _) = repl_a.dbactor.handle.get_checkpoint(&repl_a.checkpoint_key).unwrap();
        assert_eq!(checkpoint.last_pushed, 2);

        repl_a.stop();
        repl_b.stop();
    }

    /// §8 scenario 3: the peer already has its own, unrelated root
    /// revision for the same doc id. Pulling from it must not clobber the
    /// local leaf -- both survive as separate leaves and the conflict is
    /// reported upstream, rather than either side erroring out.
    #[test]
    fn test_pull_with_conflicting_root_revisions_keeps_both_leaves() {
        let db_a: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let db_b: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        db_a.insert_revisions(vec![root_revision("a", "x", b"{\"side\":\"a\"}".to_vec())])
            .unwrap();
        db_b.insert_revisions(vec![root_revision("a", "y", b"{\"side\":\"b\"}".to_vec())])
            .unwrap();

        let (conn_a, conn_b) = LoopbackConnection::pair();

        let mut opts_a = options();
        opts_a.direction = ReplicatorDirection::Push;
        let repl_a = Replicator::start(db_a.clone(), Arc::new(conn_a), opts_a);

        let mut opts_b = options();
        opts_b.direction = ReplicatorDirection::Pull;
        let repl_b = Replicator::start(db_b.clone(), Arc::new(conn_b), opts_b);

        let target = DocId::from_str("a");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while repl_b.take_conflicts().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        // Both revisions must still be fetchable: pulling in a conflicting
        // rev never discards the document's pre-existing leaf.
        assert!(db_b
            .get_revision(&target, &RevId::new(1, "x"))
            .unwrap()
            .is_some());
        assert!(db_b
            .get_revision(&target, &RevId::new(1, "y"))
            .unwrap()
            .is_some());
        assert_ne!(repl_b.status().activity, Activity::Stopped);

        repl_a.stop();
        repl_b.stop();
    }

    /// §8 scenario 4: a continuous push left running past its
    /// initial catch-up must pick up a document inserted afterwards,
    /// without the caller having to restart or re-poke it.
    #[test]
    fn test_continuous_push_delivers_a_later_insert() {
        let db_a: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let db_b: Arc<dyn Database> = Arc::new(MemoryDatabase::new());

        let (conn_a, conn_b) = LoopbackConnection::pair();

        let mut opts_a = options();
        opts_a.direction = ReplicatorDirection::Push;
        opts_a.continuous = true;
        let repl_a = Replicator::start(db_a.clone(), Arc::new(conn_a), opts_a);

        let mut opts_b = options();
        opts_b.direction = ReplicatorDirection::Pull;
        let repl_b = Replicator::start(db_b.clone(), Arc::new(conn_b), opts_b);

        let caught_up = std::time::Instant::now() + Duration::from_secs(5);
        while repl_a.status().activity != Activity::Idle && std::time::Instant::now() < caught_up {
            std::thread::sleep(Duration::from_millis(20));
        }

        db_a.insert_revisions(vec![root_revision("late", "z", b"{\"y\":2}".to_vec())])
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while db_b.changes_since(0, 10).unwrap().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        let changes = db_b.changes_since(0, 10).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].doc_id, DocId::from_str("late"));

        repl_a.stop();
        repl_b.stop();
    }
}
