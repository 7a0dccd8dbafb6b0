use crate::dbactor::DBActorHandle;
use crate::protocol::{prop, ChangesResponseEntry};
use crate::router::Router;
use crate::status::{Activity, ActivityHandle};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use replicator_net::{Msg, Profile, Properties};
use replicator_store::{ProposedChangeStatus, RevFlags, RevId, RevToInsert};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct PullerConfig {
    /// Identifies this replication's remote for `mark_synced`, so a
    /// subsequent push back to the same remote skips what it just sent us
    /// (§4.1 `skipForeign`).
    pub remote_id: String,
    /// Checkpoint key this side of the replication persists its
    /// `pull_cursor` under (§4.4). Shared with the Pusher's checkpoint key
    /// since both halves of one replication resume from the same record.
    pub checkpoint_key: String,
}

/// The protocol responder (§4.1, §6). Regardless of which directions a
/// `Replicator` was configured for, one `Puller` is always running: it is
/// the only actor that answers `getCheckpoint`/`setCheckpoint`/`changes`/
/// `rev` requests arriving from the peer. A "pull" in this design is
/// simply what happens when the peer's Pusher is active and our Puller
/// accepts what it proposes -- there's no separate active half to pulling.
pub struct Puller {
    dbactor: DBActorHandle,
    router: Arc<Router>,
    requests: Receiver<Msg>,
    config: PullerConfig,
    stop: Arc<AtomicBool>,
    activity: ActivityHandle,
}

impl Puller {
    pub fn new(
        dbactor: DBActorHandle,
        router: Arc<Router>,
        requests: Receiver<Msg>,
        config: PullerConfig,
        stop: Arc<AtomicBool>,
        activity: ActivityHandle,
    ) -> Puller {
        Puller {
            dbactor,
            router,
            requests,
            config,
            stop,
            activity,
        }
    }

    pub fn run(self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                self.activity.set(Activity::Stopped);
                return;
            }
            match self.requests.recv_timeout(Duration::from_millis(200)) {
                Ok(msg) => {
                    self.activity.set(Activity::Busy);
                    self.handle(msg);
                    self.activity.set(Activity::Idle);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.activity.set(Activity::Stopped);
                    return;
                }
            }
        }
    }

    fn handle(&self, msg: Msg) {
        self.store_cookie_from(&msg);
        match msg.profile {
            Profile::GetCheckpoint => self.handle_get_checkpoint(msg),
            Profile::SetCheckpoint => self.handle_set_checkpoint(msg),
            Profile::Changes => self.handle_changes(msg),
            Profile::Rev => self.handle_rev(msg),
            Profile::SubChanges | Profile::ProposedChanges | Profile::NoRev => {
                tracing::warn!(target: "replicator", "puller ignoring unsupported profile {:?}", msg.profile);
            }
        }
    }

    fn checkpoint_key(msg: &Msg) -> String {
        msg.properties.get(prop::CLIENT).cloned().unwrap_or_default()
    }

    /// Records any `Cookie:`-style property the peer attached to its
    /// request into the local cookie store (§4.5).
    fn store_cookie_from(&self, msg: &Msg) {
        if let Some(header) = msg.properties.get(prop::COOKIE) {
            if let Err(e) = self.dbactor.set_cookie(header, &self.config.remote_id) {
                tracing::warn!(target: "replicator", "could not store cookie from peer: {e:?}");
            }
        }
    }

    /// Properties for a reply, with whatever the local cookie jar has for
    /// this remote attached as `Set-Cookie` (§4.5).
    fn reply_properties(&self) -> Properties {
        let mut properties = Properties::new();
        match self.dbactor.cookies_for_request(&self.config.remote_id) {
            Ok(header) if !header.is_empty() => {
                properties.insert(prop::SET_COOKIE.to_string(), header);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(target: "replicator", "could not read cookie jar: {e:?}"),
        }
        properties
    }

    fn handle_get_checkpoint(&self, msg: Msg) {
        let key = Self::checkpoint_key(&msg);
        let reply = match self.dbactor.get_checkpoint(&key) {
            Ok((checkpoint, _)) => match msg.reply(self.reply_properties(), None).with_json_body(&checkpoint) {
                Ok(m) => m,
                Err(e) => self.error_reply(&msg, &e.to_string()),
            },
            Err(e) => self.error_reply(&msg, &format!("{e:?}")),
        };
        self.send(reply);
    }

    fn handle_set_checkpoint(&self, msg: Msg) {
        let key = Self::checkpoint_key(&msg);
        let checkpoint = match msg.body_json() {
            Ok(Some(cp)) => cp,
            Ok(None) => {
                self.send(self.error_reply(&msg, "setCheckpoint had no body"));
                return;
            }
            Err(e) => {
                self.send(self.error_reply(&msg, &format!("{e:?}")));
                return;
            }
        };
        let reply = match self.dbactor.set_checkpoint(&key, checkpoint) {
            Ok(()) => msg.reply(self.reply_properties(), None),
            Err(e) => self.error_reply(&msg, &format!("{e:?}")),
        };
        self.send(reply);
    }

    /// Decides, for each proposed change, whether the body is wanted
    /// (§4.1 `find_or_request_revs`): not wanted if we already have the
    /// exact revision or are forbidden from accepting it; wanted
    /// otherwise, including the conflicting case -- the local store's
    /// insert resolves conflicts by branching, it doesn't need to be
    /// steered around them here. A wanted reply carries back whichever of
    /// the proposer's `possible_ancestors` we already have, so the peer
    /// can send a shorter `history` list with the revision body.
    fn handle_changes(&self, msg: Msg) {
        let changes: Vec<replicator_store::ChangeEntry> = match msg.body_json() {
            Ok(Some(c)) => c,
            Ok(None) => Vec::new(),
            Err(e) => {
                self.send(self.error_reply(&msg, &format!("{e:?}")));
                return;
            }
        };

        let mut response = Vec::with_capacity(changes.len());
        for change in &changes {
            let status = self
                .dbactor
                .find_proposed_change(change.doc_id.clone(), change.rev_id.clone(), None);
            let entry = match status {
                Ok(ProposedChangeStatus::AlreadyHave) | Ok(ProposedChangeStatus::Forbidden) => {
                    ChangesResponseEntry::not_wanted()
                }
                Ok(ProposedChangeStatus::Wanted) | Ok(ProposedChangeStatus::Conflict) => {
                    let known = self
                        .dbactor
                        .find_ancestors(change.doc_id.clone(), change.possible_ancestors.clone())
                        .unwrap_or_default();
                    ChangesResponseEntry::wanted(known)
                }
                Err(e) => {
                    tracing::error!(target: "replicator", "could not evaluate proposed change for {}: {e:?}", change.doc_id);
                    ChangesResponseEntry::not_wanted()
                }
            };
            response.push(entry);
        }

        match msg.reply(self.reply_properties(), None).with_json_body(&response) {
            Ok(reply) => self.send(reply),
            Err(e) => tracing::error!(target: "replicator", "could not encode changes reply: {e:?}"),
        }
    }

    /// Queues the pushed revision for batched insert (§4.1 `insert_revision`)
    /// and acknowledges as soon as it's enqueued, rather than waiting on its
    /// batch to commit -- the high-water-mark/timer-driven flush commits it
    /// (and runs `mark_synced` for it) later, same as any other insert.
    /// Also advances this replication's `pull_cursor` past the message's
    /// sequence, so a resumed pull can skip what it already received.
    fn handle_rev(&self, msg: Msg) {
        let doc_id = match msg.properties.get(prop::ID) {
            Some(id) => replicator_store::DocId::from_str(id),
            None => {
                self.send(self.error_reply(&msg, "rev message missing id property"));
                return;
            }
        };
        let rev_id = match msg.properties.get(prop::REV) {
            Some(s) => RevId(s.as_bytes().to_vec()),
            None => {
                self.send(self.error_reply(&msg, "rev message missing rev property"));
                return;
            }
        };
        let sequence: Option<u64> = msg.properties.get(prop::SEQUENCE).and_then(|s| s.parse().ok());
        let history = msg
            .properties
            .get(prop::HISTORY)
            .map(|h| {
                h.split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| RevId(s.as_bytes().to_vec()))
                    .collect()
            })
            .unwrap_or_default();
        let flags = RevFlags {
            deleted: msg.properties.contains_key(prop::DELETED),
            has_attachments: false,
            no_conflicts: false,
        };
        let body = msg.body.clone().unwrap_or_default();

        let to_insert = RevToInsert {
            doc_id,
            rev_id,
            body,
            history,
            flags,
            source_remote: Some(self.config.remote_id.clone()),
        };

        let result = self.dbactor.insert_revision(to_insert);

        if result.is_ok() {
            if let Some(sequence) = sequence {
                self.advance_pull_cursor(sequence);
            }
        }

        let reply = match result {
            Ok(()) => msg.reply(self.reply_properties(), None),
            Err(e) => self.error_reply(&msg, &format!("{e:?}")),
        };
        self.send(reply);
    }

    /// Persists `sequence` as the new `pull_cursor` if it's past the one
    /// already on record, so a crash mid-pull resumes without re-pulling
    /// revisions already inserted (§4.4).
    fn advance_pull_cursor(&self, sequence: u64) {
        let (mut checkpoint, _) = match self.dbactor.get_checkpoint(&self.config.checkpoint_key) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "replicator", "could not load checkpoint to advance pull cursor: {e:?}");
                return;
            }
        };
        let current = checkpoint
            .pull_cursor
            .as_deref()
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
            .unwrap_or(0);
        if sequence <= current {
            return;
        }
        checkpoint.pull_cursor = Some(sequence.to_le_bytes().to_vec());
        if let Err(e) = self.dbactor.set_checkpoint(&self.config.checkpoint_key, checkpoint) {
            tracing::warn!(target: "replicator", "could not persist advanced pull cursor: {e:?}");
        }
    }

    fn error_reply(&self, msg: &Msg, text: &str) -> Msg {
        tracing::error!(target: "replicator", "puller rejecting {:?}: {text}", msg.profile);
        let mut properties = self.reply_properties();
        properties.insert(prop::ERROR.to_string(), text.to_string());
        msg.reply(properties, None)
    }

    fn send(&self, msg: Msg) {
        if let Err(e) = self.router.connection().send(msg) {
            tracing::warn!(target: "replicator", "puller could not send reply: {e:?}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cookie::CookieStore;
    use crate::dbactor::DBActorThread;
    use replicator_net::LoopbackConnection;
    use replicator_store::{root_revision, MemoryDatabase, RevId};
    use std::sync::atomic::AtomicBool;
    use test_log::test;

    fn harness(remote_id: &str) -> (Puller, DBActorThread, replicator_net::LoopbackConnection) {
        let db: Arc<dyn replicator_store::Database> = Arc::new(MemoryDatabase::new());
        let dbactor = DBActorThread::spawn(db, 200, Arc::new(CookieStore::new()));
        let (conn_a, conn_b) = LoopbackConnection::pair();
        let router = Arc::new(Router::new(Arc::new(conn_a)));
        let (_tx, rx) = crossbeam_channel::unbounded();
        let puller = Puller::new(
            dbactor.handle.clone(),
            router,
            rx,
            PullerConfig {
                remote_id: remote_id.to_string(),
                checkpoint_key: "checkpoint/test".to_string(),
            },
            Arc::new(AtomicBool::new(false)),
            ActivityHandle::new(),
        );
        (puller, dbactor, conn_b)
    }

    fn rev_msg(sequence: u64, doc_id: &str, rev_id: &str, body: &[u8]) -> Msg {
        let mut properties = Properties::new();
        properties.insert(prop::ID.to_string(), doc_id.to_string());
        properties.insert(prop::REV.to_string(), rev_id.to_string());
        properties.insert(prop::SEQUENCE.to_string(), sequence.to_string());
        Msg::request(Profile::Rev, sequence, properties, Some(body.to_vec()))
    }

    #[test]
    fn test_handle_rev_enqueues_without_committing_synchronously() {
        let (puller, dbactor, _conn_b) = harness("peer");
        puller.handle_rev(rev_msg(1, "doc1", "1-abc", b"{}"));

        assert_eq!(dbactor.handle.pending_inserts(), 1);
        let changes = dbactor.handle.get_changes_filtered(0, None, 10, false, None).unwrap();
        assert!(changes.is_empty());

        dbactor.handle.flush_inserts_sync().unwrap();
        let changes = dbactor.handle.get_changes_filtered(0, None, 10, false, None).unwrap();
        assert_eq!(changes.len(), 1);
        let last = dbactor
            .handle
            .last_synced("peer", replicator_store::DocId::from_str("doc1"))
            .unwrap();
        assert_eq!(last, Some(RevId::new(1, "abc")));

        dbactor.shutdown();
    }

    #[test]
    fn test_handle_rev_advances_pull_cursor_past_message_sequence() {
        let (puller, dbactor, _conn_b) = harness("peer");
        puller.handle_rev(rev_msg(5, "doc1", "1-abc", b"{}"));

        let (checkpoint, _) = dbactor.handle.get_checkpoint("checkpoint/test").unwrap();
        assert_eq!(checkpoint.pull_cursor, Some(5u64.to_le_bytes().to_vec()));

        // A stale, out-of-order sequence never moves the cursor backwards.
        puller.handle_rev(rev_msg(2, "doc2", "1-def", b"{}"));
        let (checkpoint, _) = dbactor.handle.get_checkpoint("checkpoint/test").unwrap();
        assert_eq!(checkpoint.pull_cursor, Some(5u64.to_le_bytes().to_vec()));

        dbactor.shutdown();
    }

    #[test]
    fn test_handle_changes_replies_with_ancestors_the_local_store_already_has() {
        let (puller, dbactor, conn_b) = harness("peer");
        dbactor
            .handle
            .insert_revision(root_revision("doc1", "abc", b"{}".to_vec()))
            .unwrap();
        dbactor.handle.flush_inserts_sync().unwrap();

        let change = replicator_store::ChangeEntry {
            sequence: 1,
            doc_id: replicator_store::DocId::from_str("doc1"),
            rev_id: RevId::new(2, "def"),
            deleted: false,
            body_size: 2,
            possible_ancestors: vec![RevId::new(1, "abc"), RevId::new(1, "nope")],
        };
        let msg = Msg::request(Profile::Changes, 1, Properties::new(), None)
            .with_json_body(&vec![change])
            .unwrap();

        puller.handle_changes(msg);

        let reply = conn_b.recv().unwrap().unwrap();
        let response: Vec<ChangesResponseEntry> = reply.body_json().unwrap().unwrap();
        assert_eq!(response, vec![ChangesResponseEntry::wanted(vec![RevId::new(1, "abc")])]);

        dbactor.shutdown();
    }

    #[test]
    fn test_handle_consumes_incoming_cookie_and_attaches_one_to_the_reply() {
        let (puller, dbactor, conn_b) = harness("peer");

        let mut properties = Properties::new();
        properties.insert(prop::CLIENT.to_string(), "checkpoint/test".to_string());
        properties.insert(prop::COOKIE.to_string(), "session=abc123".to_string());
        let msg = Msg::request(Profile::GetCheckpoint, 1, properties, None);

        puller.handle(msg);

        assert_eq!(
            dbactor.handle.cookies_for_request("peer").unwrap(),
            "session=abc123"
        );

        let reply = conn_b.recv().unwrap().unwrap();
        assert_eq!(
            reply.properties.get(prop::SET_COOKIE).map(String::as_str),
            Some("session=abc123")
        );

        dbactor.shutdown();
    }
}
