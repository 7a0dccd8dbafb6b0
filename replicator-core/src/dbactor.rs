use crate::cookie::CookieStore;
use crate::insert_batcher::InsertBatcher;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use replicator_store::{
    ChangeEntry, Checkpoint, Database, DocId, ProposedChangeStatus, RevId, RevToInsert, StoredRevision,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the batch timer wakes up to check whether a non-empty insert
/// queue has gone unflushed (§4.1 "arms a one-shot timer"). Approximated
/// here as a periodic check rather than a literal one-shot timer per
/// insert, since the queue is shared across actors and re-arming a timer
/// per push would need its own bookkeeping for no real benefit.
const INSERT_BATCH_TIMER: Duration = Duration::from_millis(250);

type Reply<T> = Sender<replicator_base::Result<T>>;

enum DbMsg {
    GetCheckpoint {
        key: String,
        reply: Reply<(Checkpoint, bool)>,
    },
    SetCheckpoint {
        key: String,
        checkpoint: Checkpoint,
        reply: Reply<()>,
    },
    GetChanges {
        since: u64,
        doc_ids: Option<HashSet<DocId>>,
        limit: usize,
        skip_deleted: bool,
        skip_foreign_remote: Option<String>,
        reply: Reply<Vec<ChangeEntry>>,
    },
    FindOrRequestRevs {
        requests: Vec<(DocId, RevId, Vec<RevId>)>,
        reply: Reply<Vec<bool>>,
    },
    FindAncestors {
        doc_id: DocId,
        candidates: Vec<RevId>,
        reply: Reply<Vec<RevId>>,
    },
    FindProposedChange {
        doc_id: DocId,
        rev_id: RevId,
        parent_rev_id: Option<RevId>,
        reply: Reply<ProposedChangeStatus>,
    },
    SendRevision {
        doc_id: DocId,
        rev_id: RevId,
        reply: Reply<Option<StoredRevision>>,
    },
    MarkSynced {
        remote_id: String,
        doc_id: DocId,
        rev_id: RevId,
        reply: Reply<()>,
    },
    LastSynced {
        remote_id: String,
        doc_id: DocId,
        reply: Reply<Option<RevId>>,
    },
    Watch {
        reply: Reply<Receiver<u64>>,
    },
    FlushInserts,
    FlushInsertsSync {
        reply: Reply<Vec<DocId>>,
    },
    SetCookie {
        header: String,
        from_host: String,
        reply: Reply<bool>,
    },
    CookiesForRequest {
        url: String,
        reply: Reply<String>,
    },
    Shutdown,
}

/// Single-threaded mailbox serializing all database access (§4.1). Every
/// other actor holds a cheap, cloneable [`DBActorHandle`] and never
/// touches the `Database` trait object directly.
pub struct DBActor {
    db: Arc<dyn Database>,
    receiver: Receiver<DbMsg>,
    batcher: Arc<InsertBatcher>,
    conflicts: Arc<Mutex<Vec<DocId>>>,
    cookies: Arc<CookieStore>,
}

impl DBActor {
    fn run(self) {
        for msg in self.receiver.iter() {
            match msg {
                DbMsg::GetCheckpoint { key, reply } => {
                    let result = self.db.get_local_checkpoint(&key).map(|cp| {
                        let is_empty = self.db.last_sequence() == 0;
                        (cp.unwrap_or_default(), is_empty)
                    });
                    let _ = reply.send(result);
                }
                DbMsg::SetCheckpoint { key, checkpoint, reply } => {
                    let result = self.db.set_local_checkpoint(&key, &checkpoint);
                    let _ = reply.send(result);
                }
                DbMsg::GetChanges {
                    since,
                    doc_ids,
                    limit,
                    skip_deleted,
                    skip_foreign_remote,
                    reply,
                } => {
                    let result = self.db.changes_since(since, limit).and_then(|changes| {
                        let mut kept = Vec::with_capacity(changes.len());
                        for c in changes {
                            if skip_deleted && c.deleted {
                                continue;
                            }
                            if let Some(ids) = &doc_ids {
                                if !ids.contains(&c.doc_id) {
                                    continue;
                                }
                            }
                            if let Some(remote_id) = &skip_foreign_remote {
                                if self.db.last_synced(remote_id, &c.doc_id)? == Some(c.rev_id.clone()) {
                                    continue;
                                }
                            }
                            kept.push(c);
                        }
                        Ok(kept)
                    });
                    let _ = reply.send(result);
                }
                DbMsg::FindOrRequestRevs { requests, reply } => {
                    let mut wanted = Vec::with_capacity(requests.len());
                    let mut err = None;
                    for (doc_id, rev_id, _ancestors) in requests {
                        match self.db.find_proposed_change(&doc_id, &rev_id, None) {
                            Ok(ProposedChangeStatus::AlreadyHave) => wanted.push(false),
                            Ok(_) => wanted.push(true),
                            Err(e) => {
                                err = Some(e);
                                break;
                            }
                        }
                    }
                    let _ = reply.send(match err {
                        Some(e) => Err(e),
                        None => Ok(wanted),
                    });
                }
                DbMsg::FindAncestors {
                    doc_id,
                    candidates,
                    reply,
                } => {
                    let result = self.db.find_ancestors(&doc_id, &candidates);
                    let _ = reply.send(result);
                }
                DbMsg::FindProposedChange {
                    doc_id,
                    rev_id,
                    parent_rev_id,
                    reply,
                } => {
                    let result = self
                        .db
                        .find_proposed_change(&doc_id, &rev_id, parent_rev_id.as_ref());
                    let _ = reply.send(result);
                }
                DbMsg::SendRevision { doc_id, rev_id, reply } => {
                    let result = self.db.get_revision(&doc_id, &rev_id);
                    let _ = reply.send(result);
                }
                DbMsg::MarkSynced {
                    remote_id,
                    doc_id,
                    rev_id,
                    reply,
                } => {
                    let result = self.db.mark_synced(&remote_id, &doc_id, &rev_id);
                    let _ = reply.send(result);
                }
                DbMsg::LastSynced {
                    remote_id,
                    doc_id,
                    reply,
                } => {
                    let result = self.db.last_synced(&remote_id, &doc_id);
                    let _ = reply.send(result);
                }
                DbMsg::Watch { reply } => {
                    let handle = self.db.watch();
                    let _ = reply.send(Ok(handle.receiver().clone()));
                }
                DbMsg::FlushInserts => {
                    self.flush_inserts();
                }
                DbMsg::FlushInsertsSync { reply } => {
                    let conflicted = self.flush_inserts();
                    let _ = reply.send(Ok(conflicted));
                }
                DbMsg::SetCookie { header, from_host, reply } => {
                    let accepted = self.cookies.set_cookie(&header, &from_host);
                    let _ = reply.send(Ok(accepted));
                }
                DbMsg::CookiesForRequest { url, reply } => {
                    let _ = reply.send(Ok(self.cookies.cookies_for_request(&url)));
                }
                DbMsg::Shutdown => {
                    self.flush_inserts();
                    break;
                }
            }
        }
    }

    /// Drains the insert queue and commits it (§4.1 "Batched insert
    /// algorithm"), returning the documents that ended up with more than
    /// one leaf. Conflicts are also appended to the shared `conflicts` log
    /// so callers that only trigger the timer-driven path (rather than
    /// `flush_inserts_sync`) can still observe them later. On a
    /// successful commit, every revision tagged with a `source_remote` is
    /// marked synced for that remote (§4.1 batched insert step 5), so a
    /// later push back never re-offers what was just pulled in.
    fn flush_inserts(&self) -> Vec<DocId> {
        let batch = self.batcher.drain();
        if batch.is_empty() {
            return Vec::new();
        }
        let synced_markers: Vec<(String, DocId, RevId)> = batch
            .iter()
            .filter_map(|r| {
                r.source_remote
                    .clone()
                    .map(|remote| (remote, r.doc_id.clone(), r.rev_id.clone()))
            })
            .collect();

        match self.db.insert_revisions(batch) {
            Ok(conflicted) => {
                if !conflicted.is_empty() {
                    self.conflicts.lock().extend(conflicted.iter().cloned());
                }
                for (remote_id, doc_id, rev_id) in synced_markers {
                    if let Err(e) = self.db.mark_synced(&remote_id, &doc_id, &rev_id) {
                        tracing::error!(target: "replicator", "could not mark {doc_id} synced from {remote_id}: {e:?}");
                    }
                }
                conflicted
            }
            Err(e) => {
                tracing::error!(target: "replicator", "insert batch commit failed: {e:?}");
                Vec::new()
            }
        }
    }
}

/// Cheap, cloneable reference to a running [`DBActor`]'s mailbox. Methods
/// are synchronous RPCs: send a request plus a one-shot reply channel,
/// block for the answer. That's the "message handlers run to completion"
/// ordering guarantee of §5 made visible to callers.
#[derive(Clone)]
pub struct DBActorHandle {
    sender: Sender<DbMsg>,
    batcher: Arc<InsertBatcher>,
    conflicts: Arc<Mutex<Vec<DocId>>>,
}

pub struct DBActorThread {
    pub handle: DBActorHandle,
    join: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl DBActorThread {
    pub fn spawn(db: Arc<dyn Database>, insert_high_water_mark: usize, cookies: Arc<CookieStore>) -> DBActorThread {
        let (sender, receiver) = unbounded();
        let batcher = Arc::new(InsertBatcher::new(insert_high_water_mark));
        let conflicts = Arc::new(Mutex::new(Vec::new()));
        let actor = DBActor {
            db,
            receiver,
            batcher: batcher.clone(),
            conflicts: conflicts.clone(),
            cookies,
        };
        let join = std::thread::spawn(move || actor.run());

        // A flush of an already-empty queue is a cheap no-op (`flush_inserts`
        // checks `batch.is_empty()` first), so the timer can simply poke
        // the mailbox every tick rather than re-arming per insert; it also
        // doubles as this thread's way of noticing the mailbox closed.
        let timer_sender = sender.clone();
        let timer = std::thread::spawn(move || loop {
            std::thread::sleep(INSERT_BATCH_TIMER);
            if timer_sender.send(DbMsg::FlushInserts).is_err() {
                break;
            }
        });

        DBActorThread {
            handle: DBActorHandle {
                sender,
                batcher,
                conflicts,
            },
            join: Some(join),
            timer: Some(timer),
        }
    }

    pub fn shutdown(mut self) {
        let _ = self.handle.sender.send(DbMsg::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

fn rpc<T>(sender: &Sender<DbMsg>, build: impl FnOnce(Reply<T>) -> DbMsg) -> replicator_base::Result<T> {
    let (reply, rx) = bounded(1);
    sender
        .send(build(reply))
        .map_err(|_| replicator_base::err("db actor mailbox closed"))?;
    rx.recv().map_err(|_| replicator_base::err("db actor did not reply"))?
}

impl DBActorHandle {
    pub fn get_checkpoint(&self, key: &str) -> replicator_base::Result<(Checkpoint, bool)> {
        rpc(&self.sender, |reply| DbMsg::GetCheckpoint {
            key: key.to_string(),
            reply,
        })
    }

    pub fn set_checkpoint(&self, key: &str, checkpoint: Checkpoint) -> replicator_base::Result<()> {
        rpc(&self.sender, |reply| DbMsg::SetCheckpoint {
            key: key.to_string(),
            checkpoint,
            reply,
        })
    }

    pub fn get_changes(
        &self,
        since: u64,
        doc_ids: Option<HashSet<DocId>>,
        limit: usize,
        skip_deleted: bool,
    ) -> replicator_base::Result<Vec<ChangeEntry>> {
        self.get_changes_filtered(since, doc_ids, limit, skip_deleted, None)
    }

    /// As [`Self::get_changes`], additionally dropping any change whose tip
    /// revision was itself just pulled from `skip_foreign_remote` (§4.1
    /// `get_changes`'s `skipForeign` parameter) -- avoids shipping a
    /// revision straight back to the remote it came from.
    pub fn get_changes_filtered(
        &self,
        since: u64,
        doc_ids: Option<HashSet<DocId>>,
        limit: usize,
        skip_deleted: bool,
        skip_foreign_remote: Option<String>,
    ) -> replicator_base::Result<Vec<ChangeEntry>> {
        rpc(&self.sender, |reply| DbMsg::GetChanges {
            since,
            doc_ids,
            limit,
            skip_deleted,
            skip_foreign_remote,
            reply,
        })
    }

    pub fn find_or_request_revs(
        &self,
        requests: Vec<(DocId, RevId, Vec<RevId>)>,
    ) -> replicator_base::Result<Vec<bool>> {
        rpc(&self.sender, |reply| DbMsg::FindOrRequestRevs { requests, reply })
    }

    pub fn find_ancestors(&self, doc_id: DocId, candidates: Vec<RevId>) -> replicator_base::Result<Vec<RevId>> {
        rpc(&self.sender, |reply| DbMsg::FindAncestors {
            doc_id,
            candidates,
            reply,
        })
    }

    pub fn find_proposed_change(
        &self,
        doc_id: DocId,
        rev_id: RevId,
        parent_rev_id: Option<RevId>,
    ) -> replicator_base::Result<ProposedChangeStatus> {
        rpc(&self.sender, |reply| DbMsg::FindProposedChange {
            doc_id,
            rev_id,
            parent_rev_id,
            reply,
        })
    }

    pub fn send_revision(&self, doc_id: DocId, rev_id: RevId) -> replicator_base::Result<Option<StoredRevision>> {
        rpc(&self.sender, |reply| DbMsg::SendRevision { doc_id, rev_id, reply })
    }

    /// Subscribes to newly appended sequences, for a continuous-mode
    /// Pusher to re-arm its change observer on (§4.2).
    pub fn watch(&self) -> replicator_base::Result<Receiver<u64>> {
        rpc(&self.sender, |reply| DbMsg::Watch { reply })
    }

    pub fn mark_synced(&self, remote_id: &str, doc_id: DocId, rev_id: RevId) -> replicator_base::Result<()> {
        rpc(&self.sender, |reply| DbMsg::MarkSynced {
            remote_id: remote_id.to_string(),
            doc_id,
            rev_id,
            reply,
        })
    }

    pub fn last_synced(&self, remote_id: &str, doc_id: DocId) -> replicator_base::Result<Option<RevId>> {
        rpc(&self.sender, |reply| DbMsg::LastSynced {
            remote_id: remote_id.to_string(),
            doc_id,
            reply,
        })
    }

    /// Queues a revision for batched insert (§4.1 `insert_revision`),
    /// flushing immediately once the high-water mark is crossed.
    pub fn insert_revision(&self, rev: RevToInsert) -> replicator_base::Result<()> {
        let should_flush = self.batcher.push(rev);
        if should_flush {
            self.flush_inserts()?;
        }
        Ok(())
    }

    pub fn flush_inserts(&self) -> replicator_base::Result<()> {
        self.sender
            .send(DbMsg::FlushInserts)
            .map_err(|_| replicator_base::err("db actor mailbox closed"))
    }

    /// Drains and commits the insert queue, blocking for the result, and
    /// returns the documents that are now in conflict. Used by the Puller
    /// so it can report conflicts and advance its pull cursor deterministically
    /// right after a batch commits, rather than polling the timer-driven path.
    pub fn flush_inserts_sync(&self) -> replicator_base::Result<Vec<DocId>> {
        rpc(&self.sender, |reply| DbMsg::FlushInsertsSync { reply })
    }

    pub fn pending_inserts(&self) -> usize {
        self.batcher.len()
    }

    /// Parses and inserts a `Set-Cookie`-style header into the cookie
    /// store owned by this actor (§4.1 `set_cookie`), returning whether it
    /// parsed to a valid cookie.
    pub fn set_cookie(&self, header: &str, from_host: &str) -> replicator_base::Result<bool> {
        rpc(&self.sender, |reply| DbMsg::SetCookie {
            header: header.to_string(),
            from_host: from_host.to_string(),
            reply,
        })
    }

    /// The `Cookie:`-style header to attach to an outgoing request to
    /// `url`, built from whatever is currently in the cookie store.
    pub fn cookies_for_request(&self, url: &str) -> replicator_base::Result<String> {
        rpc(&self.sender, |reply| DbMsg::CookiesForRequest {
            url: url.to_string(),
            reply,
        })
    }

    /// Drains and returns conflicts accumulated by timer-driven flushes
    /// since the last call, for callers (the Replicator coordinator) that
    /// don't go through `flush_inserts_sync` directly.
    pub fn take_conflicts(&self) -> Vec<DocId> {
        std::mem::take(&mut self.conflicts.lock())
    }
}
