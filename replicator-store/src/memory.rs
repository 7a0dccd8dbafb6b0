use crate::checkpoint::Checkpoint;
use crate::database::{ChangeFeedHandle, Database, StoredRevision};
use crate::ids::{DocId, RevId};
use crate::model::{ChangeEntry, ProposedChangeStatus, RevFlags, RevToInsert};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// How many ancestor generations `get_revision` will report. Mirrors the
/// replicator's own `kMaxPossibleAncestors` limit on how far back a
/// `proposeChanges` ancestor list is worth sending.
const MAX_REPORTED_ANCESTORS: usize = 10;

struct RevNode {
    body: Vec<u8>,
    parent: Option<RevId>,
    deleted: bool,
}

/// Walks a document's revision tree from `rev_id` back through its
/// parents, nearest first, capped at `MAX_REPORTED_ANCESTORS`. Shared by
/// `get_revision`'s history and `changes_since`'s candidate-ancestor list.
fn ancestor_chain(doc: &DocRecord, rev_id: &RevId) -> Vec<RevId> {
    let mut history = Vec::new();
    let mut cursor = doc.revisions.get(rev_id).and_then(|n| n.parent.clone());
    while let Some(rev) = cursor {
        if history.len() >= MAX_REPORTED_ANCESTORS {
            break;
        }
        let Some(parent_node) = doc.revisions.get(&rev) else {
            history.push(rev);
            break;
        };
        history.push(rev.clone());
        cursor = parent_node.parent.clone();
    }
    history
}

#[derive(Default)]
struct DocRecord {
    revisions: HashMap<RevId, RevNode>,
    /// Current tips of the revision tree. More than one entry means the
    /// document is in conflict.
    leaves: HashSet<RevId>,
}

struct Inner {
    docs: std::collections::BTreeMap<DocId, DocRecord>,
    change_log: Vec<ChangeEntry>,
    checkpoints: HashMap<String, Checkpoint>,
    next_sequence: u64,
    watchers: Vec<Sender<u64>>,
    synced: HashMap<(String, DocId), RevId>,
}

/// A reference storage engine backed entirely by in-memory maps. Exists to
/// exercise `replicator-core`'s actors end to end without depending on a
/// real embedded database; production storage engines implement
/// [`Database`] directly against their own files.
pub struct MemoryDatabase {
    inner: RwLock<Inner>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        MemoryDatabase {
            inner: RwLock::new(Inner {
                docs: Default::default(),
                change_log: Vec::new(),
                checkpoints: HashMap::new(),
                next_sequence: 0,
                watchers: Vec::new(),
                synced: HashMap::new(),
            }),
        }
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(inner: &mut Inner, sequence: u64) {
        inner.watchers.retain(|s| s.send(sequence).is_ok());
    }
}

impl Database for MemoryDatabase {
    fn changes_since(&self, since: u64, limit: usize) -> crate::Result<Vec<ChangeEntry>> {
        let inner = self.inner.read();
        Ok(inner
            .change_log
            .iter()
            .filter(|e| e.sequence > since)
            .take(limit)
            .map(|e| {
                let mut entry = e.clone();
                if let Some(doc) = inner.docs.get(&e.doc_id) {
                    entry.possible_ancestors = ancestor_chain(doc, &e.rev_id);
                }
                entry
            })
            .collect())
    }

    fn get_revision(&self, doc_id: &DocId, rev_id: &RevId) -> crate::Result<Option<StoredRevision>> {
        let inner = self.inner.read();
        let Some(doc) = inner.docs.get(doc_id) else {
            return Ok(None);
        };
        let Some(node) = doc.revisions.get(rev_id) else {
            return Ok(None);
        };
        Ok(Some(StoredRevision {
            body: node.body.clone(),
            history: ancestor_chain(doc, rev_id),
            deleted: node.deleted,
        }))
    }

    fn find_ancestors(&self, doc_id: &DocId, candidates: &[RevId]) -> crate::Result<Vec<RevId>> {
        let inner = self.inner.read();
        let Some(doc) = inner.docs.get(doc_id) else {
            return Ok(Vec::new());
        };
        Ok(candidates
            .iter()
            .filter(|c| doc.revisions.contains_key(*c))
            .cloned()
            .collect())
    }

    fn find_proposed_change(
        &self,
        doc_id: &DocId,
        rev_id: &RevId,
        parent_rev_id: Option<&RevId>,
    ) -> crate::Result<ProposedChangeStatus> {
        let inner = self.inner.read();
        let doc = inner.docs.get(doc_id);

        if let Some(doc) = doc {
            if doc.revisions.contains_key(rev_id) {
                return Ok(ProposedChangeStatus::AlreadyHave);
            }
        }

        match parent_rev_id {
            Some(parent) => match doc {
                Some(doc) if doc.revisions.contains_key(parent) => Ok(ProposedChangeStatus::Wanted),
                Some(_) => Ok(ProposedChangeStatus::Conflict),
                None => Ok(ProposedChangeStatus::Conflict),
            },
            None => match doc {
                None => Ok(ProposedChangeStatus::Wanted),
                Some(_) => Ok(ProposedChangeStatus::Conflict),
            },
        }
    }

    fn insert_revisions(&self, revs: Vec<RevToInsert>) -> crate::Result<Vec<DocId>> {
        let mut inner = self.inner.write();
        let mut touched_docs = Vec::new();
        let mut touched_sequence = None;

        for rev in revs {
            let parent = rev.history.first().cloned();
            let doc = inner.docs.entry(rev.doc_id.clone()).or_default();

            // A known parent that's still a leaf is the normal case: the
            // new rev replaces it. A parent that's unknown, or no parent
            // at all against a document that already has revisions, is a
            // forced insert -- it still lands, just alongside the
            // existing leaf rather than replacing it, producing a
            // conflict for the caller to report.
            if let Some(parent) = &parent {
                doc.leaves.remove(parent);
            }

            let body_size = rev.body.len();
            doc.revisions.insert(
                rev.rev_id.clone(),
                RevNode {
                    body: rev.body,
                    parent: parent.clone(),
                    deleted: rev.flags.deleted,
                },
            );
            doc.leaves.insert(rev.rev_id.clone());

            if doc.leaves.len() > 1 {
                touched_docs.push(rev.doc_id.clone());
            }

            inner.next_sequence += 1;
            let sequence = inner.next_sequence;
            touched_sequence = Some(sequence);
            inner.change_log.push(ChangeEntry {
                sequence,
                doc_id: rev.doc_id,
                rev_id: rev.rev_id,
                deleted: rev.flags.deleted,
                body_size,
                possible_ancestors: Vec::new(),
            });
        }

        if let Some(sequence) = touched_sequence {
            Self::notify(&mut inner, sequence);
        }

        touched_docs.sort();
        touched_docs.dedup();
        Ok(touched_docs)
    }

    fn get_local_checkpoint(&self, key: &str) -> crate::Result<Option<Checkpoint>> {
        Ok(self.inner.read().checkpoints.get(key).cloned())
    }

    fn set_local_checkpoint(&self, key: &str, checkpoint: &Checkpoint) -> crate::Result<()> {
        self.inner
            .write()
            .checkpoints
            .insert(key.to_string(), checkpoint.clone());
        Ok(())
    }

    fn watch(&self) -> ChangeFeedHandle {
        let (tx, rx) = unbounded();
        self.inner.write().watchers.push(tx);
        ChangeFeedHandle::new(rx)
    }

    fn last_sequence(&self) -> u64 {
        self.inner.read().next_sequence
    }

    fn mark_synced(&self, remote_id: &str, doc_id: &DocId, rev_id: &RevId) -> crate::Result<()> {
        self.inner
            .write()
            .synced
            .insert((remote_id.to_string(), doc_id.clone()), rev_id.clone());
        Ok(())
    }

    fn last_synced(&self, remote_id: &str, doc_id: &DocId) -> crate::Result<Option<RevId>> {
        Ok(self
            .inner
            .read()
            .synced
            .get(&(remote_id.to_string(), doc_id.clone()))
            .cloned())
    }
}

/// Convenience for tests and the loopback fixture: builds a `RevToInsert`
/// for a document's first revision (no parent).
pub fn root_revision(doc_id: &str, rev_id: &str, body: Vec<u8>) -> RevToInsert {
    RevToInsert {
        doc_id: DocId::from_str(doc_id),
        rev_id: RevId::new(1, rev_id),
        body,
        history: Vec::new(),
        flags: RevFlags::default(),
        source_remote: None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_insert_and_changes_since() {
        let db = MemoryDatabase::new();
        db.insert_revisions(vec![root_revision("doc1", "abc", b"{}".to_vec())])
            .unwrap();
        let changes = db.changes_since(0, 10).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].doc_id, DocId::from_str("doc1"));
        assert_eq!(db.last_sequence(), 1);
    }

    #[test]
    fn test_find_proposed_change_wanted_then_already_have() {
        let db = MemoryDatabase::new();
        let doc_id = DocId::from_str("doc1");
        let rev_id = RevId::new(1, "abc");

        assert_eq!(
            db.find_proposed_change(&doc_id, &rev_id, None).unwrap(),
            ProposedChangeStatus::Wanted
        );

        db.insert_revisions(vec![root_revision("doc1", "abc", b"{}".to_vec())])
            .unwrap();

        assert_eq!(
            db.find_proposed_change(&doc_id, &rev_id, None).unwrap(),
            ProposedChangeStatus::AlreadyHave
        );
    }

    #[test]
    fn test_second_root_revision_conflicts() {
        let db = MemoryDatabase::new();
        db.insert_revisions(vec![root_revision("doc1", "abc", b"{}".to_vec())])
            .unwrap();
        let status = db
            .find_proposed_change(&DocId::from_str("doc1"), &RevId::new(1, "xyz"), None)
            .unwrap();
        assert_eq!(status, ProposedChangeStatus::Conflict);
    }

    #[test]
    fn test_insert_child_revision_updates_leaves_and_history() {
        let db = MemoryDatabase::new();
        let doc_id = DocId::from_str("doc1");
        db.insert_revisions(vec![root_revision("doc1", "abc", b"{}".to_vec())])
            .unwrap();

        let child = RevToInsert {
            doc_id: doc_id.clone(),
            rev_id: RevId::new(2, "def"),
            body: b"{\"x\":1}".to_vec(),
            history: vec![RevId::new(1, "abc")],
            flags: RevFlags::default(),
            source_remote: None,
        };
        let rejected = db.insert_revisions(vec![child]).unwrap();
        assert!(rejected.is_empty());

        let stored = db
            .get_revision(&doc_id, &RevId::new(2, "def"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.history, vec![RevId::new(1, "abc")]);
    }

    #[test]
    fn test_insert_with_unknown_parent_is_forced_and_flagged_as_conflict() {
        let db = MemoryDatabase::new();
        db.insert_revisions(vec![root_revision("doc1", "abc", b"{}".to_vec())])
            .unwrap();

        let orphan = RevToInsert {
            doc_id: DocId::from_str("doc1"),
            rev_id: RevId::new(1, "xyz"),
            body: b"{}".to_vec(),
            history: Vec::new(),
            flags: RevFlags::default(),
            source_remote: None,
        };
        let conflicted = db.insert_revisions(vec![orphan]).unwrap();
        assert_eq!(conflicted, vec![DocId::from_str("doc1")]);

        // Both leaves survive; neither was silently dropped.
        assert!(db
            .get_revision(&DocId::from_str("doc1"), &RevId::new(1, "abc"))
            .unwrap()
            .is_some());
        assert!(db
            .get_revision(&DocId::from_str("doc1"), &RevId::new(1, "xyz"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_checkpoint_persistence() {
        let db = MemoryDatabase::new();
        assert!(db.get_local_checkpoint("k").unwrap().is_none());
        let cp = Checkpoint {
            last_pushed: 5,
            pull_cursor: None,
        };
        db.set_local_checkpoint("k", &cp).unwrap();
        assert_eq!(db.get_local_checkpoint("k").unwrap(), Some(cp));
    }

    #[test]
    fn test_mark_synced_is_per_remote_and_per_doc() {
        let db = MemoryDatabase::new();
        let doc_id = DocId::from_str("doc1");
        let rev_id = RevId::new(1, "abc");
        assert_eq!(db.last_synced("remote-a", &doc_id).unwrap(), None);

        db.mark_synced("remote-a", &doc_id, &rev_id).unwrap();
        assert_eq!(db.last_synced("remote-a", &doc_id).unwrap(), Some(rev_id.clone()));
        assert_eq!(db.last_synced("remote-b", &doc_id).unwrap(), None);
    }

    #[test]
    fn test_watch_receives_sequence_on_insert() {
        let db = MemoryDatabase::new();
        let handle = db.watch();
        db.insert_revisions(vec![root_revision("doc1", "abc", b"{}".to_vec())])
            .unwrap();
        let seq = handle.receiver().recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(seq, 1);
    }
}
