use crate::checkpoint::Checkpoint;
use crate::ids::{DocId, RevId};
use crate::model::{ChangeEntry, ProposedChangeStatus, RevToInsert};
use crossbeam_channel::Receiver;

/// A fetched revision body along with the ancestor chain the storage
/// engine has recorded for it, as returned to the Pusher when assembling
/// a revision message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredRevision {
    pub body: Vec<u8>,
    pub history: Vec<RevId>,
    pub deleted: bool,
}

/// A live subscription to a database's change log. `receiver()` yields
/// sequence numbers as they're appended; continuous-mode Pushers hold one
/// of these and re-arm their change observer each time it fires.
pub struct ChangeFeedHandle {
    receiver: Receiver<u64>,
}

impl ChangeFeedHandle {
    pub fn new(receiver: Receiver<u64>) -> Self {
        ChangeFeedHandle { receiver }
    }

    pub fn receiver(&self) -> &Receiver<u64> {
        &self.receiver
    }
}

/// The narrow interface the replicator needs from a storage engine. Both
/// directions of replication, checkpoint persistence, and conflict
/// detection go through this trait; nothing in `replicator-core` touches
/// storage internals directly.
pub trait Database: Send + Sync {
    /// Entries with `sequence > since`, oldest first, up to `limit` entries.
    fn changes_since(&self, since: u64, limit: usize) -> crate::Result<Vec<ChangeEntry>>;

    /// Fetches a specific revision's body and known ancestor chain.
    fn get_revision(&self, doc_id: &DocId, rev_id: &RevId) -> crate::Result<Option<StoredRevision>>;

    /// Given a doc/rev and a list of candidate ancestor revs the remote
    /// offered, returns which of `candidates` are already present locally
    /// as ancestors of the current revision tree for that document.
    fn find_ancestors(&self, doc_id: &DocId, candidates: &[RevId]) -> crate::Result<Vec<RevId>>;

    /// Decides whether an incoming change should be requested, already
    /// held, or rejected, without fetching the body.
    fn find_proposed_change(
        &self,
        doc_id: &DocId,
        rev_id: &RevId,
        parent_rev_id: Option<&RevId>,
    ) -> crate::Result<ProposedChangeStatus>;

    /// Inserts a batch of fetched revisions, grafting each onto its
    /// document's revision tree. An incoming revision whose parent isn't
    /// the current tip (or has no parent at all, for an already-existing
    /// document) is still inserted -- forced, in the source's terms --
    /// producing an additional leaf. Returns the set of documents that
    /// have more than one leaf after this batch, i.e. are now in conflict,
    /// for the caller to report upstream.
    fn insert_revisions(&self, revs: Vec<RevToInsert>) -> crate::Result<Vec<DocId>>;

    fn get_local_checkpoint(&self, key: &str) -> crate::Result<Option<Checkpoint>>;
    fn set_local_checkpoint(&self, key: &str, checkpoint: &Checkpoint) -> crate::Result<()>;

    /// Subscribes to new sequences appended after `db_open_sequence` was
    /// taken; used to re-arm a continuous-mode change observer.
    fn watch(&self) -> ChangeFeedHandle;

    /// Highest sequence currently in the change log.
    fn last_sequence(&self) -> u64;

    /// Records that `rev_id` of `doc_id` was just inserted as a foreign
    /// revision pulled from `remote_id`, so a subsequent push to that same
    /// remote never tries to ship it back (§4.1 batched insert step 5).
    fn mark_synced(&self, remote_id: &str, doc_id: &DocId, rev_id: &RevId) -> crate::Result<()>;

    /// The last revision recorded via `mark_synced` for (remote_id, doc_id),
    /// if any. Consulted by `changes_since` filtering when a push is asked
    /// to skip revisions that were themselves just pulled from the remote
    /// it's about to push to.
    fn last_synced(&self, remote_id: &str, doc_id: &DocId) -> crate::Result<Option<RevId>>;
}
