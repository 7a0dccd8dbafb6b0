use replicator_store::{checkpoint_key, Checkpoint, Database};
use std::sync::Arc;

/// Derives keys and fetches/persists the resumption marker for one
/// replication channel (§4.4). The "exists in two mirrored copies"
/// reconciliation (local vs remote, reset-to-zero on disagreement) is
/// driven by `Replicator::start`, which is the only place that sees both
/// sides; this type just wraps the local half.
pub struct CheckpointStore {
    db: Arc<dyn Database>,
    key: String,
}

impl CheckpointStore {
    pub fn new(db: Arc<dyn Database>, local_uuid: &str, remote_url: &str, options_digest: &str) -> Self {
        CheckpointStore {
            db,
            key: checkpoint_key(local_uuid, remote_url, options_digest),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> replicator_base::Result<Checkpoint> {
        Ok(self.db.get_local_checkpoint(&self.key)?.unwrap_or_default())
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> replicator_base::Result<()> {
        self.db.set_local_checkpoint(&self.key, checkpoint)
    }

    pub fn is_db_empty(&self) -> bool {
        self.db.last_sequence() == 0
    }
}
