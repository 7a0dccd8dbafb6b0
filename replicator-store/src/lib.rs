#![allow(dead_code)]

// replicator-store is the storage-engine seam: `replicator-core`'s actors
// only ever see the `Database` trait here, never a concrete storage
// format. `MemoryDatabase` is the reference implementation used by the
// replicator's own tests; a real embedder implements `Database` against
// whatever storage engine backs its documents.

mod checkpoint;
mod database;
mod ids;
mod memory;
mod model;

pub use checkpoint::{checkpoint_key, Checkpoint};
pub use database::{ChangeFeedHandle, Database, StoredRevision};
pub use ids::{DocId, RevId};
pub use memory::{root_revision, MemoryDatabase};
pub use model::{ChangeEntry, ProposedChangeStatus, RevFlags, RevToInsert};

pub use replicator_base::{err, Error, Result};
