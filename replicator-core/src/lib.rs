#![allow(dead_code)]

// replicator-core is Core A: the Replicator and its cooperating actors
// (§4). Every sub-actor is its own module; `replicator.rs` is the
// coordinator an embedder actually talks to.

mod checkpoint_store;
mod cookie;
mod dbactor;
mod error;
mod insert_batcher;
mod protocol;
mod puller;
mod pusher;
mod replicator;
mod router;
mod status;

pub use checkpoint_store::CheckpointStore;
pub use cookie::{parse_cookie, Cookie, CookieStore};
pub use dbactor::{DBActorHandle, DBActorThread};
pub use error::{ReplError, Result as ReplResult, RevFailure};
pub use protocol::{prop, ChangesBody, ChangesResponseEntry};
pub use puller::{Puller, PullerConfig};
pub use pusher::{Pusher, PusherConfig};
pub use replicator::{Replicator, ReplicatorDirection, ReplicatorOptions};
pub use router::Router;
pub use status::{Activity, ActivityHandle, ErrorSlot, Progress, ReplicatorStatus, TransferTracker};
