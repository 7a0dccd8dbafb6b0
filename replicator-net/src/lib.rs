#![allow(dead_code)]

// replicator-net stands in for the out-of-scope framed transport: a
// full-duplex, message-ordered connection carrying request/response pairs
// with a compressed property dictionary and an optional streaming body.
// `replicator-core`'s Pusher/Puller only ever depend on the `Connection`
// trait; `LoopbackConnection` is the in-memory pair used by tests.

mod connection;
mod envelope;
mod loopback;
mod msg;

pub use connection::{Connection, Progress};
pub use envelope::{decode_msg, encode_msg};
pub use loopback::LoopbackConnection;
pub use msg::{Msg, Profile, Properties};

pub use replicator_base::{err, Error, Result};
