#![allow(dead_code)]

// Fleece is the self-describing, pointer-tagged binary encoding documents
// are stored in. Everything upstream of this crate (the revision tree, the
// replicator, the SQL bridge) treats a document body as an opaque `[u8]`
// that this crate can parse into a `Value` tree, and a `Value` tree as
// something this crate can re-encode back to bytes.
//
// Real Fleece additionally supports a pointer-tagged, back-reference-heavy
// wire form and a per-database shared key dictionary that shrinks common
// dict keys to small integers. We keep the dictionary (`SharedKeys`) since
// callers above us reason about it, but the encoding itself is a plain
// tag-prefixed tree: the on-disk compactness tricks are out of scope here,
// only the typed-value-access contract matters to callers.

mod encode;
mod path;
mod value;

pub use encode::{decode, encode};
pub use path::{Path, PathComponent};
pub use value::{SharedKeys, Value};

pub use replicator_base::{err, Error, Result};
