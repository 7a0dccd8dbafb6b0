use replicator_store::{ChangeEntry, RevId};
use serde::{Deserialize, Serialize};

/// One element of a reply to a `changes` message (§6): either the literal
/// `0` (not wanted) or an array of known ancestor rev IDs (`[]` if wanted
/// but none are known). Modeled as an untagged enum so it serializes
/// exactly as the wire table describes, rather than as a tagged variant.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangesResponseEntry {
    NotWanted(u8),
    Wanted(Vec<RevId>),
}

impl ChangesResponseEntry {
    pub fn not_wanted() -> ChangesResponseEntry {
        ChangesResponseEntry::NotWanted(0)
    }

    pub fn wanted(known_ancestors: Vec<RevId>) -> ChangesResponseEntry {
        ChangesResponseEntry::Wanted(known_ancestors)
    }

    pub fn is_wanted(&self) -> bool {
        matches!(self, ChangesResponseEntry::Wanted(_))
    }
}

/// Body of a `changes` message: the batch of change-feed entries the
/// sender is proposing, in sequence order.
pub type ChangesBody = Vec<ChangeEntry>;

/// Wire property keys used across profiles (§6). Kept as named constants
/// rather than inline literals so the handful of places that build and
/// parse properties can't drift out of sync with each other.
pub mod prop {
    pub const CLIENT: &str = "client";
    pub const ID: &str = "id";
    pub const REV: &str = "rev";
    pub const DELETED: &str = "deleted";
    pub const HISTORY: &str = "history";
    pub const SEQUENCE: &str = "sequence";
    pub const ERROR: &str = "error";
    /// Cookie header attached to an outgoing request, built from the
    /// sender's cookie store (§4.5, §6 "Cookies in a reserved per-remote
    /// document").
    pub const COOKIE: &str = "cookie";
    /// Set-Cookie header a responder attaches to hand a new cookie back
    /// to the requester.
    pub const SET_COOKIE: &str = "set-cookie";
}
