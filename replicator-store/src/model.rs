use crate::ids::{DocId, RevId};
use serde::{Deserialize, Serialize};

/// A single entry in a database's change log, as produced by `changes_since`
/// and consumed by the Pusher.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub sequence: u64,
    pub doc_id: DocId,
    pub rev_id: RevId,
    pub deleted: bool,
    pub body_size: usize,
    /// A few of this revision's nearest ancestors, nearest first, offered
    /// so the receiving side's `find_ancestors` can tell us which of them
    /// it already has and let us send a smaller delta.
    #[serde(default)]
    pub possible_ancestors: Vec<RevId>,
}

/// Per-revision flags carried alongside a revision body. Three booleans
/// don't warrant a bitmap; plain fields read better at call sites.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RevFlags {
    pub deleted: bool,
    pub has_attachments: bool,
    pub no_conflicts: bool,
}

/// A revision the Puller has fetched from the remote and wants the local
/// database to insert, along with the ancestor chain needed to graft it
/// onto the existing revision tree.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RevToInsert {
    pub doc_id: DocId,
    pub rev_id: RevId,
    pub body: Vec<u8>,
    /// Ancestor rev IDs, nearest first, as sent by the remote's revision
    /// history list.
    pub history: Vec<RevId>,
    pub flags: RevFlags,
    /// The remote this revision was pulled from, if any -- carried through
    /// to the commit step so a successful insert can mark it synced for
    /// that remote without the caller having to wait on the batch.
    #[serde(default)]
    pub source_remote: Option<String>,
}

/// Outcome of proposing a change to a remote database, mirroring the
/// status codes a real sync gateway would send back.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProposedChangeStatus {
    /// Remote doesn't have it; send the revision body.
    Wanted,
    /// Remote already has this exact revision.
    AlreadyHave,
    /// Remote has a conflicting revision at the same generation or a
    /// revision whose parent doesn't match the pushed one (HTTP 409-style).
    Conflict,
    /// Remote rejects the change outright, e.g. due to access control
    /// (HTTP 403-style).
    Forbidden,
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_rev_flags_default_is_all_false() {
        let f = RevFlags::default();
        assert!(!f.deleted);
        assert!(!f.has_attachments);
        assert!(!f.no_conflicts);
    }

    #[test]
    fn test_change_entry_roundtrips_through_rmp() {
        let e = ChangeEntry {
            sequence: 42,
            doc_id: DocId::from_str("doc1"),
            rev_id: RevId::new(1, "abc"),
            deleted: false,
            body_size: 128,
            possible_ancestors: vec![RevId::new(1, "abc")],
        };
        let bytes = rmp_serde::to_vec(&e).unwrap();
        let back: ChangeEntry = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(e, back);
    }
}
