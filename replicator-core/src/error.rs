use replicator_store::{DocId, RevId};
use std::fmt;

/// The replication-specific error taxonomy of §7, layered over
/// `replicator_base::Error` for everything that doesn't need its own
/// variant. Transient/document-conflict/cancellation are expected and
/// handled; the rest stop the replicator.
#[derive(Debug)]
pub enum ReplError {
    /// Transport hiccup; retry with backoff.
    Transient(replicator_base::Error),
    /// Credentials rejected; surfaced to the embedder, replicator stops.
    Authentication(replicator_base::Error),
    /// Local and remote checkpoints disagree; reset and resume from zero.
    CheckpointConflict,
    /// One or more documents ended up with multiple leaves after an
    /// insert batch. Reported, never fatal.
    DocumentConflict { doc_ids: Vec<DocId> },
    /// The peer sent something the protocol doesn't allow; fatal.
    MalformedMessage(replicator_base::Error),
    /// The local database itself failed (not a protocol condition).
    LocalIo(replicator_base::Error),
    /// Shutdown was requested; not a failure.
    Cancelled,
}

impl fmt::Display for ReplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplError::Transient(e) => write!(f, "transient transport error: {e:?}"),
            ReplError::Authentication(e) => write!(f, "authentication failed: {e:?}"),
            ReplError::CheckpointConflict => write!(f, "checkpoint conflict, resetting"),
            ReplError::DocumentConflict { doc_ids } => {
                write!(f, "conflict on {} document(s)", doc_ids.len())
            }
            ReplError::MalformedMessage(e) => write!(f, "malformed message: {e:?}"),
            ReplError::LocalIo(e) => write!(f, "local database error: {e:?}"),
            ReplError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for ReplError {}

impl From<replicator_base::Error> for ReplError {
    fn from(e: replicator_base::Error) -> ReplError {
        ReplError::LocalIo(e)
    }
}

/// Classifies an error raised while pushing or pulling a single revision,
/// for the rev-level `RevFailure` surfaced through progress callbacks
/// rather than failing the whole replication (§7 Propagation).
#[derive(Clone, Debug)]
pub struct RevFailure {
    pub doc_id: DocId,
    pub rev_id: RevId,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, ReplError>;

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_document_conflict_display() {
        let e = ReplError::DocumentConflict {
            doc_ids: vec![DocId::from_str("a"), DocId::from_str("b")],
        };
        assert_eq!(e.to_string(), "conflict on 2 document(s)");
    }

    #[test]
    fn test_local_io_from_base_error() {
        let base_err = replicator_base::err("disk full");
        let e: ReplError = base_err.into();
        assert!(matches!(e, ReplError::LocalIo(_)));
    }
}
