use crate::{err, Result};
use fleece::Value;
use std::sync::Arc;

/// A closure extracting a document's encoded Fleece bytes from an opaque
/// row body, used by the `Raw` adapter form. Takes the row bytes, returns
/// the encoded document bytes found within.
pub type RowAccessor<'a> = &'a dyn Fn(&[u8]) -> Result<Vec<u8>>;

/// The three forms the first argument to a path-taking host function can
/// take, per spec §4.6:
///
/// 1. `Direct` -- a subtype-tagged pointer to an already-parsed value tree,
///    used when one host function's result feeds directly into another
///    within the same query, without a re-encode/re-parse round trip.
/// 2. `EncodedBlob` -- a subtype-tagged blob holding Fleece-encoded bytes.
/// 3. `RawRow` -- a generic blob interpreted as a row body via a
///    caller-supplied accessor that extracts the document's encoded value.
#[derive(Clone, Debug)]
pub enum SqlArg {
    Direct(Arc<Value>),
    EncodedBlob(Vec<u8>),
    RawRow(Vec<u8>),
}

/// Resolves any of the three argument forms to a parsed value tree.
/// `accessor` is required (and only consulted) for the `RawRow` form;
/// passing `None` for a `RawRow` argument is a caller error.
pub fn resolve_body(arg: &SqlArg, accessor: Option<RowAccessor>) -> Result<Arc<Value>> {
    match arg {
        SqlArg::Direct(v) => Ok(v.clone()),
        SqlArg::EncodedBlob(bytes) => Ok(Arc::new(fleece::decode(bytes)?)),
        SqlArg::RawRow(row) => {
            let accessor = accessor.ok_or_else(|| {
                err("row-body argument requires a row accessor, none was supplied")
            })?;
            let doc_bytes = accessor(row)?;
            Ok(Arc::new(fleece::decode(&doc_bytes)?))
        }
    }
}
