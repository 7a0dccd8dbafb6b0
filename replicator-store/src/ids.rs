use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque document identifier. Just a byte string to the replicator;
/// the storage engine assigns and interprets its contents.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct DocId(pub Vec<u8>);

impl DocId {
    pub fn from_str(s: &str) -> Self {
        DocId(s.as_bytes().to_vec())
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

/// A revision identifier, conventionally encoded as `"<generation>-<hex
/// digest>"`. Kept as the opaque byte string the wire format carries, with
/// `generation()`/`digest()` parsing it lazily -- ancestor search and
/// conflict detection need the generation number, nothing else interprets
/// the digest.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RevId(pub Vec<u8>);

impl RevId {
    pub fn new(generation: u64, digest: &str) -> Self {
        RevId(format!("{generation}-{digest}").into_bytes())
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn generation(&self) -> Option<u64> {
        let s = self.as_str()?;
        let (gen, _) = s.split_once('-')?;
        gen.parse().ok()
    }

    pub fn digest(&self) -> Option<&str> {
        let s = self.as_str()?;
        let (_, digest) = s.split_once('-')?;
        Some(digest)
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().unwrap_or("<invalid rev id>"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_rev_id_generation_and_digest() {
        let r = RevId::new(3, "abcd1234");
        assert_eq!(r.generation(), Some(3));
        assert_eq!(r.digest(), Some("abcd1234"));
        assert_eq!(r.to_string(), "3-abcd1234");
    }

    #[test]
    fn test_rev_id_ordering_is_byte_order_not_generation_order() {
        // RevIds sort as byte strings; callers that need generation order
        // must sort by `generation()` explicitly. Pinning this avoids a
        // regression where someone assumes `Ord` means numeric order.
        let r10 = RevId::new(10, "x");
        let r9 = RevId::new(9, "x");
        assert!(r10 < r9); // "10-x" < "9-x" lexicographically
    }
}
