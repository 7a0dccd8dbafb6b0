use serde::{Deserialize, Serialize};

/// Resumption state for one direction of replication against one remote.
/// Encoded with rmp_serde for storage inside the local database, same as
/// any other small binary blob the replicator persists.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_pushed: u64,
    pub pull_cursor: Option<Vec<u8>>,
}

impl Checkpoint {
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| replicator_base::err(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Checkpoint> {
        rmp_serde::from_slice(bytes).map_err(|e| replicator_base::err(e.to_string()))
    }
}

/// Derives the checkpoint's storage key from the local database identity,
/// the remote URL, and a digest of whatever filter/channel options scope
/// the replication. Two replications against the same remote with
/// different filters must resume independently, hence folding the options
/// digest in rather than keying on URL alone.
pub fn checkpoint_key(local_uuid: &str, remote_url: &str, options_digest: &str) -> String {
    let mut combined = Vec::with_capacity(local_uuid.len() + remote_url.len() + options_digest.len() + 2);
    combined.extend_from_slice(local_uuid.as_bytes());
    combined.push(0);
    combined.extend_from_slice(remote_url.as_bytes());
    combined.push(0);
    combined.extend_from_slice(options_digest.as_bytes());
    let hash = rapidhash::rapidhash(&combined);
    format!("checkpoint/{hash:016x}")
}
