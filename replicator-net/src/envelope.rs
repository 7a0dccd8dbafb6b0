use crate::msg::{Msg, Profile, Properties};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// On-wire representation of a [`Msg`]. The property dictionary is
/// JSON-encoded, then DEFLATE-compressed, matching §6's "compressed
/// property dictionary" -- bodies are left uncompressed since they're
/// already a mix of JSON and opaque document bytes the caller controls.
/// The whole envelope is framed with `rmp_serde`, a fixed-field envelope
/// style for a src/dst/sequence header.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    profile: Profile,
    sequence: u64,
    response: bool,
    properties_deflated: Vec<u8>,
    body: Option<Vec<u8>>,
}

fn deflate(bytes: &[u8]) -> crate::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| replicator_base::err(e.to_string()))?;
    encoder.finish().map_err(|e| replicator_base::err(e.to_string()))
}

fn inflate(bytes: &[u8]) -> crate::Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| replicator_base::err(e.to_string()))?;
    Ok(out)
}

/// Serializes a message to the bytes that would cross the wire.
pub fn encode_msg(msg: &Msg) -> crate::Result<Vec<u8>> {
    let properties_json =
        serde_json::to_vec(&msg.properties).map_err(|e| replicator_base::err(e.to_string()))?;
    let envelope = WireEnvelope {
        profile: msg.profile,
        sequence: msg.sequence,
        response: msg.response,
        properties_deflated: deflate(&properties_json)?,
        body: msg.body.clone(),
    };
    rmp_serde::to_vec(&envelope).map_err(|e| replicator_base::err(e.to_string()))
}

/// Parses bytes received from the wire back into a [`Msg`].
pub fn decode_msg(bytes: &[u8]) -> crate::Result<Msg> {
    let envelope: WireEnvelope =
        rmp_serde::from_slice(bytes).map_err(|e| replicator_base::err(e.to_string()))?;
    let properties_json = inflate(&envelope.properties_deflated)?;
    let properties: Properties =
        serde_json::from_slice(&properties_json).map_err(|e| replicator_base::err(e.to_string()))?;
    Ok(Msg {
        profile: envelope.profile,
        sequence: envelope.sequence,
        response: envelope.response,
        properties,
        body: envelope.body,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_encode_decode_round_trip_preserves_everything() {
        let mut props = Properties::new();
        props.insert("client".to_string(), "ckpt-123".to_string());
        let msg = Msg::request(Profile::GetCheckpoint, 5, props, Some(b"hello".to_vec()));

        let bytes = encode_msg(&msg).unwrap();
        let back = decode_msg(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_properties_are_actually_compressed() {
        let mut props = Properties::new();
        props.insert("since".to_string(), "0".repeat(200));
        let msg = Msg::request(Profile::Changes, 1, props, None);
        let bytes = encode_msg(&msg).unwrap();
        // A crude sanity check that deflate is doing something: the
        // repeated value compresses to much less than its raw length.
        assert!(bytes.len() < 200);
    }

    #[test]
    fn test_decode_garbage_errors_instead_of_panicking() {
        assert!(decode_msg(&[0xff, 0x00, 0x01]).is_err());
    }
}
