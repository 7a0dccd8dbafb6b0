use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A wire message's property dictionary. Properties are always small
/// textual key/value pairs (profile-specific metadata like `client`,
/// `since`, `rev`); the document/changes payload itself lives in `body`.
pub type Properties = BTreeMap<String, String>;

/// The type tag of a wire message, matching §6's protocol table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Profile {
    GetCheckpoint,
    SetCheckpoint,
    SubChanges,
    Changes,
    ProposedChanges,
    Rev,
    NoRev,
}

/// A single message on the framed transport: a profile tag, a sequence
/// number pairing requests with replies, a property dictionary, and an
/// optional body. The body is whatever JSON-encoded payload §6 specifies
/// for that profile (a changes array, a checkpoint document, a revision's
/// encoded body) -- `replicator-net` never interprets it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    pub profile: Profile,
    pub sequence: u64,
    pub response: bool,
    pub properties: Properties,
    pub body: Option<Vec<u8>>,
}

impl Msg {
    pub fn request(profile: Profile, sequence: u64, properties: Properties, body: Option<Vec<u8>>) -> Msg {
        Msg {
            profile,
            sequence,
            response: false,
            properties,
            body,
        }
    }

    pub fn reply(&self, properties: Properties, body: Option<Vec<u8>>) -> Msg {
        Msg {
            profile: self.profile,
            sequence: self.sequence,
            response: true,
            properties,
            body,
        }
    }

    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> crate::Result<Option<T>> {
        match &self.body {
            Some(bytes) => {
                let value = serde_json::from_slice(bytes)
                    .map_err(|e| replicator_base::err(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn with_json_body<T: serde::Serialize>(mut self, body: &T) -> crate::Result<Msg> {
        self.body = Some(serde_json::to_vec(body).map_err(|e| replicator_base::err(e.to_string()))?);
        Ok(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_reply_preserves_profile_and_sequence() {
        let req = Msg::request(Profile::GetCheckpoint, 7, Properties::new(), None);
        let res = req.reply(Properties::new(), None);
        assert_eq!(res.profile, Profile::GetCheckpoint);
        assert_eq!(res.sequence, 7);
        assert!(res.response);
        assert!(!req.response);
    }

    #[test]
    fn test_json_body_round_trip() {
        let msg = Msg::request(Profile::Changes, 1, Properties::new(), None)
            .with_json_body(&vec![1, 2, 3])
            .unwrap();
        let decoded: Option<Vec<i32>> = msg.body_json().unwrap();
        assert_eq!(decoded, Some(vec![1, 2, 3]));
    }
}
