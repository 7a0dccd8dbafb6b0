#![allow(dead_code)]

//! Top-level facade: re-exports the replicator's public surface and the
//! Fleece query bridge so an embedding application depends on one crate
//! rather than wiring up `replicator-core`/`replicator-store`/
//! `replicator-net`/`fleece`/`fleece-query` individually.

pub use replicator_base::{err, Error, Result};

pub use replicator_core::{
    parse_cookie, Activity, ActivityHandle, ChangesResponseEntry, CheckpointStore, Cookie, CookieStore,
    DBActorHandle, DBActorThread, Progress, ReplError, ReplicatorDirection, ReplicatorOptions,
    ReplicatorStatus, RevFailure,
};
pub use replicator_core::Replicator;

pub use replicator_net::{Connection, LoopbackConnection, Msg, Profile, Properties};

pub use replicator_store::{
    checkpoint_key, ChangeEntry, Checkpoint, Database, DocId, MemoryDatabase, ProposedChangeStatus, RevFlags,
    RevId, RevToInsert, StoredRevision,
};

pub use fleece::{decode as decode_fleece, encode as encode_fleece, Path, PathComponent, SharedKeys, Value};

pub use fleece_query::{evaluate_path, resolve_body, FunctionRegistry, RowAccessor, ScalarFn, SqlArg, SqlValue};

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use test_log::test;

    #[test]
    fn test_facade_wires_a_loopback_replication() {
        let db_a: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let (conn_a, _conn_b) = LoopbackConnection::pair();
        let options = ReplicatorOptions {
            local_uuid: "local".into(),
            remote_url: "peer".into(),
            options_digest: "d".into(),
            direction: ReplicatorDirection::Push,
            ..ReplicatorOptions::default()
        };
        let repl = Replicator::start(db_a, Arc::new(conn_a), options);
        assert!(matches!(repl.status().activity, Activity::Idle | Activity::Busy));
        repl.stop();
    }

    #[test]
    fn test_facade_exposes_fleece_query_path_evaluation() {
        let body = encode_fleece(&{
            let mut d = std::collections::BTreeMap::new();
            d.insert("name".to_string(), Value::String("doc".into()));
            Value::Dict(d)
        });
        let root = decode_fleece(&body).unwrap();
        assert_eq!(
            evaluate_path("name", None, &root).unwrap(),
            SqlValue::Text("doc".into())
        );
    }
}
