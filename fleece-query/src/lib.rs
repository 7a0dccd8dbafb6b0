#![allow(dead_code)]

// fleece-query is the host-function side of the Fleece/SQL bridge: it lets
// an embedded SQL engine index and filter documents without first
// materializing them to JSON. None of this crate talks to a real SQL
// engine's C API -- spec excludes SQL parsing and the engine FFI from
// scope -- so `FunctionRegistry` is a plain name-to-function table an
// embedder wires into whatever engine it has.

mod adapter;
mod functions;
mod sqlvalue;

pub use adapter::{resolve_body, RowAccessor, SqlArg};
pub use functions::{FunctionRegistry, ScalarFn};
pub use sqlvalue::SqlValue;

pub use replicator_base::{err, Error, Result};

use fleece::{Path, Value};

/// Applies a compiled path to a value root and converts the result to a SQL
/// value: missing is NULL, a present Fleece null is the empty blob, anything
/// else is value-converted by `SqlValue::from_fleece`. `shared_keys` is
/// accepted for signature parity with real Fleece, whose paths can
/// reference shared-key ids directly; `Value` here already carries decoded
/// string keys, so the table is unused.
pub fn evaluate_path(
    path: &str,
    _shared_keys: Option<&fleece::SharedKeys>,
    root: &Value,
) -> Result<SqlValue> {
    let compiled = Path::parse(path)?;
    Ok(match compiled.evaluate(root) {
        Some(v) => SqlValue::from_fleece(v),
        None => SqlValue::Null,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_evaluate_path_null_distinction() {
        let body = fleece::encode(&{
            let mut d = std::collections::BTreeMap::new();
            d.insert("x".to_string(), Value::Null);
            d.insert("y".to_string(), Value::Int(1));
            Value::Dict(d)
        });
        let root = fleece::decode(&body).unwrap();
        assert_eq!(evaluate_path("x", None, &root).unwrap(), SqlValue::Blob(vec![]));
        assert_eq!(evaluate_path("z", None, &root).unwrap(), SqlValue::Null);
        assert_eq!(evaluate_path("y", None, &root).unwrap(), SqlValue::Integer(1));
    }
}
