use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parsed Fleece value tree. Dicts are kept as `BTreeMap<String, Value>`
/// rather than an insertion-ordered map: nothing in this workspace needs to
/// round-trip key order, and the ordering is convenient for `array_sum`-style
/// aggregates that want a stable iteration order for tests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    String(String),
    Data(Vec<u8>),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

/// Integer type tags surfaced to SQL by `fl_type`. Values chosen to match
/// the ordering a reader would expect from least- to most-structured.
pub const TYPE_NULL: i64 = 0;
pub const TYPE_BOOL: i64 = 1;
pub const TYPE_INT: i64 = 2;
pub const TYPE_FLOAT: i64 = 3;
pub const TYPE_STRING: i64 = 4;
pub const TYPE_DATA: i64 = 5;
pub const TYPE_ARRAY: i64 = 6;
pub const TYPE_DICT: i64 = 7;

impl Value {
    pub fn type_tag(&self) -> i64 {
        match self {
            Value::Null => TYPE_NULL,
            Value::Bool(_) => TYPE_BOOL,
            Value::Int(_) => TYPE_INT,
            Value::Float(_) => TYPE_FLOAT,
            Value::String(_) => TYPE_STRING,
            Value::Data(_) => TYPE_DATA,
            Value::Array(_) => TYPE_ARRAY,
            Value::Dict(_) => TYPE_DICT,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(f.0 as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(f.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Element count for `fl_count`: array length or dict key count, `None`
    /// (surfaced by the caller as SQL NULL) for any other type.
    pub fn count(&self) -> Option<i64> {
        match self {
            Value::Array(a) => Some(a.len() as i64),
            Value::Dict(d) => Some(d.len() as i64),
            _ => None,
        }
    }

    /// Children of an array or dict, in iteration order. Empty for scalars.
    pub fn children(&self) -> Vec<&Value> {
        match self {
            Value::Array(a) => a.iter().collect(),
            Value::Dict(d) => d.values().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(OrderedFloat(f))
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

/// Maps small integer ids to property names, the way a real per-database
/// Fleece shared-key table shrinks common dict keys on the wire. `Value`
/// itself never stores these ids: the table only matters to the encoder, so
/// that two databases with differently-ordered dictionaries still produce
/// byte-identical encodings is *not* claimed or required here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharedKeys {
    by_id: Vec<String>,
    by_name: BTreeMap<String, u16>,
}

impl SharedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning its id (allocating a new one if unseen).
    pub fn intern(&mut self, name: &str) -> u16 {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = self.by_id.len() as u16;
        self.by_id.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn name(&self, id: u16) -> Option<&str> {
        self.by_id.get(id as usize).map(|s| s.as_str())
    }

    pub fn id(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_type_tags_distinct() {
        let vals = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(1),
            Value::Float(OrderedFloat(1.0)),
            Value::String("x".into()),
            Value::Data(vec![1]),
            Value::Array(vec![]),
            Value::Dict(BTreeMap::new()),
        ];
        let mut tags: Vec<i64> = vals.iter().map(|v| v.type_tag()).collect();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), vals.len());
    }

    #[test]
    fn test_shared_keys_intern_is_stable() {
        let mut sk = SharedKeys::new();
        let a = sk.intern("name");
        let b = sk.intern("age");
        let a2 = sk.intern("name");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(sk.name(a), Some("name"));
        assert_eq!(sk.id("age"), Some(b));
    }

    #[test]
    fn test_count_and_children() {
        let mut d = BTreeMap::new();
        d.insert("a".to_string(), Value::Int(1));
        d.insert("b".to_string(), Value::Int(2));
        let v = Value::Dict(d);
        assert_eq!(v.count(), Some(2));
        assert_eq!(v.children().len(), 2);
        assert_eq!(Value::Int(3).count(), None);
    }
}
