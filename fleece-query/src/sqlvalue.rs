use fleece::Value;

/// The conventional SQL scalar types a host function returns. `Blob(vec![])`
/// is the conventional representation of a Fleece `null` (present-but-null),
/// distinct from `Null`, which represents "missing" -- no such path,
/// argument, or row. Getting this distinction right is what `fl_value`'s
/// null-vs-missing test pins (spec §8).
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Converts a resolved (non-missing) Fleece value to its SQL
    /// representation. A Fleece `null` becomes the empty blob; arrays and
    /// dicts are re-encoded as a blob of their own Fleece bytes, since SQL
    /// has no native compound type for them.
    pub fn from_fleece(v: &Value) -> SqlValue {
        match v {
            Value::Null => SqlValue::Blob(Vec::new()),
            Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
            Value::Int(i) => SqlValue::Integer(*i),
            Value::Float(f) => SqlValue::Real(f.0),
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Data(d) => SqlValue::Blob(d.clone()),
            Value::Array(_) | Value::Dict(_) => SqlValue::Blob(fleece::encode(v)),
        }
    }

    pub fn is_fleece_null(&self) -> bool {
        matches!(self, SqlValue::Blob(b) if b.is_empty())
    }

    pub fn is_sql_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// True for either kind of "empty" result a `*if` function checks:
    /// SQL NULL (missing) or the Fleece-null empty blob.
    pub fn is_null_or_missing(&self) -> bool {
        self.is_sql_null() || self.is_fleece_null()
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) => Some(*f as i64),
            SqlValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) => Some(b),
            _ => None,
        }
    }
}
