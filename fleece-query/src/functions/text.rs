use super::{FunctionRegistry, ScalarFn};
use crate::sqlvalue::SqlValue;
use crate::{err, Result};

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.register("base64", ScalarFn::OnValues(base64_encode));
    reg.register("base64_decode", ScalarFn::OnValues(base64_decode));
    reg.register("uuid", ScalarFn::OnValues(uuid_fn));
    reg.register("contains", ScalarFn::OnValues(contains));
    reg.register("regexp_like", ScalarFn::OnValues(regexp_like));
}

fn bytes_of(v: &SqlValue) -> Option<Vec<u8>> {
    match v {
        SqlValue::Blob(b) => Some(b.clone()),
        SqlValue::Text(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}

fn base64_encode(args: &[SqlValue]) -> Result<SqlValue> {
    let [v] = args else {
        return Err(err("base64 takes exactly one argument"));
    };
    let bytes = bytes_of(v).ok_or_else(|| err("base64 argument must be text or blob"))?;
    Ok(SqlValue::Text(base64::encode(bytes)))
}

fn base64_decode(args: &[SqlValue]) -> Result<SqlValue> {
    let [v] = args else {
        return Err(err("base64_decode takes exactly one argument"));
    };
    let text = v
        .as_str()
        .ok_or_else(|| err("base64_decode argument must be text"))?;
    let bytes = base64::decode(text).map_err(|_| err("invalid base64 input"))?;
    Ok(SqlValue::Blob(bytes))
}

fn uuid_fn(args: &[SqlValue]) -> Result<SqlValue> {
    if !args.is_empty() {
        return Err(err("uuid takes no arguments"));
    }
    Ok(SqlValue::Text(uuid::Uuid::new_v4().to_string()))
}

fn contains(args: &[SqlValue]) -> Result<SqlValue> {
    let [haystack, needle] = args else {
        return Err(err("contains takes exactly two arguments"));
    };
    let (Some(h), Some(n)) = (haystack.as_str(), needle.as_str()) else {
        return Ok(SqlValue::Null);
    };
    Ok(SqlValue::Integer(if h.contains(n) { 1 } else { 0 }))
}

fn regexp_like(args: &[SqlValue]) -> Result<SqlValue> {
    let [text, pattern] = args else {
        return Err(err("regexp_like takes exactly two arguments"));
    };
    let (Some(t), Some(p)) = (text.as_str(), pattern.as_str()) else {
        return Ok(SqlValue::Null);
    };
    let re = regex::Regex::new(p).map_err(|_| err("invalid regular expression"))?;
    Ok(SqlValue::Integer(if re.is_match(t) { 1 } else { 0 }))
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_base64_round_trip() {
        let encoded = base64_encode(&[SqlValue::Blob(vec![1, 2, 3])]).unwrap();
        assert_eq!(encoded, SqlValue::Text("AQID".to_string()));
        let decoded = base64_decode(&[encoded]).unwrap();
        assert_eq!(decoded, SqlValue::Blob(vec![1, 2, 3]));
    }

    #[test]
    fn test_uuid_is_unique_and_formatted() {
        let a = uuid_fn(&[]).unwrap();
        let b = uuid_fn(&[]).unwrap();
        assert_ne!(a, b);
        if let SqlValue::Text(s) = a {
            assert_eq!(s.len(), 36);
        } else {
            panic!("expected text");
        }
    }

    #[test]
    fn test_contains_and_regexp_like() {
        let h = SqlValue::Text("hello world".into());
        let n = SqlValue::Text("world".into());
        assert_eq!(contains(&[h.clone(), n]).unwrap(), SqlValue::Integer(1));

        let pat = SqlValue::Text(r"^hello\s+\w+$".into());
        assert_eq!(regexp_like(&[h, pat]).unwrap(), SqlValue::Integer(1));
    }
}
