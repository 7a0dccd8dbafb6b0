use super::{FunctionRegistry, ScalarFn};
use crate::sqlvalue::SqlValue;
use crate::Result;
use fleece::Value;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.register("array_sum", ScalarFn::OnValues(array_sum));
    reg.register("array_avg", ScalarFn::OnValues(array_avg));
    reg.register("array_min", ScalarFn::OnValues(array_min));
    reg.register("array_max", ScalarFn::OnValues(array_max));
    reg.register("array_count", ScalarFn::OnValues(array_count));
    reg.register("array_length", ScalarFn::OnValues(array_count));
    reg.register("array_contains", ScalarFn::OnValues(array_contains));
    reg.register("array_ifnull", ScalarFn::OnValues(array_ifnull));
}

/// Each argument is expected to be a `SqlValue::Blob` of Fleece-encoded
/// bytes decoding to an `Array` (the shape `fl_value` returns for a
/// path that resolves to an array). Non-array or unparseable arguments are
/// skipped rather than erroring, since a caller might pass a scalar
/// `fl_value` result by mistake and an aggregate over "no elements" is a
/// well-defined empty aggregate.
fn flatten_elements(args: &[SqlValue]) -> Vec<Value> {
    let mut out = Vec::new();
    for arg in args {
        if let SqlValue::Blob(bytes) = arg {
            if bytes.is_empty() {
                continue;
            }
            if let Ok(v) = fleece::decode(bytes) {
                if let Value::Array(items) = v {
                    out.extend(items);
                }
            }
        }
    }
    out
}

fn flatten_numbers(args: &[SqlValue]) -> Vec<f64> {
    flatten_elements(args)
        .iter()
        .filter_map(|v| v.as_f64())
        .collect()
}

fn array_sum(args: &[SqlValue]) -> Result<SqlValue> {
    Ok(SqlValue::Real(flatten_numbers(args).iter().sum()))
}

fn array_avg(args: &[SqlValue]) -> Result<SqlValue> {
    let nums = flatten_numbers(args);
    if nums.is_empty() {
        return Ok(SqlValue::Null);
    }
    Ok(SqlValue::Real(nums.iter().sum::<f64>() / nums.len() as f64))
}

fn array_min(args: &[SqlValue]) -> Result<SqlValue> {
    let nums = flatten_numbers(args);
    match nums.into_iter().reduce(f64::min) {
        Some(m) => Ok(SqlValue::Real(m)),
        None => Ok(SqlValue::Null),
    }
}

fn array_max(args: &[SqlValue]) -> Result<SqlValue> {
    let nums = flatten_numbers(args);
    match nums.into_iter().reduce(f64::max) {
        Some(m) => Ok(SqlValue::Real(m)),
        None => Ok(SqlValue::Null),
    }
}

fn array_count(args: &[SqlValue]) -> Result<SqlValue> {
    Ok(SqlValue::Integer(flatten_elements(args).len() as i64))
}

/// `array_contains(needle, arr1, arr2, ...)`: 1 iff `needle` equals any
/// element across the flattened arrays.
fn array_contains(args: &[SqlValue]) -> Result<SqlValue> {
    let Some((needle, arrays)) = args.split_first() else {
        return Ok(SqlValue::Integer(0));
    };
    let elements = flatten_elements(arrays);
    let found = elements
        .iter()
        .any(|e| SqlValue::from_fleece(e) == *needle);
    Ok(SqlValue::Integer(if found { 1 } else { 0 }))
}

/// First element, across the flattened arrays, that is neither SQL NULL
/// nor Fleece-null; `SqlValue::Null` if every element is empty or there are
/// no elements at all.
fn array_ifnull(args: &[SqlValue]) -> Result<SqlValue> {
    for v in flatten_elements(args) {
        let sv = SqlValue::from_fleece(&v);
        if !sv.is_null_or_missing() {
            return Ok(sv);
        }
    }
    Ok(SqlValue::Null)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn array_arg(nums: &[i64]) -> SqlValue {
        let v = Value::Array(nums.iter().map(|n| Value::Int(*n)).collect());
        SqlValue::Blob(fleece::encode(&v))
    }

    #[test]
    fn test_array_sum_avg_min_max() {
        let a = array_arg(&[1, 2, 3]);
        let b = array_arg(&[10]);
        assert_eq!(array_sum(&[a.clone(), b.clone()]).unwrap(), SqlValue::Real(16.0));
        assert_eq!(array_avg(&[a.clone()]).unwrap(), SqlValue::Real(2.0));
        assert_eq!(array_min(&[a.clone(), b.clone()]).unwrap(), SqlValue::Real(1.0));
        assert_eq!(array_max(&[a, b]).unwrap(), SqlValue::Real(10.0));
    }

    #[test]
    fn test_array_aggregates_empty_is_null() {
        let empty = SqlValue::Blob(fleece::encode(&Value::Array(vec![])));
        assert_eq!(array_avg(&[empty.clone()]).unwrap(), SqlValue::Null);
        assert_eq!(array_min(&[empty.clone()]).unwrap(), SqlValue::Null);
        assert_eq!(array_max(&[empty]).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_array_contains_and_count() {
        let a = array_arg(&[1, 2, 3]);
        assert_eq!(
            array_contains(&[SqlValue::Integer(2), a.clone()]).unwrap(),
            SqlValue::Integer(1)
        );
        assert_eq!(
            array_contains(&[SqlValue::Integer(9), a.clone()]).unwrap(),
            SqlValue::Integer(0)
        );
        assert_eq!(array_count(&[a]).unwrap(), SqlValue::Integer(3));
    }
}
