use super::{FunctionRegistry, ScalarFn};
use crate::sqlvalue::SqlValue;
use crate::Result;
use fleece::Value;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.register("fl_value", ScalarFn::OnPath(fl_value));
    reg.register("fl_exists", ScalarFn::OnPath(fl_exists));
    reg.register("fl_type", ScalarFn::OnPath(fl_type));
    reg.register("fl_count", ScalarFn::OnPath(fl_count));
    reg.register("fl_contains", ScalarFn::OnPath(fl_contains));
}

fn fl_value(_root: &Value, path_val: Option<&Value>, _rest: &[SqlValue]) -> Result<SqlValue> {
    Ok(match path_val {
        Some(v) => SqlValue::from_fleece(v),
        None => SqlValue::Null,
    })
}

fn fl_exists(_root: &Value, path_val: Option<&Value>, _rest: &[SqlValue]) -> Result<SqlValue> {
    Ok(SqlValue::Integer(if path_val.is_some() { 1 } else { 0 }))
}

fn fl_type(_root: &Value, path_val: Option<&Value>, _rest: &[SqlValue]) -> Result<SqlValue> {
    Ok(SqlValue::Integer(path_val.map_or(-1, |v| v.type_tag())))
}

fn fl_count(_root: &Value, path_val: Option<&Value>, _rest: &[SqlValue]) -> Result<SqlValue> {
    Ok(match path_val.and_then(|v| v.count()) {
        Some(c) => SqlValue::Integer(c),
        None => SqlValue::Null,
    })
}

/// `fl_contains(body, path, all?, v1, ...)`: 1 iff the array at `path`
/// contains any (or, when `all?` is truthy, all) of the trailing values.
/// NULL when the path is missing or doesn't resolve to an array.
fn fl_contains(_root: &Value, path_val: Option<&Value>, rest: &[SqlValue]) -> Result<SqlValue> {
    let Some(array) = path_val.and_then(|v| v.as_array()) else {
        return Ok(SqlValue::Null);
    };
    let Some((all_flag, wanted)) = rest.split_first() else {
        return Ok(SqlValue::Integer(0));
    };
    let all = all_flag.as_i64().unwrap_or(0) != 0;
    let elements: Vec<SqlValue> = array.iter().map(SqlValue::from_fleece).collect();
    let found = |want: &SqlValue| elements.iter().any(|e| e == want);
    let result = if all {
        wanted.iter().all(found)
    } else {
        wanted.iter().any(found)
    };
    Ok(SqlValue::Integer(if result { 1 } else { 0 }))
}
