use super::{FunctionRegistry, ScalarFn};
use crate::sqlvalue::SqlValue;
use crate::Result;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.register("missingif", ScalarFn::OnValues(missingif));
    reg.register("nullif", ScalarFn::OnValues(nullif));
    reg.register("nanif", ScalarFn::OnValues(nanif));
    reg.register("neginfif", ScalarFn::OnValues(neginfif));
    reg.register("posinfif", ScalarFn::OnValues(posinfif));
    reg.register("ifinf", ScalarFn::OnValues(ifinf));
    reg.register("ifnan", ScalarFn::OnValues(ifnan));
    reg.register("ifnanorinf", ScalarFn::OnValues(ifnanorinf));
}

fn two(args: &[SqlValue]) -> Result<(&SqlValue, &SqlValue)> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(crate::err("expected exactly two arguments")),
    }
}

/// Shared machinery for `missingif`/`nullif`/`nanif`/`neginfif`/`posinfif`.
///
/// The corrected semantics (spec §9 Open Question): if either operand is
/// empty -- SQL NULL or Fleece-null -- return SQL NULL immediately, *without*
/// falling through to the equality comparison. The source this was ported
/// from sets NULL on that case but keeps executing the comparison anyway,
/// which can silently override the NULL with the sentinel value when the
/// non-empty operand happens to equal the empty one under the comparison's
/// coercion rules. We return early instead.
fn empty_short_circuit_then_eq(a: &SqlValue, b: &SqlValue, sentinel: SqlValue) -> SqlValue {
    if a.is_null_or_missing() || b.is_null_or_missing() {
        return SqlValue::Null;
    }
    if a == b {
        sentinel
    } else {
        a.clone()
    }
}

fn missingif(args: &[SqlValue]) -> Result<SqlValue> {
    let (a, b) = two(args)?;
    Ok(empty_short_circuit_then_eq(a, b, SqlValue::Null))
}

fn nullif(args: &[SqlValue]) -> Result<SqlValue> {
    let (a, b) = two(args)?;
    Ok(empty_short_circuit_then_eq(a, b, SqlValue::Blob(Vec::new())))
}

fn nanif(args: &[SqlValue]) -> Result<SqlValue> {
    let (a, b) = two(args)?;
    Ok(empty_short_circuit_then_eq(a, b, SqlValue::Real(f64::NAN)))
}

fn neginfif(args: &[SqlValue]) -> Result<SqlValue> {
    let (a, b) = two(args)?;
    Ok(empty_short_circuit_then_eq(
        a,
        b,
        SqlValue::Real(f64::NEG_INFINITY),
    ))
}

fn posinfif(args: &[SqlValue]) -> Result<SqlValue> {
    let (a, b) = two(args)?;
    Ok(empty_short_circuit_then_eq(a, b, SqlValue::Real(f64::INFINITY)))
}

fn first_not(args: &[SqlValue], bad: fn(f64) -> bool) -> SqlValue {
    for a in args {
        if let Some(f) = a.as_f64() {
            if !bad(f) {
                return SqlValue::Real(f);
            }
        }
    }
    SqlValue::Null
}

fn ifinf(args: &[SqlValue]) -> Result<SqlValue> {
    Ok(first_not(args, f64::is_infinite))
}

fn ifnan(args: &[SqlValue]) -> Result<SqlValue> {
    Ok(first_not(args, f64::is_nan))
}

fn ifnanorinf(args: &[SqlValue]) -> Result<SqlValue> {
    Ok(first_not(args, |f| f.is_nan() || f.is_infinite()))
}
