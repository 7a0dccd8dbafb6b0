use super::{FunctionRegistry, ScalarFn};
use crate::sqlvalue::SqlValue;
use crate::Result;

pub(super) fn register(reg: &mut FunctionRegistry) {
    reg.register("abs", ScalarFn::OnValues(|a| unary(a, f64::abs)));
    reg.register("acos", ScalarFn::OnValues(|a| unary(a, f64::acos)));
    reg.register("asin", ScalarFn::OnValues(|a| unary(a, f64::asin)));
    reg.register("atan", ScalarFn::OnValues(|a| unary(a, f64::atan)));
    reg.register("atan2", ScalarFn::OnValues(atan2));
    reg.register("ceil", ScalarFn::OnValues(|a| unary(a, f64::ceil)));
    reg.register("cos", ScalarFn::OnValues(|a| unary(a, f64::cos)));
    reg.register("degrees", ScalarFn::OnValues(|a| unary(a, f64::to_degrees)));
    reg.register("exp", ScalarFn::OnValues(|a| unary(a, f64::exp)));
    reg.register("floor", ScalarFn::OnValues(|a| unary(a, f64::floor)));
    reg.register("ln", ScalarFn::OnValues(|a| unary(a, f64::ln)));
    reg.register("log10", ScalarFn::OnValues(|a| unary(a, f64::log10)));
    reg.register("log2", ScalarFn::OnValues(|a| unary(a, f64::log2)));
    reg.register("pow", ScalarFn::OnValues(pow));
    reg.register("radians", ScalarFn::OnValues(|a| unary(a, f64::to_radians)));
    reg.register("round", ScalarFn::OnValues(|a| unary(a, f64::round)));
    reg.register("sign", ScalarFn::OnValues(|a| unary(a, f64::signum)));
    reg.register("sin", ScalarFn::OnValues(|a| unary(a, f64::sin)));
    reg.register("sqrt", ScalarFn::OnValues(|a| unary(a, f64::sqrt)));
    reg.register("tan", ScalarFn::OnValues(|a| unary(a, f64::tan)));
    reg.register("trunc", ScalarFn::OnValues(|a| unary(a, f64::trunc)));
}

fn unary(args: &[SqlValue], f: fn(f64) -> f64) -> Result<SqlValue> {
    let [a] = args else {
        return Err(crate::err("expected exactly one numeric argument"));
    };
    match a.as_f64() {
        Some(x) => Ok(SqlValue::Real(f(x))),
        None => Ok(SqlValue::Null),
    }
}

fn atan2(args: &[SqlValue]) -> Result<SqlValue> {
    let [y, x] = args else {
        return Err(crate::err("atan2 takes exactly two arguments"));
    };
    match (y.as_f64(), x.as_f64()) {
        (Some(y), Some(x)) => Ok(SqlValue::Real(y.atan2(x))),
        _ => Ok(SqlValue::Null),
    }
}

fn pow(args: &[SqlValue]) -> Result<SqlValue> {
    let [base, exp] = args else {
        return Err(crate::err("pow takes exactly two arguments"));
    };
    match (base.as_f64(), exp.as_f64()) {
        (Some(b), Some(e)) => Ok(SqlValue::Real(b.powf(e))),
        _ => Ok(SqlValue::Null),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_abs_and_sqrt() {
        assert_eq!(unary(&[SqlValue::Integer(-4)], f64::abs).unwrap(), SqlValue::Real(4.0));
        assert_eq!(unary(&[SqlValue::Real(9.0)], f64::sqrt).unwrap(), SqlValue::Real(3.0));
    }

    #[test]
    fn test_non_numeric_is_null() {
        assert_eq!(
            unary(&[SqlValue::Text("x".into())], f64::abs).unwrap(),
            SqlValue::Null
        );
    }

    #[test]
    fn test_pow_and_atan2() {
        assert_eq!(
            pow(&[SqlValue::Integer(2), SqlValue::Integer(10)]).unwrap(),
            SqlValue::Real(1024.0)
        );
        let r = atan2(&[SqlValue::Real(1.0), SqlValue::Real(1.0)]).unwrap();
        match r {
            SqlValue::Real(v) => assert!((v - std::f64::consts::FRAC_PI_4).abs() < 1e-9),
            _ => panic!("expected Real"),
        }
    }
}
