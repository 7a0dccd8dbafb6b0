mod array;
mod math;
mod nullish;
mod path;
mod text;

use crate::adapter::{resolve_body, RowAccessor, SqlArg};
use crate::sqlvalue::SqlValue;
use crate::{err, Result};
use fleece::{Path as FleecePath, Value};
use std::collections::BTreeMap;

/// A registered host function is one of two shapes:
///
/// - `OnPath` functions take the resolved document root, the (possibly
///   missing) result of evaluating a path against it, and any trailing SQL
///   arguments -- this is the `fl_*` family, which always starts with
///   `(body, path, ...)`.
/// - `OnValues` functions take already-resolved SQL arguments and never
///   touch a document body or path directly -- aggregates, nullish-coalesce
///   variants, text helpers, and math.
#[derive(Clone, Copy)]
pub enum ScalarFn {
    OnPath(fn(&Value, Option<&Value>, &[SqlValue]) -> Result<SqlValue>),
    OnValues(fn(&[SqlValue]) -> Result<SqlValue>),
}

/// A name-to-function table an embedder registers with its SQL engine.
/// Analogous to a real engine's `sqlite3_create_function` loop; this crate
/// stops at the table, since SQL parsing and the engine FFI are out of
/// scope.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<&'static str, ScalarFn>,
}

impl FunctionRegistry {
    /// Builds the registry with every function this crate defines.
    pub fn with_all_functions() -> Self {
        let mut reg = Self::default();
        path::register(&mut reg);
        array::register(&mut reg);
        nullish::register(&mut reg);
        text::register(&mut reg);
        math::register(&mut reg);
        reg
    }

    pub fn register(&mut self, name: &'static str, f: ScalarFn) {
        self.functions.insert(name, f);
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }

    /// Calls a `fl_*`-family function: resolves `body` via the three-form
    /// adapter, evaluates `path` against it, and passes both plus `rest` to
    /// the registered `OnPath` function.
    pub fn call_on_path(
        &self,
        name: &str,
        body: &SqlArg,
        path: &str,
        rest: &[SqlValue],
        accessor: Option<RowAccessor>,
    ) -> Result<SqlValue> {
        let f = match self.functions.get(name) {
            Some(ScalarFn::OnPath(f)) => *f,
            Some(ScalarFn::OnValues(_)) => {
                return Err(err(format!("{name} is not a path-taking function")))
            }
            None => return Err(err(format!("unknown function {name}"))),
        };
        let root = resolve_body(body, accessor)?;
        let compiled = FleecePath::parse(path)?;
        let path_val = compiled.evaluate(&root);
        f(&root, path_val, rest)
    }

    /// Calls a plain value-taking function.
    pub fn call_on_values(&self, name: &str, args: &[SqlValue]) -> Result<SqlValue> {
        let f = match self.functions.get(name) {
            Some(ScalarFn::OnValues(f)) => *f,
            Some(ScalarFn::OnPath(_)) => {
                return Err(err(format!("{name} requires a body and path argument")))
            }
            None => return Err(err(format!("unknown function {name}"))),
        };
        f(args)
    }
}
