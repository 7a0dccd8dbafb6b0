use crate::value::Value;
use crate::{err, Result};

/// One step of a compiled path expression: either a dict property lookup or
/// an array index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathComponent {
    Property(String),
    Index(usize),
}

/// A compiled JSON-path-like expression, e.g. `.addresses[0].city`. Mirrors
/// the subset of N1QL/Fleece path syntax the query bridge needs: dotted
/// property access and bracketed array indices, no wildcards or slices.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Path(pub Vec<PathComponent>);

impl Path {
    pub fn parse(text: &str) -> Result<Path> {
        let mut components = Vec::new();
        let bytes = text.as_bytes();
        let mut i = 0;
        if bytes.first() == Some(&b'$') {
            i += 1;
        }
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    i += 1;
                    let start = i;
                    while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
                        i += 1;
                    }
                    if i == start {
                        return Err(err("empty property name in path"));
                    }
                    components.push(PathComponent::Property(text[start..i].to_string()));
                }
                b'[' => {
                    i += 1;
                    let start = i;
                    while i < bytes.len() && bytes[i] != b']' {
                        i += 1;
                    }
                    if i >= bytes.len() {
                        return Err(err("unterminated [ in path"));
                    }
                    let idx: usize = text[start..i]
                        .parse()
                        .map_err(|_| err("non-numeric array index in path"))?;
                    components.push(PathComponent::Index(idx));
                    i += 1; // skip ']'
                }
                _ => {
                    // Leading bare property name with no '.' prefix, e.g. "name".
                    let start = i;
                    while i < bytes.len() && bytes[i] != b'.' && bytes[i] != b'[' {
                        i += 1;
                    }
                    components.push(PathComponent::Property(text[start..i].to_string()));
                }
            }
        }
        Ok(Path(components))
    }

    /// Walks `root` along this path. Returns `None` when any step is
    /// missing (no such property, index out of range, or indexing into a
    /// scalar) -- distinct from the step resolving to a present
    /// `Value::Null`, which is returned as `Some(&Value::Null)`.
    pub fn evaluate<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut cur = root;
        for component in &self.0 {
            cur = match (component, cur) {
                (PathComponent::Property(name), Value::Dict(d)) => d.get(name)?,
                (PathComponent::Index(idx), Value::Array(a)) => a.get(*idx)?,
                _ => return None,
            };
        }
        Some(cur)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;
    use test_log::test;

    fn doc() -> Value {
        let mut addr = BTreeMap::new();
        addr.insert("city".to_string(), Value::String("Boston".into()));
        let mut top = BTreeMap::new();
        top.insert(
            "addresses".to_string(),
            Value::Array(vec![Value::Dict(addr)]),
        );
        top.insert("x".to_string(), Value::Null);
        Value::Dict(top)
    }

    #[test]
    fn test_parse_and_evaluate_nested() {
        let p = Path::parse(".addresses[0].city").unwrap();
        assert_eq!(
            p.evaluate(&doc()),
            Some(&Value::String("Boston".to_string()))
        );
    }

    #[test]
    fn test_missing_vs_null() {
        let d = doc();
        let missing = Path::parse(".nope").unwrap();
        assert_eq!(missing.evaluate(&d), None);
        let present_null = Path::parse(".x").unwrap();
        assert_eq!(present_null.evaluate(&d), Some(&Value::Null));
    }

    #[test]
    fn test_index_out_of_range_is_missing() {
        let d = doc();
        let p = Path::parse(".addresses[5]").unwrap();
        assert_eq!(p.evaluate(&d), None);
    }

    #[test]
    fn test_bare_top_level_property() {
        let p = Path::parse("x").unwrap();
        assert_eq!(p.evaluate(&doc()), Some(&Value::Null));
    }
}
