//! Dotted path resolution over untyped response documents

use crate::{Error, Result};
use serde_json::Value;

/// Separator between path segments
pub const PATH_DELIMITER: char = '.';

/// Resolve a dotted path against a document.
///
/// Each segment must name a key of the mapping reached so far. The value found
/// at the terminal segment is returned as-is, whatever its type.
pub fn resolve<'a>(document: &'a Value, path: &str) -> Result<&'a Value> {
    let mut current = document;

    for (index, segment) in path.split(PATH_DELIMITER).enumerate() {
        current = current
            .as_object()
            .and_then(|map| map.get(segment))
            .ok_or_else(|| Error::PathNotFound {
                path: path.to_string(),
                segment: segment.to_string(),
                index,
            })?;
    }

    Ok(current)
}

/// Resolve a path and require a numeric value
pub fn resolve_f64(document: &Value, path: &str) -> Result<f64> {
    let value = resolve(document, path)?;
    value.as_f64().ok_or_else(|| Error::ValueTypeMismatch {
        path: path.to_string(),
        expected: "number",
        found: value_kind(value),
    })
}

/// Resolve a path and render the value as label text.
///
/// Strings are used verbatim, numbers and booleans are formatted. Nulls,
/// sequences and mappings have no label representation.
pub fn resolve_label(document: &Value, path: &str) -> Result<String> {
    let value = resolve(document, path)?;
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::ValueTypeMismatch {
            path: path.to_string(),
            expected: "string",
            found: value_kind(other),
        }),
    }
}

/// Short type name of a JSON value, for diagnostics
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_terminal_scalar() {
        let doc = json!({"a": {"b": {"c": 7}}});
        assert_eq!(resolve(&doc, "a.b.c").unwrap(), &json!(7));
    }

    #[test]
    fn test_resolve_single_segment() {
        let doc = json!({"doc_count": 5, "key": "x"});
        assert_eq!(resolve(&doc, "doc_count").unwrap(), &json!(5));
        assert_eq!(resolve(&doc, "key").unwrap(), &json!("x"));
    }

    #[test]
    fn test_resolve_returns_mapping_at_terminal() {
        let doc = json!({"a": {"b": {"c": 1}}});
        assert_eq!(resolve(&doc, "a.b").unwrap(), &json!({"c": 1}));
    }

    #[test]
    fn test_missing_segment_reports_first_missing() {
        let doc = json!({"a": {"b": 1}});
        match resolve(&doc, "a.x.y") {
            Err(Error::PathNotFound { path, segment, index }) => {
                assert_eq!(path, "a.x.y");
                assert_eq!(segment, "x");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_descent_through_scalar_fails() {
        let doc = json!({"a": 3});
        match resolve(&doc, "a.b") {
            Err(Error::PathNotFound { segment, index, .. }) => {
                assert_eq!(segment, "b");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_non_mapping_root_fails() {
        let doc = json!([1, 2, 3]);
        assert!(matches!(
            resolve(&doc, "0"),
            Err(Error::PathNotFound { index: 0, .. })
        ));
    }

    #[test]
    fn test_resolve_f64() {
        let doc = json!({"v": 5, "f": 2.5, "s": "5"});
        assert_eq!(resolve_f64(&doc, "v").unwrap(), 5.0);
        assert_eq!(resolve_f64(&doc, "f").unwrap(), 2.5);
        assert!(matches!(
            resolve_f64(&doc, "s"),
            Err(Error::ValueTypeMismatch { expected: "number", found: "string", .. })
        ));
    }

    #[test]
    fn test_resolve_f64_null_is_type_error() {
        let doc = json!({"avg": {"value": null}});
        let err = resolve_f64(&doc, "avg.value").unwrap_err();
        assert!(matches!(err, Error::ValueTypeMismatch { found: "null", .. }));
    }

    #[test]
    fn test_resolve_label() {
        let doc = json!({"s": "host-1", "n": 42, "b": true, "o": {"k": 1}});
        assert_eq!(resolve_label(&doc, "s").unwrap(), "host-1");
        assert_eq!(resolve_label(&doc, "n").unwrap(), "42");
        assert_eq!(resolve_label(&doc, "b").unwrap(), "true");
        assert!(matches!(
            resolve_label(&doc, "o"),
            Err(Error::ValueTypeMismatch { found: "object", .. })
        ));
    }
}
