use serde_json::Value;

/// Walk `path` (dot separated, numeric segments index arrays) from `root`.
///
/// An empty path is the root itself. Missing keys and empty segments yield `None`.
pub fn get_by_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(root);
    }
    let mut cur = root;
    for seg in path.split('.') {
        if seg.is_empty() {
            return None;
        }
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Text form of a value spliced into markup or a URL. `null` renders as nothing.
pub fn stringify_for_interpolation(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn walks_objects_and_arrays() {
        let root = json!({ "a": { "b": [10, { "c": "x" }] } });
        assert_eq!(get_by_path(&root, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_by_path(&root, "a.b.1.c"), Some(&json!("x")));
        assert_eq!(get_by_path(&root, ""), Some(&root));
        assert_eq!(get_by_path(&root, "a..b"), None);
        assert_eq!(get_by_path(&root, "a.b.7"), None);
        assert_eq!(get_by_path(&root, "a.b.0.deeper"), None);
    }

    #[test]
    fn stringify_keeps_strings_raw() {
        assert_eq!(stringify_for_interpolation(&json!("hi")), "hi");
        assert_eq!(stringify_for_interpolation(&json!(1)), "1");
        assert_eq!(stringify_for_interpolation(&json!(null)), "");
        assert_eq!(stringify_for_interpolation(&json!([1, 2])), "[1,2]");
    }
}
