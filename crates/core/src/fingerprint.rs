//! Content fingerprint for a calc submission.
//!
//! The fingerprint is SHA-256, hex-encoded, over the compact JSON form of
//! `{branch_type, formula_version, inputs}`. Keys are emitted in
//! lexicographic order at every depth: `serde_json::Map` is backed by
//! `BTreeMap` (the default when the `preserve_order` feature is not
//! enabled), so the same logical payload always serializes identically
//! regardless of the key order the client sent.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CalcError;

/// Build the payload that is both stored on the input version and hashed.
pub fn canonical_payload(
    branch_type: &str,
    formula_version: &str,
    inputs: &Map<String, Value>,
) -> Value {
    let mut map = Map::new();
    map.insert(
        "branch_type".to_string(),
        Value::String(branch_type.to_string()),
    );
    map.insert(
        "formula_version".to_string(),
        Value::String(formula_version.to_string()),
    );
    map.insert("inputs".to_string(), Value::Object(inputs.clone()));
    Value::Object(map)
}

/// Compute the 64-character hex SHA-256 of a payload's canonical JSON.
pub fn fingerprint(payload: &Value) -> Result<String, CalcError> {
    let canonical = serde_json::to_vec(payload)
        .map_err(|e| CalcError::validation(format!("payload is not serializable: {}", e)))?;
    let hash = Sha256::digest(&canonical);
    Ok(format!("{:x}", hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn fingerprint_is_64_hex_chars() {
        let payload = canonical_payload("urban", "v1", &inputs(json!({"x": 1})));
        let hash = fingerprint(&payload).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let payload = canonical_payload("urban", "v1", &inputs(json!({"x": 1, "y": [1, 2]})));
        assert_eq!(fingerprint(&payload).unwrap(), fingerprint(&payload).unwrap());
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b": 2, "a": {"z": 1, "y": 2}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"y": 2, "z": 1}, "b": 2}"#).unwrap();
        let pa = canonical_payload("urban", "v1", &inputs(a));
        let pb = canonical_payload("urban", "v1", &inputs(b));
        assert_eq!(fingerprint(&pa).unwrap(), fingerprint(&pb).unwrap());
    }

    #[test]
    fn each_component_changes_the_fingerprint() {
        let base = fingerprint(&canonical_payload("urban", "v1", &inputs(json!({"x": 1})))).unwrap();
        let branch =
            fingerprint(&canonical_payload("rural", "v1", &inputs(json!({"x": 1})))).unwrap();
        let formula =
            fingerprint(&canonical_payload("urban", "v2", &inputs(json!({"x": 1})))).unwrap();
        let input =
            fingerprint(&canonical_payload("urban", "v1", &inputs(json!({"x": 2})))).unwrap();
        assert_ne!(base, branch);
        assert_ne!(base, formula);
        assert_ne!(base, input);
    }

    #[test]
    fn canonical_form_is_sorted_compact_json() {
        let payload = canonical_payload("urban", "v1", &inputs(json!({"x": 1})));
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"branch_type":"urban","formula_version":"v1","inputs":{"x":1}}"#
        );
    }

    #[test]
    fn known_digest() {
        // sha256 of {"branch_type":"urban","formula_version":"v1","inputs":{"x":1}}
        let payload = canonical_payload("urban", "v1", &inputs(json!({"x": 1})));
        let expected = format!(
            "{:x}",
            Sha256::digest(br#"{"branch_type":"urban","formula_version":"v1","inputs":{"x":1}}"#)
        );
        assert_eq!(fingerprint(&payload).unwrap(), expected);
    }
}
