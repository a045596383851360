//! Change detection
//!
//! Records are flat-or-nested JSON objects. A [`Fingerprint`] is the SHA-256
//! of a canonical rendering in which object keys are sorted at every depth, so
//! key order never affects it. [`diff`] compares two records over the union of
//! their keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Structured record produced by a source
pub type Record = serde_json::Map<String, Value>;

/// Hex-encoded SHA-256 digest of a canonical record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Fingerprint(value)
    }
}

pub fn fingerprint(record: &Record) -> Fingerprint {
    fingerprint_excluding(record, &[])
}

/// Fingerprint of `record` ignoring the named top-level fields
pub fn fingerprint_excluding(record: &Record, ignore: &[String]) -> Fingerprint {
    let mut canonical = String::new();
    canonical.push('{');
    let mut keys: Vec<&String> = record
        .keys()
        .filter(|k| !ignore.iter().any(|i| i == *k))
        .collect();
    keys.sort();
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        write_string(&mut canonical, key);
        canonical.push(':');
        write_canonical(&mut canonical, &record[key]);
    }
    canonical.push('}');
    digest(&canonical)
}

/// Fingerprint of any JSON value, used for whole payloads
pub fn fingerprint_value(value: &Value) -> Fingerprint {
    let mut canonical = String::new();
    write_canonical(&mut canonical, value);
    digest(&canonical)
}

fn digest(canonical: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_canonical(out, &map[key]);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json string escaping is deterministic
    out.push_str(&Value::String(s.to_string()).to_string());
}

/// Field-level difference between two versions of a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    /// New value of every changed field (`null` when removed)
    pub changed: Record,
    /// Previous value of every changed field (`null` when added)
    pub old_values: Record,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changed.len()
    }
}

/// Compares `old` and `new` over the union of their keys
///
/// A key present on one side only counts as changed, with `null` standing in
/// for the missing side. Equal keys are omitted from both maps.
pub fn diff(old: &Record, new: &Record) -> FieldDiff {
    let mut result = FieldDiff::default();
    let keys = old.keys().chain(new.keys().filter(|k| !old.contains_key(*k)));
    for key in keys {
        let before = old.get(key);
        let after = new.get(key);
        if before == after {
            continue;
        }
        result
            .changed
            .insert(key.clone(), after.cloned().unwrap_or(Value::Null));
        result
            .old_values
            .insert(key.clone(), before.cloned().unwrap_or(Value::Null));
    }
    result
}

/// Extracts the entity id from `record[key_field]`
///
/// Strings are used as-is and numbers are rendered; anything else (including a
/// missing or empty field) yields `None` so the record is skipped.
pub fn record_key(record: &Record, key_field: &str) -> Option<String> {
    match record.get(key_field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn samples() -> Vec<Record> {
        vec![
            record(json!({})),
            record(json!({"a": 1})),
            record(json!({"name": "Dam", "budget": 12.5, "active": true, "tags": ["x", "y"]})),
            record(json!({"nested": {"z": 1, "a": [1, {"q": null, "b": "s"}]}, "id": "P1"})),
        ]
    }

    fn reversed(record: &Record) -> Record {
        // rebuild in reverse insertion order, recursing into objects
        fn flip(value: &Value) -> Value {
            match value {
                Value::Object(map) => {
                    let mut out = serde_json::Map::new();
                    for (k, v) in map.iter().rev() {
                        out.insert(k.clone(), flip(v));
                    }
                    Value::Object(out)
                }
                Value::Array(items) => Value::Array(items.iter().map(flip).collect()),
                other => other.clone(),
            }
        }
        match flip(&Value::Object(record.clone())) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        for r in samples() {
            assert_eq!(fingerprint(&r), fingerprint(&reversed(&r)));
        }
    }

    #[test]
    fn test_fingerprint_changes_on_any_field_mutation() {
        for r in samples() {
            let base = fingerprint(&r);
            for key in r.keys() {
                let mut mutated = r.clone();
                mutated.insert(key.clone(), json!("__mutated__"));
                assert_ne!(base, fingerprint(&mutated), "key {}", key);
            }
            let mut extended = r.clone();
            extended.insert("__extra__".into(), Value::Null);
            assert_ne!(base, fingerprint(&extended));
        }
    }

    #[test]
    fn test_fingerprint_distinguishes_types() {
        let a = record(json!({"v": 1}));
        let b = record(json!({"v": "1"}));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_excluding_volatile_fields() {
        let a = record(json!({"id": "P1", "progress": 40, "last_updated": "2024-01-01"}));
        let b = record(json!({"id": "P1", "progress": 40, "last_updated": "2024-02-01"}));
        let ignore = vec!["last_updated".to_string()];
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint_excluding(&a, &ignore), fingerprint_excluding(&b, &ignore));
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let fp = fingerprint(&record(json!({"a": 1})));
        assert_eq!(fp.as_str().len(), 64);
        assert_eq!(fp, fingerprint(&record(json!({"a": 1}))));
    }

    #[test]
    fn test_diff_correctness() {
        let pairs = [
            (json!({"a": 1, "b": 2}), json!({"a": 1, "b": 3})),
            (json!({"a": 1}), json!({"b": 1})),
            (json!({}), json!({"x": [1, 2]})),
            (json!({"x": {"y": 1}}), json!({"x": {"y": 1}})),
        ];
        for (old, new) in pairs {
            let (old, new) = (record(old), record(new));
            let d = diff(&old, &new);
            for (key, value) in &d.changed {
                assert_ne!(old.get(key), new.get(key));
                assert_eq!(new.get(key).unwrap_or(&Value::Null), value);
                assert_eq!(old.get(key).unwrap_or(&Value::Null), &d.old_values[key]);
            }
            for key in old.keys().chain(new.keys()) {
                if !d.changed.contains_key(key) {
                    assert_eq!(old.get(key), new.get(key));
                }
            }
        }
    }

    #[test]
    fn test_diff_added_and_removed_keys() {
        let old = record(json!({"status": "planning", "gone": true}));
        let new = record(json!({"status": "construction", "budget": 10}));
        let d = diff(&old, &new);

        assert_eq!(d.len(), 3);
        assert_eq!(d.changed["status"], json!("construction"));
        assert_eq!(d.old_values["status"], json!("planning"));
        assert_eq!(d.changed["gone"], Value::Null);
        assert_eq!(d.old_values["budget"], Value::Null);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let r = record(json!({"a": 1, "b": [true]}));
        assert!(diff(&r, &r).is_empty());
    }

    #[test]
    fn test_record_key() {
        let r = record(json!({"id": " P1 ", "code": 42, "blank": "", "flag": true}));
        assert_eq!(record_key(&r, "id").as_deref(), Some("P1"));
        assert_eq!(record_key(&r, "code").as_deref(), Some("42"));
        assert_eq!(record_key(&r, "blank"), None);
        assert_eq!(record_key(&r, "flag"), None);
        assert_eq!(record_key(&r, "missing"), None);
    }
}
