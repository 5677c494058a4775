//! Pure functions over opaque JSON documents.
//!
//! Fingerprints and binding parameters have no fixed schema, so they are
//! carried as [`serde_json::Value`]. Anything that compares or hashes them
//! goes through [`canonicalize`] first, which gives every semantically equal
//! document the same byte representation.

use std::fmt::Write as _;

use serde_json::{Number, Value};

use crate::error::StoreError;

/// Key that must never appear in a service instance fingerprint.
pub const FORBIDDEN_FINGERPRINT_KEY: &str = "password";

/// Encodes a document with object keys sorted at every depth, no
/// insignificant whitespace, and integral floats written as integers.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < 9.0e15 {
                let _ = write!(out, "{}", f as i64);
                return;
            }
        }
    }
    let _ = write!(out, "{n}");
}

fn write_string(s: &str, out: &mut String) {
    // Serialising a &str cannot fail.
    out.push_str(&serde_json::to_string(s).unwrap_or_default());
}

/// Returns true if an object key equal to `key` appears anywhere in the
/// document, including inside arrays.
pub fn contains_key(value: &Value, key: &str) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| k == key || contains_key(v, key)),
        Value::Array(items) => items.iter().any(|item| contains_key(item, key)),
        _ => false,
    }
}

/// Rejects fingerprints that carry a `password` key at any depth.
pub fn ensure_no_secrets(fingerprint: &Value) -> Result<(), StoreError> {
    if contains_key(fingerprint, FORBIDDEN_FINGERPRINT_KEY) {
        return Err(StoreError::Validation(
            "passwords are not allowed in service instance configuration".to_string(),
        ));
    }
    Ok(())
}

/// Rejects record IDs that a backend keeps for its own bookkeeping.
pub fn ensure_not_reserved(id: &str, reserved: &str) -> Result<(), StoreError> {
    if id == reserved {
        return Err(StoreError::Validation(format!("{id} is a reserved record id")));
    }
    Ok(())
}
