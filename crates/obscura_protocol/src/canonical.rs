//! Canonical JSON form used for result signing and input-state hashing.
//!
//! Rules (both sides must match byte-for-byte):
//! - object keys sorted lexicographically
//! - separators `,` and `:`, no insignificant whitespace
//! - numbers in shortest round-trip form, integers never as floats
//! - strings UTF-8 with standard JSON escaping
//!
//! The writer below does not depend on `serde_json`'s map ordering, so a
//! `preserve_order` feature unified in from another dependency cannot
//! change signatures.

use serde::Serialize;
use serde_json::Value;

/// Serialize any value to its canonical JSON string.
pub fn canonical_json_of<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_json(&value))
}

/// Render a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value::String handles escaping for the key.
                write_canonical(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
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
        // Null, Bool, Number, String: serde_json's compact Display already
        // emits the canonical scalar form (shortest round-trip numbers,
        // standard string escaping).
        scalar => out.push_str(&scalar.to_string()),
    }
}
