//! Deterministic JSON canonicalisation and SHA-256 hashing (spec §4.1).
//!
//! Rules: object keys sorted lexicographically; integers emitted as plain
//! decimal; `null`/missing fields dropped by the data model's own
//! `#[serde(skip_serializing_if = "Option::is_none")]` annotations before a
//! value ever reaches here; arrays keep input order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively rewrite `value` into its canonical string form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string serialises"));
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
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("key serialises"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// `sha256hex(canonical_json(x))` (spec §4.1).
pub fn canonical_hash_hex<T: Serialize>(x: &T) -> String {
    let value = serde_json::to_value(x).expect("value is serialisable");
    let canon = canonical_json(&value);
    let mut hasher = Sha256::new();
    hasher.update(canon.as_bytes());
    hex::encode(hasher.finalize())
}

/// `sha256hex(bytes)` — used for `X-Body-Sha256` and evidence/body hashes.
pub fn sha256_hex_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn preserves_array_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_json(&v), "[3,1,2]");
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let v = json!({"z": {"y": 1, "x": 2}, "a": 1});
        assert_eq!(canonical_json(&v), r#"{"a":1,"z":{"x":2,"y":1}}"#);
    }

    #[test]
    fn hash_is_deterministic_regardless_of_field_order() {
        #[derive(Serialize)]
        struct A {
            b: u32,
            a: u32,
        }
        #[derive(Serialize)]
        struct B {
            a: u32,
            b: u32,
        }
        let h1 = canonical_hash_hex(&A { b: 1, a: 2 });
        let h2 = canonical_hash_hex(&B { a: 2, b: 1 });
        assert_eq!(h1, h2);
    }
}
