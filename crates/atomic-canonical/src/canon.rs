//! Deterministic canonical serialization.
//!
//! Produces the byte string used as the hashing pre-image. The rules are a
//! documented subset of RFC 8785:
//!
//! 1. `null`, `true`, `false` as literals.
//! 2. Numbers use the shortest round-tripping decimal form (itoa/ryu via
//!    `serde_json::Number`); integers carry no decimal point; non-finite
//!    values are rejected.
//! 3. Strings are JSON-escaped: `"` and `\` and the short control escapes
//!    `\b \f \n \r \t`, any other control as `\u00xx`; non-ASCII characters
//!    are emitted literally. No Unicode normalization.
//! 4. Arrays join elements with `,`, no spaces.
//! 5. Object keys sort by codepoint order; each key re-serialized as a
//!    string, then `:` and the value.

use serde_json::Value;

use atomic_core::error::{AtomicError, Result};

/// Canonicalize a JSON value into its deterministic UTF-8 byte string.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    write_value(&mut out, value)?;
    Ok(out)
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(AtomicError::NonFiniteNumber);
                }
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // Explicit sort: do not rely on the map's internal ordering.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(out, key);
                out.push(b':');
                if let Some(v) = map.get(*key) {
                    write_value(out, v)?;
                }
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    out.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{0008}' => out.extend_from_slice(b"\\b"),
            '\u{000C}' => out.extend_from_slice(b"\\f"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                let n = c as u32;
                out.extend_from_slice(b"\\u00");
                out.push(HEX[((n >> 4) & 0xF) as usize]);
                out.push(HEX[(n & 0xF) as usize]);
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(value: Value) -> String {
        String::from_utf8(canonicalize(&value).unwrap()).unwrap()
    }

    #[test]
    fn test_keys_sort_by_codepoint() {
        assert_eq!(canon(json!({"z": 1, "a": 2, "m": 3})), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_nested_objects_sort_recursively() {
        let v = json!({"outer": {"b": [true, null], "a": "x"}});
        assert_eq!(canon(v), r#"{"outer":{"a":"x","b":[true,null]}}"#);
    }

    #[test]
    fn test_scalars() {
        assert_eq!(canon(json!(null)), "null");
        assert_eq!(canon(json!(true)), "true");
        assert_eq!(canon(json!(false)), "false");
        assert_eq!(canon(json!(42)), "42");
        assert_eq!(canon(json!(-7)), "-7");
    }

    #[test]
    fn test_floats_shortest_roundtrip() {
        assert_eq!(canon(json!(1.5)), "1.5");
        assert_eq!(canon(json!(0.1)), "0.1");
        // Integral floats keep their decimal point — they are still floats.
        assert_eq!(canon(json!(3.0)), "3.0");
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(canon(json!("a\"b")), r#""a\"b""#);
        assert_eq!(canon(json!("a\\b")), r#""a\\b""#);
        assert_eq!(canon(json!("line\nbreak\ttab")), r#""line\nbreak\ttab""#);
        assert_eq!(canon(json!("\u{0001}")), r#""\u0001""#);
        assert_eq!(canon(json!("\u{001F}")), r#""\u001f""#);
        assert_eq!(canon(json!("\u{0008}\u{000C}")), r#""\b\f""#);
    }

    #[test]
    fn test_non_ascii_emitted_literally() {
        assert_eq!(canon(json!("héllo → 世界")), "\"héllo → 世界\"");
    }

    #[test]
    fn test_array_joined_without_spaces() {
        assert_eq!(canon(json!([1, "two", [3]])), r#"[1,"two",[3]]"#);
        assert_eq!(canon(json!([])), "[]");
        assert_eq!(canon(json!({})), "{}");
    }

    #[test]
    fn test_deterministic_across_clones() {
        let v = json!({"k": [1, 2.25, {"b": null, "a": "é"}], "j": false});
        let a = canonicalize(&v).unwrap();
        let b = canonicalize(&v.clone()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_order_on_input_is_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }
}
