//! Audit hash validation.
//!
//! The server binds each decision to its input with a SHA-256 over a canonical
//! JSON rendering of the transaction plus three decision fields. The rendering
//! here is byte-compatible with the server's sorted-key JSON dump:
//!
//! - object keys sorted at every level
//! - `", "` between items, `": "` between key and value
//! - ASCII-only output (`\uXXXX` escapes, surrogate pairs above the BMP)
//! - floats in shortest round-trip form, fixed notation for decimal
//!   exponents in `[-4, 16)`, scientific (`1e+16`, `1.5e-05`) otherwise
//!
//! The hashed field set is inferred from the client side: the transaction
//! fields overlaid with `exception_flag`, `reason_code` and `confidence`.
//! If the server ever hashes a different set, every validation fails; that
//! is a compatibility break to surface, not something to paper over here.

use std::fmt::Write as _;

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::model::{ReconcileResponse, Transaction};

/// Decision fields the server adds to the transaction before hashing.
pub const HASHED_RESULT_FIELDS: [&str; 3] = ["exception_flag", "reason_code", "confidence"];

/// SHA-256 of the canonical rendering of `data`, as lowercase hex.
pub fn compute_hash(data: &Value) -> String {
    let canonical = canonical_json(data);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{:x}", digest)
}

/// Canonical JSON text for `data` (see module docs for the format).
pub fn canonical_json(data: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, data);
    out
}

/// The field set the server is expected to have hashed for this result.
pub fn expected_payload(
    original: &Map<String, Value>,
    exception_flag: bool,
    reason_code: &str,
    confidence: f64,
) -> Value {
    let confidence = Number::from_f64(confidence).map(Value::Number).unwrap_or(Value::Null);
    overlay(original, exception_flag, reason_code, confidence)
}

fn overlay(
    original: &Map<String, Value>,
    exception_flag: bool,
    reason_code: &str,
    confidence: Value,
) -> Value {
    let mut payload = original.clone();
    payload.insert("exception_flag".into(), Value::Bool(exception_flag));
    payload.insert("reason_code".into(), Value::String(reason_code.to_string()));
    payload.insert("confidence".into(), confidence);
    Value::Object(payload)
}

/// True iff `result.audit_hash` matches the hash recomputed from
/// `original` plus the result's decision fields. Never errors.
pub fn validate(result: &ReconcileResponse, original: &Transaction) -> bool {
    if result.audit_hash.is_empty() {
        return false;
    }
    let Some(fields) = original.to_json_object() else {
        return false;
    };
    let expected = overlay(
        &fields,
        result.exception_flag,
        &result.reason_code,
        result.confidence_value(),
    );
    compute_hash(&expected) == result.audit_hash
}

/// Untyped variant of [`validate`] for raw response objects.
/// Returns false when the result has no `audit_hash` or either side is not an object.
pub fn validate_value(result: &Value, original: &Value) -> bool {
    let Some(declared) = result.get("audit_hash").and_then(Value::as_str) else {
        return false;
    };
    let Some(fields) = original.as_object() else {
        return false;
    };

    let mut payload = fields.clone();
    for key in HASHED_RESULT_FIELDS {
        payload.insert(key.to_string(), result.get(key).cloned().unwrap_or(Value::Null));
    }
    compute_hash(&Value::Object(payload)) == declared
}

// ---------------------------------------------------------------------------
// Canonical writer
// ---------------------------------------------------------------------------

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_string(out, key);
                out.push_str(": ");
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: &Number) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
    } else if let Some(f) = n.as_f64() {
        out.push_str(&float_repr(f));
    }
}

/// Shortest round-trip float text, switching to scientific notation outside
/// decimal exponents `[-4, 16)`.
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "NaN".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }

    // `{:e}` yields the shortest round-trip digits, e.g. "-1.2345e4".
    let sci = format!("{:e}", f);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let mut out = String::from(sign);
    if (-4..16).contains(&exp) {
        if exp >= 0 {
            let int_len = exp as usize + 1;
            if digits.len() <= int_len {
                out.push_str(&digits);
                out.extend(std::iter::repeat('0').take(int_len - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        } else {
            out.push_str("0.");
            out.extend(std::iter::repeat('0').take((-exp - 1) as usize));
            out.push_str(&digits);
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let exp_sign = if exp < 0 { '-' } else { '+' };
        let _ = write!(out, "e{}{:02}", exp_sign, exp.abs());
    }
    out
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out.push('"');
}
