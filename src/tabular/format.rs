//! Deterministic stringification of native values.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;

use crate::engine::NativeValue;

/// Largest magnitude printed as plain integer digits.
const PLAIN_INTEGER_LIMIT: f64 = 1e21;

/// Render a native value as normalized cell text.
///
/// Returns `None` for SQL NULL; the caller decides the sentinel.
pub fn format_value(value: &NativeValue) -> Option<String> {
    let text = match value {
        NativeValue::Null => return None,
        NativeValue::Bool(b) => b.to_string(),
        NativeValue::Int(i) => i.to_string(),
        NativeValue::UInt(u) => u.to_string(),
        NativeValue::Float(f) => format_float(*f),
        NativeValue::Decimal(d) => d.clone(),
        NativeValue::Text(s) => s.clone(),
        NativeValue::Bytes(b) => BASE64.encode(b),
        NativeValue::Json(v) => canonical_json(v),
    };
    Some(text)
}

/// Shortest round-trip form, with integral values printed without a
/// fractional part below 1e21.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f.fract() == 0.0 && f.abs() < PLAIN_INTEGER_LIMIT {
        // -0.0 prints as 0
        return format!("{}", f as i128);
    }

    ryu::Buffer::new().format_finite(f).to_string()
}

/// Compact JSON with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integral_floats_have_no_fraction() {
        assert_eq!(format_float(1.0), "1");
        assert_eq!(format_float(-42.0), "-42");
        assert_eq!(format_float(-0.0), "0");
        assert_eq!(format_float(123456789012.0), "123456789012");
    }

    #[test]
    fn test_fractional_and_exponent_floats() {
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(1e21), "1e21");
        assert_eq!(format_float(1.5e-7), "1.5e-7");
    }

    #[test]
    fn test_non_finite_floats() {
        assert_eq!(format_float(f64::NAN), "NaN");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_scalar_values() {
        assert_eq!(format_value(&NativeValue::Null), None);
        assert_eq!(format_value(&NativeValue::Bool(true)).unwrap(), "true");
        assert_eq!(format_value(&NativeValue::Int(-7)).unwrap(), "-7");
        assert_eq!(format_value(&NativeValue::UInt(u64::MAX)).unwrap(), "18446744073709551615");
        assert_eq!(
            format_value(&NativeValue::Decimal("12.50".into())).unwrap(),
            "12.50"
        );
        assert_eq!(format_value(&NativeValue::Bytes(b"hi".to_vec())).unwrap(), "aGk=");
    }

    #[test]
    fn test_json_keys_are_sorted() {
        let value = NativeValue::Json(json!({"b": 1, "a": {"z": true, "y": [2, {"d": 0, "c": 1}]}}));
        assert_eq!(
            format_value(&value).unwrap(),
            r#"{"a":{"y":[2,{"c":1,"d":0}],"z":true},"b":1}"#
        );
    }
}
