//! JavaScript-compatible coercions for JSON field values.
//!
//! Built-in rules compare `Number(value)` and `String(value).length`, so the
//! helpers here reproduce those conversions for `serde_json::Value`.

use serde_json::Value;

/// `null`, blank strings, empty arrays and empty objects are empty. Numbers
/// and booleans never are.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// `Number(value)`; unparseable input yields `NaN`.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Value::String(text) => parse_number(text),
        Value::Array(items) => match items.as_slice() {
            [] => 0.0,
            [only] => parse_number(&array_element_string(only)),
            _ => f64::NAN,
        },
        Value::Object(_) => f64::NAN,
    }
}

/// `String(value)`.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => {
            if number.is_f64() {
                format_number(number.as_f64().unwrap_or(f64::NAN))
            } else {
                number.to_string()
            }
        }
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(array_element_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Length in UTF-16 code units, matching `String.prototype.length`.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

fn array_element_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => to_display_string(other),
    }
}

fn format_number(number: f64) -> String {
    if number.is_nan() {
        "NaN".to_string()
    } else if number.is_infinite() {
        if number > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if number == 0.0 {
        "0".to_string()
    } else if number.fract() == 0.0 && number.abs() < 1e21 {
        format!("{number:.0}")
    } else {
        number.to_string()
    }
}

fn parse_number(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return 0.0;
    }
    match text {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }

    let prefixed = text
        .get(..2)
        .map(|prefix| prefix.to_ascii_lowercase())
        .and_then(|prefix| match prefix.as_str() {
            "0x" => Some(16),
            "0o" => Some(8),
            "0b" => Some(2),
            _ => None,
        });
    if let Some(radix) = prefixed {
        return parse_radix(&text[2..], radix);
    }

    let well_formed = text
        .chars()
        .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | '-' | '.' | 'e' | 'E'))
        && text.chars().any(|ch| ch.is_ascii_digit());
    if !well_formed {
        return f64::NAN;
    }
    text.parse::<f64>().unwrap_or(f64::NAN)
}

fn parse_radix(digits: &str, radix: u32) -> f64 {
    if digits.is_empty() {
        return f64::NAN;
    }
    let mut total = 0.0f64;
    for ch in digits.chars() {
        let Some(digit) = ch.to_digit(radix) else {
            return f64::NAN;
        };
        total = total * f64::from(radix) + f64::from(digit);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emptiness_follows_value_shape() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&json!("")));
        assert!(is_empty_value(&json!("   ")));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&json!({})));

        assert!(!is_empty_value(&json!("hello")));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!([1])));
        assert!(!is_empty_value(&json!({ "a": 1 })));
    }

    #[test]
    fn number_coercion_matches_script_rules() {
        assert_eq!(to_number(&json!(" 12.5 ")), 12.5);
        assert_eq!(to_number(&json!("")), 0.0);
        assert_eq!(to_number(&Value::Null), 0.0);
        assert_eq!(to_number(&json!(true)), 1.0);
        assert_eq!(to_number(&json!("0x1F")), 31.0);
        assert_eq!(to_number(&json!("0b101")), 5.0);
        assert_eq!(to_number(&json!("-Infinity")), f64::NEG_INFINITY);
        assert_eq!(to_number(&json!([])), 0.0);
        assert_eq!(to_number(&json!(["7"])), 7.0);
        assert_eq!(to_number(&json!("1e3")), 1000.0);

        assert!(to_number(&json!("abc")).is_nan());
        assert!(to_number(&json!("inf")).is_nan());
        assert!(to_number(&json!("NaN")).is_nan());
        assert!(to_number(&json!([1, 2])).is_nan());
        assert!(to_number(&json!({})).is_nan());
    }

    #[test]
    fn display_string_matches_script_rules() {
        assert_eq!(to_display_string(&json!(3.0)), "3");
        assert_eq!(to_display_string(&json!(2.5)), "2.5");
        assert_eq!(to_display_string(&json!(42)), "42");
        assert_eq!(to_display_string(&json!([1, null, "x"])), "1,,x");
        assert_eq!(to_display_string(&json!({ "a": 1 })), "[object Object]");
        assert_eq!(to_display_string(&Value::Null), "null");
    }

    #[test]
    fn length_counts_utf16_units() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("é"), 1);
        assert_eq!(utf16_len("😀"), 2);
    }
}
