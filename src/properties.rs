//! Key/value property parser for device lines
//!
//! Accepts either a JSON object or `key=value` / `key:value` fields separated
//! by `,` or `;`:
//!
//! ```text
//! temp=21
//! temp=21.5, hum=40; status:ok
//! {"temp": 21, "hum": 40}
//! ```

use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fmt;
use thiserror::Error;

/// Properties parsed from one line, in the order they appeared
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Properties(Map<String, Value>);

impl Properties {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("field `{0}` is not a key=value pair")]
    MissingSeparator(String),

    #[error("field `{0}` has an empty key")]
    EmptyKey(String),

    #[error("invalid JSON object: {0}")]
    InvalidJson(String),
}

/// Parse one decoded line into properties
pub fn parse_line(line: &str) -> Result<Properties, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if line.starts_with('{') {
        return match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Ok(Properties(map)),
            Ok(other) => Err(ParseError::InvalidJson(format!("expected an object, got {}", other))),
            Err(e) => Err(ParseError::InvalidJson(e.to_string())),
        };
    }

    let mut map = Map::new();
    for field in line.split([',', ';']).map(str::trim).filter(|f| !f.is_empty()) {
        let (key, value) = field
            .split_once(|c: char| c == '=' || c == ':')
            .ok_or_else(|| ParseError::MissingSeparator(field.to_string()))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::EmptyKey(field.to_string()));
        }
        map.insert(key.to_string(), typed_value(value.trim()));
    }

    if map.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(Properties(map))
}

/// Integer, float, boolean, or string, in that order
fn typed_value(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Some(number) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_property() {
        let props = parse_line("temp=21").unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("temp"), Some(&json!(21)));
    }

    #[test]
    fn test_mixed_separators_and_types() {
        let props = parse_line("temp=21.5, hum = 40; status:ok, armed=true").unwrap();

        assert_eq!(props.get("temp"), Some(&json!(21.5)));
        assert_eq!(props.get("hum"), Some(&json!(40)));
        assert_eq!(props.get("status"), Some(&json!("ok")));
        assert_eq!(props.get("armed"), Some(&json!(true)));
    }

    #[test]
    fn test_order_is_preserved() {
        let props = parse_line("z=1,a=2,m=3").unwrap();
        let keys: Vec<&str> = props.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(props.to_string(), r#"{"z":1,"a":2,"m":3}"#);
    }

    #[test]
    fn test_json_object_line() {
        let props = parse_line(r#"{"temp": 21, "unit": "C"}"#).unwrap();
        assert_eq!(props.get("unit"), Some(&json!("C")));
    }

    #[test]
    fn test_non_finite_numbers_stay_strings() {
        let props = parse_line("reading=NaN").unwrap();
        assert_eq!(props.get("reading"), Some(&json!("NaN")));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_line("   "), Err(ParseError::Empty));
        assert_eq!(parse_line(",;"), Err(ParseError::Empty));
        assert_eq!(
            parse_line("hello world"),
            Err(ParseError::MissingSeparator("hello world".to_string()))
        );
        assert_eq!(parse_line("=5"), Err(ParseError::EmptyKey("=5".to_string())));
        assert!(matches!(parse_line("{not json"), Err(ParseError::InvalidJson(_))));
    }
}
