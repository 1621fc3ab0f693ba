// pwnai-core/src/tools/schema.rs

//! JSON-schema checking for tool inputs.
//!
//! Validation is done by a compiled [`jsonschema::Validator`]. The validator
//! does not fill in `default` values, so [`apply_defaults`] runs first and the
//! range checks see the defaulted input.

use crate::errors::PwnaiError;
use jsonschema::error::ValidationErrorKind;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Parses the raw argument text of a tool call into a JSON value.
///
/// Empty text is treated as an empty object.
pub fn parse_args(raw: &str) -> Result<Value, PwnaiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| PwnaiError::invalid_input(format!("arguments are not valid JSON: {}", e)))
}

/// A tool input schema compiled once and reused for every call.
pub struct InputSchema {
    schema: Value,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSchema").field("schema", &self.schema).finish()
    }
}

impl InputSchema {
    pub fn compile(schema: &Value) -> Result<Self, PwnaiError> {
        let validator = jsonschema::options()
            .build(schema)
            .map_err(|e| PwnaiError::config(format!("invalid input schema: {}", e)))?;
        Ok(Self {
            schema: schema.clone(),
            validator,
        })
    }

    /// Applies defaults, validates and decodes `raw` into `T`.
    pub fn decode<T: DeserializeOwned>(&self, raw: &Value) -> Result<T, PwnaiError> {
        let mut value = raw.clone();
        apply_defaults(&self.schema, &mut value);
        self.validate(&value)?;
        serde_json::from_value(value).map_err(|e| PwnaiError::invalid_input(e.to_string()))
    }

    /// Checks `value` as-is. Reports the first violation.
    pub fn validate(&self, value: &Value) -> Result<(), PwnaiError> {
        self.validator.validate(value).map_err(|error| {
            let message = match &error.kind {
                ValidationErrorKind::AdditionalProperties { unexpected } => format!(
                    "unknown property '{}' in input",
                    unexpected.first().map(String::as_str).unwrap_or("unknown")
                ),
                ValidationErrorKind::Required { property } => format!(
                    "missing required property '{}'",
                    property.as_str().unwrap_or_default()
                ),
                _ => {
                    let path = error.instance_path.to_string();
                    let field = path.trim_start_matches('/');
                    let field = if field.is_empty() { "input" } else { field };
                    format!("{}: {}", field, error)
                }
            };
            PwnaiError::invalid_input(message)
        })
    }
}

/// Validates `raw` against `schema`, applies defaults and decodes into `T`.
///
/// Compiles the schema on every call. Registered tools keep a compiled
/// [`InputSchema`] instead.
pub fn decode_input<T: DeserializeOwned>(schema: &Value, raw: &Value) -> Result<T, PwnaiError> {
    InputSchema::compile(schema)?.decode(raw)
}

/// Fills in `default` values for missing object properties, recursively.
pub fn apply_defaults(schema: &Value, value: &mut Value) {
    let (Some(props), Value::Object(obj)) = (schema.get("properties").and_then(Value::as_object), value)
    else {
        return;
    };
    for (name, prop_schema) in props {
        match obj.get_mut(name) {
            Some(existing) => apply_defaults(prop_schema, existing),
            None => {
                if let Some(default) = prop_schema.get("default") {
                    obj.insert(name.clone(), default.clone());
                }
            }
        }
    }
}

/// Decodes a schema `integer` into `u64`.
///
/// The schema accepts any whole number, including `5000.0` and `1e21`, so
/// whole-number floats are taken too and saturate at `u64::MAX`.
pub fn saturating_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(n) = number.as_u64() {
        return Ok(n);
    }
    match number.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        _ => Err(D::Error::custom(format!(
            "expected a non-negative integer, got {}",
            number
        ))),
    }
}

/// Like [`saturating_u64`] for fields whose schema bounds them to `u16`.
pub fn whole_u16<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let n = saturating_u64(deserializer)?;
    u16::try_from(n).map_err(|_| D::Error::custom(format!("{} is out of range", n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Window {
        widget_id: String,
        #[serde(deserialize_with = "saturating_u64")]
        line_start: u64,
        #[serde(deserialize_with = "saturating_u64")]
        count: u64,
    }

    fn window_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "widget_id": {"type": "string", "minLength": 1},
                "line_start": {"type": "integer", "minimum": 0, "default": 0},
                "count": {"type": "integer", "minimum": 1, "default": 200}
            },
            "required": ["widget_id"],
            "additionalProperties": false
        })
    }

    fn compiled() -> InputSchema {
        InputSchema::compile(&window_schema()).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let input: Window = compiled().decode(&json!({"widget_id": "ab12"})).unwrap();
        assert_eq!(
            input,
            Window {
                widget_id: "ab12".into(),
                line_start: 0,
                count: 200
            }
        );
    }

    #[test]
    fn test_unknown_property_rejected() {
        let err = compiled()
            .decode::<Window>(&json!({"widget_id": "a", "lines": 3}))
            .unwrap_err();
        assert_eq!(
            err,
            PwnaiError::InvalidInput("unknown property 'lines' in input".into())
        );
    }

    #[test]
    fn test_missing_required_rejected() {
        let err = compiled().decode::<Window>(&json!({"count": 3})).unwrap_err();
        assert_eq!(
            err,
            PwnaiError::InvalidInput("missing required property 'widget_id'".into())
        );
    }

    #[test]
    fn test_wrong_type_and_range() {
        let schema = compiled();
        let err = schema.decode::<Window>(&json!({"widget_id": 7})).unwrap_err();
        assert!(matches!(err, PwnaiError::InvalidInput(ref m) if m.starts_with("widget_id: ")), "{}", err);

        let err = schema
            .decode::<Window>(&json!({"widget_id": "a", "count": 0}))
            .unwrap_err();
        assert!(matches!(err, PwnaiError::InvalidInput(ref m) if m.starts_with("count: ")), "{}", err);

        let err = schema
            .decode::<Window>(&json!({"widget_id": "a", "line_start": -1}))
            .unwrap_err();
        assert!(matches!(err, PwnaiError::InvalidInput(ref m) if m.starts_with("line_start: ")), "{}", err);

        let err = schema
            .decode::<Window>(&json!({"widget_id": "a", "count": 2.5}))
            .unwrap_err();
        assert!(matches!(err, PwnaiError::InvalidInput(ref m) if m.starts_with("count: ")), "{}", err);
    }

    #[test]
    fn test_whole_number_floats_decode_and_saturate() {
        let schema = compiled();
        let input: Window = schema
            .decode(&json!({"widget_id": "ab", "count": 5000.0}))
            .unwrap();
        assert_eq!(input.count, 5000);

        let input: Window = schema
            .decode(&serde_json::from_str::<Value>(r#"{"widget_id":"ab","count":1e21}"#).unwrap())
            .unwrap();
        assert_eq!(input.count, u64::MAX);
    }

    #[test]
    fn test_enum_mismatch() {
        let schema = InputSchema::compile(&json!({
            "type": "object",
            "properties": {"scan_type": {"type": "string", "enum": ["quick", "full"]}},
            "required": ["scan_type"],
            "additionalProperties": false
        }))
        .unwrap();
        assert!(schema.validate(&json!({"scan_type": "quick"})).is_ok());
        let err = schema.validate(&json!({"scan_type": "loud"})).unwrap_err();
        assert!(matches!(err, PwnaiError::InvalidInput(ref m) if m.starts_with("scan_type: ")), "{}", err);
    }

    #[test]
    fn test_invalid_schema_is_config_error() {
        let err = InputSchema::compile(&json!({"type": 12})).unwrap_err();
        assert!(matches!(err, PwnaiError::Config(_)), "{}", err);
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args("").unwrap(), json!({}));
        assert_eq!(parse_args(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(matches!(parse_args("{not json"), Err(PwnaiError::InvalidInput(_))));
    }
}
