//! Boundary between untyped transport parameters and typed engine requests.
//!
//! A dispatch layer receives `serde_json::Value` parameter bags. They are
//! converted here, once, into the request structs the engine accepts; the
//! engine itself never inspects untyped maps.

use crate::core::error::PalaceError;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// Decode a JSON parameter object into a typed request.
pub fn decode_params<T: DeserializeOwned>(op: &str, params: JsonValue) -> Result<T, PalaceError> {
    let params = match params {
        JsonValue::Null => JsonValue::Object(Default::default()),
        JsonValue::Object(_) => params,
        other => {
            return Err(PalaceError::ValidationError(format!(
                "{}: params must be an object, got {}",
                op,
                json_type_name(&other)
            )));
        }
    };
    serde_json::from_value(params)
        .map_err(|e| PalaceError::ValidationError(format!("{}: {}", op, e)))
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
