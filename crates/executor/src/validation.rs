//! Argument validation against a tool's input schema.

use catalog::{InputSchema, PropertySchema};
use serde_json::Value;

use crate::ExecutorError;

/// Validates an arguments object against the schema: required fields,
/// primitive types, and enum membership. Reports the first failure with a
/// JSON pointer to the offending argument.
pub fn validate_arguments(schema: &InputSchema, arguments: &Value) -> Result<(), ExecutorError> {
    let Some(object) = arguments.as_object() else {
        return Err(ExecutorError::Validation {
            pointer: "".to_string(),
            message: "arguments must be a JSON object".to_string(),
        });
    };

    for required in &schema.required {
        let missing = match object.get(required) {
            None => true,
            Some(Value::Null) => true,
            Some(_) => false,
        };

        if missing {
            return Err(ExecutorError::Validation {
                pointer: format!("/{required}"),
                message: "required argument is missing".to_string(),
            });
        }
    }

    for (name, value) in object {
        let Some(property) = schema.properties.get(name) else {
            // Unknown arguments pass through; upstream schemas are often
            // incomplete and the upstream service is the authority.
            continue;
        };

        check_property(name, property, value)?;
    }

    Ok(())
}

fn check_property(name: &str, property: &PropertySchema, value: &Value) -> Result<(), ExecutorError> {
    if value.is_null() {
        // Optional argument explicitly unset.
        return Ok(());
    }

    if let Some(expected) = property.r#type.as_deref() {
        let matches = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };

        if !matches {
            return Err(ExecutorError::Validation {
                pointer: format!("/{name}"),
                message: format!("expected {expected}, got {}", type_name(value)),
            });
        }
    }

    if let Some(allowed) = &property.r#enum
        && !allowed.contains(value)
    {
        return Err(ExecutorError::Validation {
            pointer: format!("/{name}"),
            message: format!("value is not one of the allowed options ({} allowed)", allowed.len()),
        });
    }

    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::json;

    use super::*;

    fn schema() -> InputSchema {
        let mut properties = IndexMap::new();
        properties.insert(
            "city".to_string(),
            PropertySchema {
                r#type: Some("string".into()),
                ..Default::default()
            },
        );
        properties.insert(
            "days".to_string(),
            PropertySchema {
                r#type: Some("integer".into()),
                ..Default::default()
            },
        );
        properties.insert(
            "units".to_string(),
            PropertySchema {
                r#type: Some("string".into()),
                r#enum: Some(vec![json!("metric"), json!("imperial")]),
                ..Default::default()
            },
        );

        InputSchema {
            properties,
            required: vec!["city".to_string()],
        }
    }

    #[test]
    fn valid_arguments_pass() {
        let args = json!({"city": "Paris", "days": 3, "units": "metric"});
        assert!(validate_arguments(&schema(), &args).is_ok());
    }

    #[test]
    fn missing_required_reports_pointer() {
        let err = validate_arguments(&schema(), &json!({"days": 3})).unwrap_err();
        match err {
            ExecutorError::Validation { pointer, .. } => assert_eq!(pointer, "/city"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn type_mismatch_reports_pointer() {
        let err = validate_arguments(&schema(), &json!({"city": "Paris", "days": "three"})).unwrap_err();
        match err {
            ExecutorError::Validation { pointer, message } => {
                assert_eq!(pointer, "/days");
                assert!(message.contains("expected integer"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn enum_violation_is_rejected() {
        let err = validate_arguments(&schema(), &json!({"city": "Paris", "units": "kelvin"})).unwrap_err();
        assert!(matches!(err, ExecutorError::Validation { pointer, .. } if pointer == "/units"));
    }

    #[test]
    fn unknown_arguments_pass_through() {
        let args = json!({"city": "Paris", "verbose": true});
        assert!(validate_arguments(&schema(), &args).is_ok());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert!(validate_arguments(&schema(), &json!([1, 2])).is_err());
    }
}
