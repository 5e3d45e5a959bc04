//! Request body validation for writes
//!
//! A writable resource declares a [`BodySchema`]: the fields a client may
//! send under `data`, their kinds, and which are required. Bodies have the
//! shape
//!
//! ```json
//! {"data": {"title": "Hello", "author_id": 10}}
//! ```
//!
//! Every violation is reported with a pointer into the body
//! (`data/title`), not just the first.
//!
//! # Example
//!
//! ```rust
//! use acton_jsonapi::body::{BodySchema, FieldKind};
//! use serde_json::json;
//!
//! let schema = BodySchema::new()
//!     .required("title", FieldKind::String)
//!     .optional("author_id", FieldKind::Integer);
//!
//! let row = schema.validate(&json!({"data": {"title": "Hello"}})).unwrap();
//! assert_eq!(row["title"], "Hello");
//!
//! let errors = schema.validate(&json!({"data": {"title": 1, "extra": true}})).unwrap_err();
//! assert_eq!(errors.len(), 2);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::api_error::ApiError;
use crate::provider::Row;

/// Key the written row is nested under
pub const BODY_DATA_KEY: &str = "data";

/// JSON kind a body field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A JSON string
    String,
    /// A JSON number without a fractional part
    Integer,
    /// Any JSON number
    Number,
    /// `true` or `false`
    Boolean,
    /// Any JSON value
    Any,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::Any => write!(f, "any"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BodyField {
    kind: FieldKind,
    required: bool,
}

/// Fields a client may write to a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodySchema {
    fields: BTreeMap<String, BodyField>,
}

impl BodySchema {
    /// Create a schema accepting no fields
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A field every body must carry, never null
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), BodyField { kind, required: true });
        self
    }

    /// A field a body may carry, possibly null
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), BodyField { kind, required: false });
        self
    }

    /// Names of every declared field
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Check a body against the schema and return the row under `data`
    pub fn validate(&self, body: &Value) -> Result<Row, Vec<ApiError>> {
        let Some(data) = body.get(BODY_DATA_KEY).and_then(Value::as_object) else {
            return Err(vec![ApiError::data_schema_validation_error(format!(
                "\"{BODY_DATA_KEY}\" must be an object"
            ))
            .with_pointer([BODY_DATA_KEY])]);
        };

        let mut errors = Vec::new();

        for (name, value) in data {
            let Some(field) = self.fields.get(name) else {
                errors.push(
                    ApiError::unknown_field(format!("Unknown field - \"{name}\""))
                        .with_pointer([BODY_DATA_KEY, name.as_str()]),
                );
                continue;
            };

            let accepted = if value.is_null() {
                !field.required
            } else {
                field.kind.accepts(value)
            };
            if !accepted {
                errors.push(
                    ApiError::invalid_form_field_value(format!(
                        "Field \"{name}\" must be a {}",
                        field.kind
                    ))
                    .with_pointer([BODY_DATA_KEY, name.as_str()]),
                );
            }
        }

        for (name, field) in &self.fields {
            if field.required && !data.contains_key(name) {
                errors.push(
                    ApiError::required_field(format!("Field \"{name}\" is required"))
                        .with_pointer([BODY_DATA_KEY, name.as_str()]),
                );
            }
        }

        if errors.is_empty() {
            Ok(data.clone())
        } else {
            tracing::debug!(errors = errors.len(), "request body rejected");
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_error::{ErrorCode, ErrorSource};
    use serde_json::json;

    fn schema() -> BodySchema {
        BodySchema::new()
            .required("title", FieldKind::String)
            .optional("author_id", FieldKind::Integer)
            .optional("score", FieldKind::Number)
            .optional("draft", FieldKind::Boolean)
    }

    fn pointer(error: &ApiError) -> &str {
        match &error.source {
            Some(ErrorSource::Pointer(pointer)) => pointer,
            other => panic!("expected pointer source, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_body_returns_data() {
        let row = schema()
            .validate(&json!({"data": {"title": "Hello", "author_id": 10, "score": 1.5, "draft": null}}))
            .unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(row["author_id"], 10);
    }

    #[test]
    fn test_missing_data_object() {
        for body in [json!({}), json!({"data": [1]}), json!("text")] {
            let errors = schema().validate(&body).unwrap_err();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].code, ErrorCode::DataSchemaValidationError);
            assert_eq!(pointer(&errors[0]), "data");
        }
    }

    #[test]
    fn test_every_violation_is_reported() {
        let errors = schema()
            .validate(&json!({"data": {"author_id": "ten", "score": 2.5, "color": "red"}}))
            .unwrap_err();

        let found: Vec<_> = errors
            .iter()
            .map(|error| (error.code.as_str(), pointer(error)))
            .collect();
        assert_eq!(
            found,
            [
                ("invalid_form_field_value", "data/author_id"),
                ("unknown_field", "data/color"),
                ("required_field", "data/title"),
            ]
        );
    }

    #[test]
    fn test_required_field_rejects_null() {
        let errors = schema().validate(&json!({"data": {"title": null}})).unwrap_err();
        assert_eq!(errors[0].code, ErrorCode::InvalidFormFieldValue);
        assert_eq!(pointer(&errors[0]), "data/title");
    }

    #[test]
    fn test_integer_kind_rejects_fractions() {
        let errors = schema()
            .validate(&json!({"data": {"title": "t", "author_id": 1.5}}))
            .unwrap_err();
        assert_eq!(errors[0].code, ErrorCode::InvalidFormFieldValue);
        assert!(FieldKind::Any.accepts(&json!({"nested": true})));
    }
}
