//! Client-facing error objects
//!
//! Every error returned to a client is rendered as an [`ApiError`]: a
//! machine-readable [`ErrorCode`], a human readable `detail`, and an optional
//! [`ErrorSource`] naming the query parameter or the JSON body path at fault.
//!
//! # Example
//!
//! ```rust
//! use acton_jsonapi::api_error::{ApiError, ErrorCode};
//!
//! let error = ApiError::invalid_query_parameter("Requested field is not available - \"secret\"")
//!     .with_parameter("fields");
//!
//! assert_eq!(error.code, ErrorCode::InvalidQueryParameter);
//! assert_eq!(
//!     serde_json::to_value(&error).unwrap(),
//!     serde_json::json!({
//!         "code": "invalid_query_parameter",
//!         "detail": "Requested field is not available - \"secret\"",
//!         "source": {"parameter": "fields"}
//!     })
//! );
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Machine-readable error code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A query parameter names something unavailable or has a bad value
    InvalidQueryParameter,
    /// A body field is not known
    UnknownField,
    /// A required body field is missing
    RequiredField,
    /// A form field has an invalid value
    InvalidFormFieldValue,
    /// An unexpected server-side failure
    InternalError,
    /// The request is malformed
    InvalidFormat,
    /// The body does not match its declared schema
    DataSchemaValidationError,
    /// A comparison operator was applied to a value it does not support
    InvalidFilterOperator,
    /// The requested entity does not exist
    EntityNotFound,
    /// An application-defined code, lowercased with spaces replaced by `_`
    Custom(String),
}

impl ErrorCode {
    /// Build an application-defined code
    ///
    /// The code is lowercased and spaces become underscores, so an HTTP
    /// reason such as `Method Not Allowed` becomes `method_not_allowed`.
    /// Known codes are recognized.
    #[must_use]
    pub fn custom(code: &str) -> Self {
        let normalized = code.to_lowercase().replace(' ', "_");
        match normalized.as_str() {
            "invalid_query_parameter" => Self::InvalidQueryParameter,
            "unknown_field" => Self::UnknownField,
            "required_field" => Self::RequiredField,
            "invalid_form_field_value" => Self::InvalidFormFieldValue,
            "internal_error" => Self::InternalError,
            "invalid_format" => Self::InvalidFormat,
            "data_schema_validation_error" => Self::DataSchemaValidationError,
            "invalid_filter_operator" => Self::InvalidFilterOperator,
            "entity_not_found" => Self::EntityNotFound,
            _ => Self::Custom(normalized),
        }
    }

    /// The wire form of the code
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidQueryParameter => "invalid_query_parameter",
            Self::UnknownField => "unknown_field",
            Self::RequiredField => "required_field",
            Self::InvalidFormFieldValue => "invalid_form_field_value",
            Self::InternalError => "internal_error",
            Self::InvalidFormat => "invalid_format",
            Self::DataSchemaValidationError => "data_schema_validation_error",
            Self::InvalidFilterOperator => "invalid_filter_operator",
            Self::EntityNotFound => "entity_not_found",
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::custom(&code))
    }
}

/// Where in the request an error originated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    /// Query parameter name, e.g. `page[limit]`
    Parameter(String),
    /// Slash-joined path into the request body, e.g. `data/items/1`
    Pointer(String),
}

/// Structured client error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Human-readable explanation
    pub detail: String,
    /// Origin of the error in the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
}

impl ApiError {
    /// Create an error without a source
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            source: None,
        }
    }

    /// `invalid_query_parameter` error
    pub fn invalid_query_parameter(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidQueryParameter, detail)
    }

    /// `invalid_filter_operator` error
    pub fn invalid_filter_operator(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFilterOperator, detail)
    }

    /// `invalid_format` error
    pub fn invalid_format(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFormat, detail)
    }

    /// `entity_not_found` error
    pub fn entity_not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, detail)
    }

    /// `internal_error` error
    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, detail)
    }

    /// `unknown_field` error
    pub fn unknown_field(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownField, detail)
    }

    /// `required_field` error
    pub fn required_field(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::RequiredField, detail)
    }

    /// `invalid_form_field_value` error
    pub fn invalid_form_field_value(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFormFieldValue, detail)
    }

    /// `data_schema_validation_error` error
    pub fn data_schema_validation_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::DataSchemaValidationError, detail)
    }

    /// Attach the query parameter that caused the error
    #[must_use]
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.source = Some(ErrorSource::Parameter(parameter.into()));
        self
    }

    /// Attach the body path that caused the error
    ///
    /// ```rust
    /// use acton_jsonapi::api_error::{ApiError, ErrorCode, ErrorSource};
    ///
    /// let error = ApiError::new(ErrorCode::DataSchemaValidationError, "not a string")
    ///     .with_pointer(["items", "1", "name"]);
    /// assert_eq!(error.source, Some(ErrorSource::Pointer("items/1/name".to_string())));
    /// ```
    #[must_use]
    pub fn with_pointer<I>(mut self, path: I) -> Self
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let pointer = path
            .into_iter()
            .map(|segment| segment.to_string())
            .collect::<Vec<_>>()
            .join("/");
        self.source = Some(ErrorSource::Pointer(pointer));
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)?;
        match &self.source {
            Some(ErrorSource::Parameter(parameter)) => write!(f, " [parameter: {parameter}]"),
            Some(ErrorSource::Pointer(pointer)) => write!(f, " [pointer: {pointer}]"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_code_wire_form() {
        assert_eq!(ErrorCode::EntityNotFound.to_string(), "entity_not_found");
        assert_eq!(
            serde_json::to_value(ErrorCode::InvalidFilterOperator).unwrap(),
            json!("invalid_filter_operator")
        );
    }

    #[test]
    fn test_custom_code_is_lowercased_with_underscores() {
        assert_eq!(
            ErrorCode::custom("Method Not Allowed"),
            ErrorCode::Custom("method_not_allowed".to_string())
        );
        assert_eq!(
            ErrorCode::custom("InvalidToken"),
            ErrorCode::Custom("invalidtoken".to_string())
        );
        assert_eq!(ErrorCode::custom("Entity Not Found"), ErrorCode::EntityNotFound);
        assert_eq!(
            ErrorCode::custom("EntityNotFound"),
            ErrorCode::Custom("entitynotfound".to_string())
        );
    }

    #[test]
    fn test_error_without_source_omits_field() {
        let error = ApiError::invalid_format("Invalid json");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"code": "invalid_format", "detail": "Invalid json"})
        );
    }

    #[test]
    fn test_pointer_source() {
        let error = ApiError::data_schema_validation_error("bad").with_pointer(["data", "0", "name"]);
        assert_eq!(
            serde_json::to_value(&error).unwrap()["source"],
            json!({"pointer": "data/0/name"})
        );
    }

    #[test]
    fn test_round_trip_from_wire() {
        let error: ApiError = serde_json::from_value(json!({
            "code": "entity_not_found",
            "detail": "missing",
            "source": {"parameter": "id"}
        }))
        .unwrap();
        assert_eq!(error.code, ErrorCode::EntityNotFound);
        assert_eq!(error.source, Some(ErrorSource::Parameter("id".to_string())));
    }

    #[test]
    fn test_display() {
        let error = ApiError::invalid_query_parameter("bad limit").with_parameter("page[limit]");
        assert_eq!(
            error.to_string(),
            "invalid_query_parameter: bad limit [parameter: page[limit]]"
        );
    }
}
