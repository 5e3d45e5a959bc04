//! Error types and HTTP response conversion
//!
//! The crate keeps three kinds of failure apart:
//!
//! - client input errors ([`Error::Validation`], [`Error::BadRequest`],
//!   [`Error::NotFound`]), rendered with their [`ApiError`] details
//! - deployment mistakes ([`Error::Configuration`]), logged loudly and answered
//!   with an opaque 500
//! - backend failures ([`Error::Storage`]), propagated unchanged and answered
//!   with an opaque 500
//!
//! The message of a server error travels with its response as an
//! [`InternalErrorDetail`] extension, so a debug deployment can expose it
//! without every handler knowing the environment.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::api_error::ApiError;

// ============================================================================
// Configuration Errors
// ============================================================================

/// A resource or include is declared inconsistently
///
/// These indicate a bug in how the service wires its resources together, not
/// a problem with the client's request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// An include declares no relation descriptors
    #[error("include '{include}' of '{resource}' declares no relations for provider '{target}'")]
    MissingRelations {
        /// Resource declaring the include
        resource: String,
        /// Include name
        include: String,
        /// Resource the include points at
        target: String,
    },

    /// An init param names a context value the parent provider does not hold
    #[error("provider '{resource}' has no context value '{key}' to forward as '{param}'")]
    MissingInitParam {
        /// Parent resource
        resource: String,
        /// Missing context key on the parent
        key: String,
        /// Parameter it was meant to be forwarded as
        param: String,
    },

    /// A scoped resource was fetched without its scoping context value
    #[error("provider '{resource}' is scoped by '{key}' but the context does not hold it")]
    MissingContext {
        /// Scoped resource
        resource: String,
        /// Missing context key
        key: String,
    },

    /// No resource is registered under this name
    #[error("resource '{0}' is not registered")]
    UnknownResource(String),

    /// A validated include has no settings on its resource
    #[error("resource '{resource}' has no include '{include}'")]
    UnknownInclude {
        /// Resource the include was requested on
        resource: String,
        /// Include name
        include: String,
    },

    /// A validated field or sort field is not a column of the backend
    #[error("resource '{resource}' has no column '{column}'")]
    UnknownColumn {
        /// Resource queried
        resource: String,
        /// Field with no backing column
        column: String,
    },
}

// ============================================================================
// Storage Errors
// ============================================================================

/// Storage operation being performed when the error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOperation {
    /// Establishing a connection
    Connect,
    /// Fetching a page of rows
    Fetch,
    /// Counting matching rows
    Count,
    /// Inserting a row
    Insert,
    /// Updating rows
    Update,
    /// Deleting rows
    Delete,
    /// Acquiring a connection from the pool
    PoolAcquire,
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Fetch => write!(f, "fetch"),
            Self::Count => write!(f, "count"),
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::PoolAcquire => write!(f, "pool_acquire"),
        }
    }
}

/// Category of storage error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    /// Failed to establish connection
    ConnectionFailed,
    /// Query execution failed
    QueryFailed,
    /// A row could not be decoded
    TypeConversion,
    /// Operation timed out
    Timeout,
    /// Connection pool exhausted
    PoolExhausted,
    /// Backend misconfigured
    Configuration,
    /// Other/unknown error
    Other,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::QueryFailed => write!(f, "query_failed"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Timeout => write!(f, "timeout"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Configuration => write!(f, "configuration"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured storage error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageError {
    /// The operation being performed when the error occurred
    pub operation: StorageOperation,
    /// The category of error
    pub kind: StorageErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Resource being queried, when known
    pub resource: Option<String>,
}

impl StorageError {
    /// Create a new storage error
    pub fn new(
        operation: StorageOperation,
        kind: StorageErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            resource: None,
        }
    }

    /// Create a query failed error
    pub fn query_failed(operation: StorageOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StorageErrorKind::QueryFailed, message)
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            StorageOperation::Connect,
            StorageErrorKind::ConnectionFailed,
            message,
        )
    }

    /// Record the resource being queried
    #[must_use]
    pub fn for_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Check if this error is transient
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            StorageErrorKind::ConnectionFailed
                | StorageErrorKind::Timeout
                | StorageErrorKind::PoolExhausted
        )
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Storage {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let Some(ref resource) = self.resource {
            write!(f, " [resource: {}]", resource)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {}

/// Sanitize a database URL by removing credentials
pub fn sanitize_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end + 3];
            let after_at = &url[at_pos + 1..];
            return format!("{}<redacted>@{}", scheme, after_at);
        }
    }
    url.to_string()
}

// ============================================================================
// Crate Error
// ============================================================================

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    /// One or more query parameters were rejected (422)
    #[error("Validation failed: {}", join_details(.0))]
    Validation(Vec<ApiError>),

    /// The request is malformed (400)
    #[error("Bad request: {0}")]
    BadRequest(ApiError),

    /// The requested entity does not exist (404)
    #[error("Not found: {0}")]
    NotFound(ApiError),

    /// Resources are wired together inconsistently
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Storage backend failure
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// Configuration loading error
    #[error("Configuration loading error: {0}")]
    Config(Box<figment::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

fn join_details(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(|error| error.detail.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// HTTP status this error is answered with
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(e) if e.kind == StorageErrorKind::Timeout => {
                StatusCode::GATEWAY_TIMEOUT
            }
            Self::Configuration(_)
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Message of a server error, attached to its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalErrorDetail(pub String);

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// All errors found while handling the request
    pub errors: Vec<ApiError>,
}

impl ErrorResponse {
    /// Create a response holding a single error
    pub fn single(error: ApiError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = status
            .is_server_error()
            .then(|| InternalErrorDetail(self.to_string()));

        let body = match self {
            Error::Validation(errors) => {
                tracing::debug!(count = errors.len(), "Rejected query parameters");
                ErrorResponse { errors }
            }

            Error::BadRequest(error) | Error::NotFound(error) => ErrorResponse::single(error),

            Error::Configuration(ref e) => {
                tracing::error!(error = %e, "Resource configuration error");
                ErrorResponse::single(ApiError::internal_error("Internal server error"))
            }

            Error::Storage(ref e) => {
                tracing::error!(
                    operation = %e.operation,
                    kind = %e.kind,
                    resource = ?e.resource,
                    retriable = e.is_retriable(),
                    "Storage error: {}", e.message
                );

                let detail = match e.kind {
                    StorageErrorKind::Timeout => "Storage operation timed out",
                    _ => "Storage operation failed",
                };
                ErrorResponse::single(ApiError::internal_error(detail))
            }

            Error::Config(e) => {
                tracing::error!("Configuration loading error: {}", e);
                ErrorResponse::single(ApiError::internal_error("Internal server error"))
            }

            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                ErrorResponse::single(ApiError::internal_error("I/O operation failed"))
            }

            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ErrorResponse::single(ApiError::internal_error("Internal server error"))
            }
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(detail) = detail {
            response.extensions_mut().insert(detail);
        }
        response
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        match err {
            E::PoolTimedOut => Self::new(
                StorageOperation::PoolAcquire,
                StorageErrorKind::PoolExhausted,
                "Connection pool timed out",
            ),
            E::PoolClosed => Self::connection_failed("Connection pool is closed"),
            E::Configuration(e) => Self::new(
                StorageOperation::Connect,
                StorageErrorKind::Configuration,
                e.to_string(),
            ),
            E::Io(e) => Self::connection_failed(e.to_string()),
            E::Tls(e) => Self::connection_failed(format!("TLS error: {}", e)),
            E::ColumnDecode { index, source } => Self::new(
                StorageOperation::Fetch,
                StorageErrorKind::TypeConversion,
                format!("Failed to decode column {}: {}", index, source),
            ),
            E::Decode(e) => Self::new(
                StorageOperation::Fetch,
                StorageErrorKind::TypeConversion,
                e.to_string(),
            ),
            E::Database(e) => {
                let message = e.message().to_string();
                let kind = if message.contains("timeout") || message.contains("canceling statement")
                {
                    StorageErrorKind::Timeout
                } else {
                    StorageErrorKind::QueryFailed
                };
                Self::new(StorageOperation::Fetch, kind, message)
            }
            other => Self::new(
                StorageOperation::Fetch,
                StorageErrorKind::Other,
                other.to_string(),
            ),
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(StorageError::from(err))
    }
}
