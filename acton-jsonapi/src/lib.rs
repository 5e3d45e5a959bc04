//! # acton-jsonapi
//!
//! JSON:API style query parameters and nested-include data providers for
//! axum services.
//!
//! ## Features
//!
//! - **Query parsing**: `include`, `fields`, `retrieve`, `filter[...]`,
//!   `page[...]` and `sort` parsed into a tree mirroring the include paths
//! - **Validation**: every invalid parameter reported at once, with the
//!   offending parameter as the error source
//! - **Filters**: equality and list membership, with negation and ordering
//!   via key suffixes (`__ne`, `__lte`, `__gte`)
//! - **Data providers**: paged fetches with total counts; includes resolved
//!   concurrently and merged into each row
//! - **Writes**: create, update and delete for resources declaring a body
//!   schema, with every body violation reported with a pointer
//! - **Storage**: in-memory tables, PostgreSQL tables with the `database`
//!   feature
//! - **Configuration**: figment (TOML + environment) with XDG lookup
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use acton_jsonapi::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Load configuration
//!     let config = Config::load()?;
//!
//!     // Initialize tracing
//!     init_tracing(&config)?;
//!
//!     // Declare resources
//!     let people = MemoryTable::from_values([json!({"id": 10, "name": "Ada"})]);
//!     let articles = MemoryTable::from_values([json!({"id": 1, "author_id": 10, "title": "Hello"})]);
//!     let registry = ResourceRegistry::new()
//!         .register(
//!             Resource::new("articles", DataSource::Memory(articles))
//!                 .fields(["id", "author_id", "title"])
//!                 .filters(["title"])
//!                 .sort_fields(["id", "title"])
//!                 .include(
//!                     "author",
//!                     IncludeSettings::new("people").relation(Relation::new("id", "author_id")),
//!                 ),
//!         )
//!         .register(Resource::new("people", DataSource::Memory(people)).fields(["id", "name"]));
//!     registry.check()?;
//!
//!     // Serve GET /articles and GET /articles/{id}
//!     let app = router(Arc::new(registry), &config);
//!     let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.service.port)).await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api_error;
pub mod body;
pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod observability;
pub mod params;
pub mod projection;
pub mod provider;
pub mod resource;

#[cfg(feature = "database")]
pub mod database;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::api_error::{ApiError, ErrorCode, ErrorSource};
    pub use crate::body::{BodySchema, FieldKind};
    pub use crate::config::{Config, DatabaseConfig, QueryConfig, ServiceConfig};
    pub use crate::error::{
        ConfigurationError, Error, ErrorResponse, InternalErrorDetail, Result,
    };

    #[cfg(feature = "database")]
    pub use crate::database::create_pool;

    pub use crate::error::{StorageError, StorageErrorKind, StorageOperation};
    pub use crate::filter::{ComparisonFilter, ComparisonOperator, FilterValue, Filters};
    pub use crate::handlers::{
        create, list, remove, resource_router, retrieve, router, update, ResourceState,
    };
    pub use crate::observability::init_tracing;
    pub use crate::params::{ParamValue, ParameterNode, QueryParams};
    pub use crate::projection::{OrderDirection, Projection};
    pub use crate::provider::{
        ContextKey, DataProvider, DataSource, MemoryTable, Page, PageMeta, PageParams,
        ProviderContext, ProviderParams, Row,
    };

    #[cfg(feature = "database")]
    pub use crate::provider::PgTable;

    pub use crate::resource::{
        IncludeSettings, InitParam, Relation, Resource, ResourceRegistry, Scope,
    };

    pub use axum::{
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::get,
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};

    // Re-export tracing macros and types
    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    // Re-export tokio for async runtime
    pub use tokio;
}
