//! HTTP handlers for collections and entities
//!
//! [`router`] mounts every registered resource under `/{name}`:
//!
//! - `GET /{name}` returns a page `{data, meta}` ([`list`])
//! - `GET /{name}/{id}` returns one row or 404 ([`retrieve`])
//!
//! A resource declared [`writable`](crate::resource::Resource::writable) also
//! gets
//!
//! - `POST /{name}` creating a row, 201 ([`create`])
//! - `PUT /{name}/{id}` overwriting fields of a row, 200 or 404 ([`update`])
//! - `DELETE /{name}/{id}` removing a row, 204 or 404 ([`remove`])
//!
//! Write bodies are JSON documents `{"data": {...}}` checked against the
//! resource's [`BodySchema`]. Reads accept the full query parameter surface
//! (`include`, `fields`, `retrieve`, `filter[...]`, `page[...]`, `sort`). A
//! [`ProviderContext`] placed in the request extensions by an upstream layer
//! is passed to the providers.
//!
//! Unknown paths answer 404 `entity_not_found` and unsupported methods 405
//! `method_not_allowed`, both as JSON error bodies. In the `dev` environment
//! 500 responses carry the underlying error message.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use acton_jsonapi::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let articles = MemoryTable::from_values([json!({"id": 1, "title": "Hello"})]);
//!     let registry = ResourceRegistry::new().register(
//!         Resource::new("articles", DataSource::Memory(articles))
//!             .fields(["id", "title"])
//!             .writable(BodySchema::new().required("title", FieldKind::String)),
//!     );
//!     registry.check()?;
//!
//!     let app = router(Arc::new(registry), &config);
//!     let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.service.port)).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRef, Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Json, Router,
};
use serde_json::{json, Value};

use crate::api_error::{ApiError, ErrorCode};
use crate::body::{BodySchema, BODY_DATA_KEY};
use crate::config::{Config, QueryConfig};
use crate::error::{ConfigurationError, Error, ErrorResponse, InternalErrorDetail, Result};
use crate::params::{ParameterNode, QueryParams};
use crate::provider::{DataProvider, ProviderContext};
use crate::resource::{Resource, ResourceRegistry};

/// State shared by the handlers of one resource
#[derive(Debug, Clone)]
pub struct ResourceState {
    registry: Arc<ResourceRegistry>,
    resource: Arc<Resource>,
    query: QueryConfig,
}

impl ResourceState {
    /// State for the resource registered as `name`
    pub fn new(
        registry: Arc<ResourceRegistry>,
        name: &str,
        query: QueryConfig,
    ) -> std::result::Result<Self, ConfigurationError> {
        let resource = registry.get(name)?;
        Ok(Self {
            registry,
            resource,
            query,
        })
    }

    fn provider(
        &self,
        node: &ParameterNode,
        context: ProviderContext,
    ) -> Result<DataProvider> {
        let params = self.resource.validate(&self.registry, node, &self.query)?;
        Ok(DataProvider::for_resource(
            Arc::clone(&self.registry),
            Arc::clone(&self.resource),
            params,
            context,
        ))
    }

    /// Provider narrowed to the entity `id`
    fn entity(&self, id: &str, context: ProviderContext) -> Result<DataProvider> {
        let mut provider = self.provider(&ParameterNode::new(), context)?;
        provider.filter_id(id)?;
        Ok(provider)
    }

    fn body_schema(&self) -> Result<&BodySchema> {
        self.resource.body_schema().ok_or_else(|| {
            Error::Internal(format!("resource '{}' is not writable", self.resource.name()))
        })
    }

    fn not_found(&self, id: &str) -> Error {
        Error::NotFound(ApiError::entity_not_found(format!(
            "Requested {} \"{}\" was not found",
            self.resource.name(),
            id
        )))
    }
}

impl FromRef<ResourceState> for QueryConfig {
    fn from_ref(state: &ResourceState) -> Self {
        state.query
    }
}

/// `GET /{name}`: one page of the collection
pub async fn list(
    State(state): State<ResourceState>,
    context: ProviderContext,
    QueryParams(node): QueryParams,
) -> Result<Json<Value>> {
    let provider = state.provider(&node, context)?;
    let page = provider.get_many().await?;

    let mut body = Value::from(page);
    retain_page_sections(&mut body, &node);
    Ok(Json(body))
}

/// `GET /{name}/{id}`: the entity whose id field equals `id`
pub async fn retrieve(
    State(state): State<ResourceState>,
    Path(id): Path<String>,
    context: ProviderContext,
    QueryParams(node): QueryParams,
) -> Result<Json<Value>> {
    let mut provider = state.provider(&node, context)?;
    provider.filter_id(&id)?;

    let Some(mut row) = provider.get_one().await?.map(Value::Object) else {
        return Err(state.not_found(&id));
    };

    retain_row_sections(&mut row, &node);
    Ok(Json(row))
}

/// `POST /{name}`: insert the row under `data`
pub async fn create(
    State(state): State<ResourceState>,
    context: ProviderContext,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let row = state
        .body_schema()?
        .validate(&read_json(&headers, &body)?)
        .map_err(Error::Validation)?;

    let provider = state.provider(&ParameterNode::new(), context)?;
    let created = provider.create(row).await?;

    tracing::info!(resource = state.resource.name(), "entity created");
    Ok((StatusCode::CREATED, Json(json!({ BODY_DATA_KEY: created }))))
}

/// `PUT /{name}/{id}`: overwrite the fields under `data` on the entity `id`
pub async fn update(
    State(state): State<ResourceState>,
    Path(id): Path<String>,
    context: ProviderContext,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let provider = state.entity(&id, context)?;
    if provider.get_one().await?.is_none() {
        return Err(state.not_found(&id));
    }

    let changes = state
        .body_schema()?
        .validate(&read_json(&headers, &body)?)
        .map_err(Error::Validation)?;

    let Some(updated) = provider.update(changes).await? else {
        return Err(state.not_found(&id));
    };

    tracing::info!(resource = state.resource.name(), id = %id, "entity updated");
    Ok(Json(json!({ BODY_DATA_KEY: updated })))
}

/// `DELETE /{name}/{id}`: remove the entity `id`
pub async fn remove(
    State(state): State<ResourceState>,
    Path(id): Path<String>,
    context: ProviderContext,
) -> Result<StatusCode> {
    let provider = state.entity(&id, context)?;
    if !provider.delete().await? {
        return Err(state.not_found(&id));
    }

    tracing::info!(resource = state.resource.name(), id = %id, "entity deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Fallback for paths no resource serves
pub async fn not_found() -> Error {
    Error::NotFound(ApiError::entity_not_found("Requested resource was not found"))
}

/// Fallback for methods a resource does not serve
pub async fn method_not_allowed() -> Response {
    let error = ApiError::new(ErrorCode::custom("Method Not Allowed"), "Method not allowed");
    (StatusCode::METHOD_NOT_ALLOWED, Json(ErrorResponse::single(error))).into_response()
}

/// Routes for one resource: `/` lists, `/{id}` retrieves, plus writes when
/// the resource declares a body schema
pub fn resource_router(state: ResourceState) -> Router {
    let mut collection: MethodRouter<ResourceState> = get(list);
    let mut entity: MethodRouter<ResourceState> = get(retrieve);

    if state.resource.body_schema().is_some() {
        collection = collection.post(create);
        entity = entity.put(update).delete(remove);
    }

    Router::new()
        .route("/", collection)
        .route("/{id}", entity)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state)
}

/// Routes for every registered resource, each nested under `/{name}`
///
/// Paths outside every resource answer [`not_found`]. When the service runs
/// in debug mode, 500 bodies are rewritten to carry the error message.
pub fn router(registry: Arc<ResourceRegistry>, config: &Config) -> Router {
    let names: Vec<String> = registry.names().map(str::to_string).collect();

    let app = names
        .into_iter()
        .fold(Router::new(), |app, name| {
            match ResourceState::new(Arc::clone(&registry), &name, config.query) {
                Ok(state) => app.nest(&format!("/{name}"), resource_router(state)),
                Err(e) => {
                    tracing::error!(error = %e, "skipping resource");
                    app
                }
            }
        })
        .fallback(not_found);

    if config.service.is_debug() {
        app.layer(map_response(expose_internal_detail))
    } else {
        app
    }
}

/// Replace an opaque 500 body with the message of the error behind it
async fn expose_internal_detail(response: Response) -> Response {
    let Some(InternalErrorDetail(detail)) = response.extensions().get::<InternalErrorDetail>().cloned() else {
        return response;
    };

    let (parts, _) = response.into_parts();
    let body = ErrorResponse::single(ApiError::internal_error(detail));
    (parts, Json(body)).into_response()
}

/// Parse a JSON request body, rejecting other content types
fn read_json(headers: &HeaderMap, body: &[u8]) -> Result<Value> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        return Err(Error::BadRequest(ApiError::invalid_format(
            "Content type must be application/json",
        )));
    }

    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "unparseable request body");
        Error::BadRequest(ApiError::invalid_format("Invalid json"))
    })
}

/// Keep only the sections named by `retrieve`, recursively through includes
fn retain_page_sections(page: &mut Value, node: &ParameterNode) {
    if let Some(rows) = page.get_mut("data").and_then(Value::as_array_mut) {
        for row in rows {
            retain_row_sections(row, node);
        }
    }

    if node.retrieve.is_empty() {
        return;
    }
    if let Some(sections) = page.as_object_mut() {
        sections.retain(|section, _| node.retrieve.iter().any(|kept| kept == section));
    }
}

fn retain_row_sections(row: &mut Value, node: &ParameterNode) {
    for (name, child) in &node.include {
        if let Some(included) = row.get_mut(name.as_str()) {
            retain_page_sections(included, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_retain_sections_recursively() {
        let node = ParameterNode::from_pairs([
            ("include", "author"),
            ("retrieve", "data,author.meta"),
        ])
        .unwrap();
        let mut page = json!({
            "data": [{
                "id": 1,
                "author": {"data": [{"id": 10}], "meta": {"count": 1, "total_count": 1, "offset": 0}}
            }],
            "meta": {"count": 1, "total_count": 1, "offset": 0}
        });

        retain_page_sections(&mut page, &node);

        assert_eq!(
            page,
            json!({
                "data": [{
                    "id": 1,
                    "author": {"meta": {"count": 1, "total_count": 1, "offset": 0}}
                }]
            })
        );
    }

    #[test]
    fn test_no_retrieve_keeps_everything() {
        let node = ParameterNode::new();
        let mut page = json!({"data": [], "meta": {"count": 0, "total_count": 0, "offset": 0}});
        let expected = page.clone();

        retain_page_sections(&mut page, &node);
        assert_eq!(page, expected);
    }

    #[test]
    fn test_unknown_resource_state() {
        let registry = Arc::new(ResourceRegistry::new());
        assert!(matches!(
            ResourceState::new(registry, "articles", QueryConfig::default()),
            Err(ConfigurationError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_read_json() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            read_json(&headers, b"{}"),
            Err(Error::BadRequest(ref e)) if e.code == ErrorCode::InvalidFormat
        ));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert_eq!(read_json(&headers, br#"{"data": {}}"#).unwrap(), json!({"data": {}}));

        match read_json(&headers, b"{not json") {
            Err(Error::BadRequest(e)) => assert_eq!(e.detail, "Invalid json"),
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_internal_detail_replaces_opaque_body() {
        let error = Error::Internal("disk on fire".to_string());
        let response = expose_internal_detail(error.into_response()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["errors"][0]["code"], "internal_error");
        assert_eq!(body["errors"][0]["detail"], "Internal server error: disk on fire");
    }
}
