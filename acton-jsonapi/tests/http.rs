use std::sync::Arc;

use acton_jsonapi::prelude::*;
use axum::body::Body;
use http::Request;
use serde_json::{json, Value};
use tower::ServiceExt;

const TENANT: ContextKey = ContextKey::new("tenant_id");

fn registry() -> Arc<ResourceRegistry> {
    let articles = MemoryTable::from_values([
        json!({"id": 1, "author_id": 10, "title": "First", "tenant_id": 1}),
        json!({"id": 2, "author_id": 20, "title": "Second", "tenant_id": 1}),
        json!({"id": 3, "author_id": 10, "title": "Third", "tenant_id": 2}),
    ]);
    let people = MemoryTable::from_values([
        json!({"id": 10, "name": "Ada", "team_id": 100}),
        json!({"id": 20, "name": "Grace", "team_id": 200}),
    ]);
    let teams = MemoryTable::from_values([
        json!({"id": 100, "name": "Engines"}),
        json!({"id": 200, "name": "Compilers"}),
    ]);
    let comments = MemoryTable::from_values([json!({"id": 1, "article_id": 1, "body": "Nice"})]);

    let registry = ResourceRegistry::new()
        .register(
            Resource::new("articles", DataSource::Memory(articles.clone()))
                .fields(["id", "author_id", "title"])
                .filters(["id", "title"])
                .sort_fields(["id", "title"])
                .include(
                    "author",
                    IncludeSettings::new("people").relation(Relation::new("id", "author_id")),
                ),
        )
        .register(
            Resource::new("people", DataSource::Memory(people.clone()))
                .fields(["id", "name"])
                .filters(["name"])
                .include(
                    "team",
                    IncludeSettings::new("teams").relation(Relation::new("id", "team_id")),
                ),
        )
        .register(Resource::new("teams", DataSource::Memory(teams)).fields(["id", "name"]))
        .register(
            Resource::new("notes", DataSource::Memory(articles)).scope(TENANT, "tenant_id"),
        )
        .register(Resource::new("keyed", DataSource::Memory(people)).id_field("uuid"))
        .register(
            Resource::new("comments", DataSource::Memory(comments)).writable(
                BodySchema::new()
                    .required("body", FieldKind::String)
                    .optional("article_id", FieldKind::Integer),
            ),
        );
    registry.check().unwrap();

    Arc::new(registry)
}

fn config(environment: &str) -> Config {
    let mut config = Config::default();
    config.service.environment = environment.to_string();
    config
}

fn app() -> Router {
    router(registry(), &config("production"))
}

async fn send(app: Router, uri: &str) -> (StatusCode, Value) {
    call(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn send_json(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    call(app, request).await
}

/// Status and JSON body of a response, `Null` when the body is empty
async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if bytes.is_empty() {
        return (status, Value::Null);
    }
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_list_returns_page_with_meta() {
    let (status, body) = send(app(), "/articles").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert_eq!(body["meta"], json!({"count": 3, "total_count": 3, "offset": 0}));
}

#[tokio::test]
async fn test_list_with_include_filter_and_page() {
    let (status, body) = send(
        app(),
        "/articles?include=author&fields=id,author_id&filter%5Bauthor.name%5D=Ada&page%5Blimit%5D=2",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"], json!({"count": 2, "total_count": 3, "offset": 0}));

    let first = &body["data"][0];
    assert_eq!(first["id"], 1);
    assert!(first.get("title").is_none());
    assert_eq!(
        first["author"]["data"],
        json!([{"id": 10, "name": "Ada", "team_id": 100}])
    );

    // Grace wrote the second article, so the Ada filter leaves nothing
    let second = &body["data"][1];
    assert_eq!(second["author"]["meta"]["count"], 0);
}

#[tokio::test]
async fn test_sort_and_comparison_filter() {
    let (_, body) = send(app(), "/articles?sort=-id&page%5Blimit%5D=1").await;
    assert_eq!(body["data"][0]["id"], 3);

    let (_, body) = send(app(), "/articles?filter%5Bid__gte%5D=2").await;
    assert_eq!(body["meta"]["total_count"], 2);

    let (_, body) = send(app(), "/articles?filter%5Bid%5D=1,3").await;
    assert_eq!(body["meta"]["total_count"], 2);
}

#[tokio::test]
async fn test_invalid_parameters_are_reported_together() {
    let (status, body) = send(
        app(),
        "/articles?fields=secret&page%5Blimit%5D=abc&include=comments",
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 3);
    assert!(errors
        .iter()
        .all(|error| error["code"] == "invalid_query_parameter"));
    assert_eq!(
        errors[0]["detail"],
        "Requested field is not available - \"secret\""
    );
    assert_eq!(errors[1]["source"], json!({"parameter": "page[limit]"}));
    assert_eq!(errors[2]["source"], json!({"parameter": "include"}));
}

#[tokio::test]
async fn test_ordering_filter_rejects_list() {
    let (status, body) = send(app(), "/articles?filter%5Bid__lte%5D=1,2").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["code"], "invalid_filter_operator");
    assert_eq!(body["errors"][0]["source"], json!({"parameter": "filter[id__lte]"}));
}

#[tokio::test]
async fn test_retrieve_by_id() {
    let (status, body) = send(app(), "/articles/2?include=author").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Second");
    assert_eq!(body["author"]["data"][0]["name"], "Grace");

    let (status, body) = send(app(), "/articles/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "entity_not_found");
}

#[tokio::test]
async fn test_retrieve_parameter_selects_sections() {
    let (status, body) = send(app(), "/articles?retrieve=meta").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"meta": {"count": 3, "total_count": 3, "offset": 0}}));
}

#[tokio::test]
async fn test_scoped_resource_reads_context_extension() {
    let scoped = app().layer(Extension(ProviderContext::new().with(TENANT, json!(2))));
    let (status, body) = send(scoped, "/notes").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total_count"], 1);
    assert_eq!(body["data"][0]["id"], 3);

    // Without the context the resource is misconfigured, not the client
    let (status, body) = send(app(), "/notes").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["errors"][0]["code"], "internal_error");
}

#[tokio::test]
async fn test_child_fieldset_keeps_nested_include_working() {
    let (status, body) = send(
        app(),
        "/articles?include=author,author.team&fields=id,author_id,author.name&filter%5Bid%5D=1",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let author = &body["data"][0]["author"]["data"][0];
    assert_eq!(author["name"], "Ada");
    assert_eq!(author["team"]["data"], json!([{"id": 100, "name": "Engines"}]));
}

#[tokio::test]
async fn test_deep_include_is_rejected() {
    let (status, body) = send(app(), "/articles?include=a.b.c.d.e.f.g.h.i").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["code"], "invalid_query_parameter");
    assert_eq!(body["errors"][0]["source"], json!({"parameter": "include"}));
}

#[tokio::test]
async fn test_unknown_path_and_method_answer_json() {
    let (status, body) = send(app(), "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "entity_not_found");

    let (status, body) = send_json(app(), "POST", "/articles", r#"{"data": {}}"#).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["errors"][0]["code"], "method_not_allowed");

    let (status, body) = send_json(app(), "DELETE", "/people/10", "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["errors"][0]["code"], "method_not_allowed");
}

#[tokio::test]
async fn test_id_field_without_column_is_a_server_error() {
    let (status, body) = send(app(), "/keyed/10").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["errors"][0]["code"], "internal_error");
    assert_eq!(body["errors"][0]["detail"], "Internal server error");
}

#[tokio::test]
async fn test_debug_environment_exposes_server_error_detail() {
    let debug = router(registry(), &config("dev"));
    let (status, body) = send(debug, "/keyed/10").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body["errors"][0]["detail"],
        "Configuration error: resource 'keyed' has no column 'uuid'"
    );

    // Client errors look the same in every environment
    let debug = router(registry(), &config("dev"));
    let (status, body) = send(debug, "/articles/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "entity_not_found");
}

#[tokio::test]
async fn test_create_update_and_delete() {
    let registry = registry();
    let app = || router(Arc::clone(&registry), &config("production"));

    let (status, body) = send_json(
        app(),
        "POST",
        "/comments",
        r#"{"data": {"body": "Hi", "article_id": 2}}"#,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"data": {"body": "Hi", "article_id": 2, "id": 2}}));

    let (status, body) = send(app(), "/comments/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"], "Hi");

    let (status, body) =
        send_json(app(), "PUT", "/comments/1", r#"{"data": {"body": "Edited"}}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["body"], "Edited");
    assert_eq!(body["data"]["article_id"], 1);

    let (status, body) = send_json(app(), "DELETE", "/comments/1", "").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = send_json(app(), "DELETE", "/comments/1", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "entity_not_found");

    let (_, body) = send(app(), "/comments").await;
    assert_eq!(body["meta"]["total_count"], 1);
}

#[tokio::test]
async fn test_write_body_errors() {
    let request = Request::builder()
        .method("POST")
        .uri("/comments")
        .body(Body::from(r#"{"data": {"body": "Hi"}}"#))
        .unwrap();
    let (status, body) = call(app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["code"], "invalid_format");

    let (status, body) = send_json(app(), "POST", "/comments", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["detail"], "Invalid json");

    let (status, body) = send_json(
        app(),
        "POST",
        "/comments",
        r#"{"data": {"article_id": "two", "color": "red"}}"#,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let found: Vec<_> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|error| (error["code"].clone(), error["source"]["pointer"].clone()))
        .collect();
    assert_eq!(
        found,
        [
            (json!("invalid_form_field_value"), json!("data/article_id")),
            (json!("unknown_field"), json!("data/color")),
            (json!("required_field"), json!("data/body")),
        ]
    );

    // A missing entity is reported before its body is looked at
    let (status, body) = send_json(app(), "PUT", "/comments/99", "{not json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "entity_not_found");
}
