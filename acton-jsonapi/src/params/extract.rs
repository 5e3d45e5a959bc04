//! Axum extractor for the parameter tree

use axum::extract::{FromRef, FromRequestParts, Query};
use http::request::Parts;
use http::Uri;

use super::ParameterNode;
use crate::api_error::ApiError;
use crate::config::QueryConfig;
use crate::error::Error;

/// The request's query string parsed into a [`ParameterNode`]
///
/// The include depth limit is read from the [`QueryConfig`] of the router
/// state.
///
/// ```rust
/// use acton_jsonapi::config::QueryConfig;
/// use acton_jsonapi::params::QueryParams;
/// use axum::{routing::get, Router};
///
/// async fn list(QueryParams(node): QueryParams) -> String {
///     format!("{} includes", node.include.len())
/// }
///
/// let app: Router = Router::new()
///     .route("/articles", get(list))
///     .with_state(QueryConfig::default());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(pub ParameterNode);

impl ParameterNode {
    /// Parse the query string of a URI
    ///
    /// A query string that is not valid `application/x-www-form-urlencoded`
    /// is rejected with `invalid_format`; an include path deeper than
    /// `max_include_depth` with `invalid_query_parameter`.
    pub fn from_uri(uri: &Uri, max_include_depth: usize) -> Result<Self, Error> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri).map_err(|e| {
            tracing::debug!(error = %e, "malformed query string");
            Error::BadRequest(ApiError::invalid_format(format!("Malformed query string: {e}")))
        })?;

        Self::from_pairs_with_depth(pairs, max_include_depth)
            .map_err(|error| Error::Validation(vec![error]))
    }
}

impl<S> FromRequestParts<S> for QueryParams
where
    QueryConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = QueryConfig::from_ref(state);
        ParameterNode::from_uri(&parts.uri, config.max_include_depth).map(QueryParams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;

    #[test]
    fn test_from_uri_decodes_brackets() {
        let uri: Uri = "/articles?include=author&filter%5Bauthor.name%5D=Ada%2CGrace&page%5Blimit%5D=5"
            .parse()
            .unwrap();
        let node = ParameterNode::from_uri(&uri, 8).unwrap();

        assert_eq!(
            node.include["author"].filter["name"],
            ParamValue::List(vec!["Ada".to_string(), "Grace".to_string()])
        );
        assert_eq!(node.limit(), Some(&ParamValue::Single("5".to_string())));
    }

    #[test]
    fn test_from_uri_without_query() {
        let uri: Uri = "/articles".parse().unwrap();
        assert!(ParameterNode::from_uri(&uri, 8).unwrap().is_empty());
    }

    #[test]
    fn test_from_uri_rejects_deep_include() {
        let uri: Uri = "/people?include=a.b.c".parse().unwrap();
        assert!(matches!(
            ParameterNode::from_uri(&uri, 2),
            Err(Error::Validation(ref errors)) if errors.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_extractor() {
        let request = http::Request::builder()
            .uri("/articles?sort=-created_at&sort=id")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let config = QueryConfig::default();
        let QueryParams(node) = QueryParams::from_request_parts(&mut parts, &config)
            .await
            .unwrap();
        assert_eq!(node.sort, ["-created_at", "id"]);
    }
}
