//! Contextual values threaded through providers
//!
//! A [`ProviderContext`] holds request-scoped values (a tenant, the current
//! user) that a provider may be scoped by or forward to the providers of its
//! includes. Keys are declared once as [`ContextKey`] constants so every use
//! site refers to the same name.
//!
//! The handlers read the context from the request extensions, so a middleware
//! layer is expected to insert it:
//!
//! ```rust
//! use acton_jsonapi::provider::{ContextKey, ProviderContext};
//! use serde_json::json;
//!
//! const TENANT: ContextKey = ContextKey::new("tenant_id");
//!
//! let context = ProviderContext::new().with(TENANT, json!(7));
//! assert_eq!(context.get(TENANT), Some(&json!(7)));
//! ```

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;

use axum::extract::FromRequestParts;
use http::request::Parts;
use serde_json::Value;

/// Name of a context value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextKey(&'static str);

impl ContextKey {
    /// Declare a context key
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Key name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Request-scoped values available to providers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderContext {
    values: BTreeMap<ContextKey, Value>,
}

impl ProviderContext {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value
    #[must_use]
    pub fn with(mut self, key: ContextKey, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a value, replacing any previous one
    pub fn insert(&mut self, key: ContextKey, value: Value) {
        self.values.insert(key, value);
    }

    /// Value held under `key`
    #[must_use]
    pub fn get(&self, key: ContextKey) -> Option<&Value> {
        self.values.get(&key)
    }

    /// Whether the context holds no values
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S> FromRequestParts<S> for ProviderContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ProviderContext>()
            .cloned()
            .unwrap_or_default())
    }
}
