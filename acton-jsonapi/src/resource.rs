//! Resource descriptors and request validation
//!
//! A [`Resource`] declares what clients may ask of one kind of entity: which
//! fields they may select, filter and sort on, which relations they may
//! include, and where its rows are stored. Resources are built once at startup
//! and collected in a [`ResourceRegistry`] that is shared read-only by every
//! request.
//!
//! A resource declared [`writable`](Resource::writable) also accepts
//! creates, updates and deletes, with bodies checked against its
//! [`BodySchema`].
//!
//! [`Resource::validate`] checks a parsed [`ParameterNode`] against the
//! declaration and produces the [`ProviderParams`] a
//! [`DataProvider`](crate::provider::DataProvider) is built from. Every
//! violation found is reported, not just the first.
//!
//! # Example
//!
//! ```rust
//! use acton_jsonapi::config::QueryConfig;
//! use acton_jsonapi::params::ParameterNode;
//! use acton_jsonapi::provider::{DataSource, MemoryTable};
//! use acton_jsonapi::resource::{IncludeSettings, Relation, Resource, ResourceRegistry};
//!
//! let registry = ResourceRegistry::new()
//!     .register(
//!         Resource::new("articles", DataSource::Memory(MemoryTable::default()))
//!             .fields(["id", "title", "author_id"])
//!             .filters(["author_id"])
//!             .sort_fields(["id"])
//!             .include(
//!                 "author",
//!                 IncludeSettings::new("people").relation(Relation::new("id", "author_id")),
//!             ),
//!     )
//!     .register(Resource::new("people", DataSource::Memory(MemoryTable::default())).fields(["name"]));
//!
//! let node = ParameterNode::from_pairs([
//!     ("include", "author"),
//!     ("fields", "title,author.name"),
//!     ("sort", "-id"),
//! ])
//! .unwrap();
//!
//! let articles = registry.get("articles").unwrap();
//! let params = articles.validate(&registry, &node, &QueryConfig::default()).unwrap();
//! assert_eq!(params.include["author"].fields, vec!["name".to_string()]);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::api_error::ApiError;
use crate::body::BodySchema;
use crate::config::QueryConfig;
use crate::error::{ConfigurationError, Error, Result};
use crate::filter::{ComparisonFilter, ComparisonOperator, FilterValue, Filters};
use crate::params::{ParamValue, ParameterNode, INCLUDE_PARAM};
use crate::projection::SortField;
use crate::provider::{ContextKey, DataSource, PageParams, ProviderParams};

/// Field every resource is looked up by when fetched singly
pub const DEFAULT_ID_FIELD: &str = "id";

/// Response sections a `retrieve` parameter may name
pub const RETRIEVABLE_SECTIONS: [&str; 2] = ["data", "meta"];

/// Correlates rows of an included resource with a row of the including one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Field on the included resource
    pub included_field: String,
    /// Field on the including (root) resource
    pub root_field: String,
}

impl Relation {
    /// Relate `included_field` of the included rows to `root_field` of the root row
    pub fn new(included_field: impl Into<String>, root_field: impl Into<String>) -> Self {
        Self {
            included_field: included_field.into(),
            root_field: root_field.into(),
        }
    }
}

/// Forwards a context value from an including provider to its includes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitParam {
    /// Key read from the including provider's context
    pub attribute: ContextKey,
    /// Key the value is stored under in the included provider's context
    pub param: ContextKey,
}

impl InitParam {
    /// Forward `attribute` as `param`
    #[must_use]
    pub const fn new(attribute: ContextKey, param: ContextKey) -> Self {
        Self { attribute, param }
    }
}

/// How a relation name resolves to another resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeSettings {
    /// Name of the included resource
    pub resource: String,
    /// Correlating fields, at least one required
    pub relations: Vec<Relation>,
    /// Context values forwarded to the included provider
    pub init_params: Vec<InitParam>,
}

impl IncludeSettings {
    /// Include rows of the resource registered as `resource`
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            relations: Vec::new(),
            init_params: Vec::new(),
        }
    }

    /// Add a correlating relation
    #[must_use]
    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Add a forwarded context value
    #[must_use]
    pub fn init_param(mut self, init_param: InitParam) -> Self {
        self.init_params.push(init_param);
        self
    }
}

/// Restricts every fetch of a resource to `field = context[key]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Context value to filter by
    pub key: ContextKey,
    /// Field filtered
    pub field: String,
}

/// Declaration of one resource
#[derive(Debug, Clone)]
pub struct Resource {
    name: String,
    id_field: String,
    source: DataSource,
    available_fields: BTreeSet<String>,
    available_filters: BTreeSet<String>,
    available_sort_fields: BTreeSet<String>,
    includes: BTreeMap<String, IncludeSettings>,
    scopes: Vec<Scope>,
    body_schema: Option<BodySchema>,
}

impl Resource {
    /// Declare a resource stored in `source`
    ///
    /// Nothing is selectable, filterable, sortable or includable until
    /// declared.
    pub fn new(name: impl Into<String>, source: DataSource) -> Self {
        Self {
            name: name.into(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            source,
            available_fields: BTreeSet::new(),
            available_filters: BTreeSet::new(),
            available_sort_fields: BTreeSet::new(),
            includes: BTreeMap::new(),
            scopes: Vec::new(),
            body_schema: None,
        }
    }

    /// Fields clients may select
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Fields clients may filter on
    #[must_use]
    pub fn filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_filters.extend(filters.into_iter().map(Into::into));
        self
    }

    /// Fields clients may sort by
    #[must_use]
    pub fn sort_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_sort_fields
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// Relation clients may include
    #[must_use]
    pub fn include(mut self, name: impl Into<String>, settings: IncludeSettings) -> Self {
        self.includes.insert(name.into(), settings);
        self
    }

    /// Restrict every fetch to rows whose `field` equals the context value `key`
    #[must_use]
    pub fn scope(mut self, key: ContextKey, field: impl Into<String>) -> Self {
        self.scopes.push(Scope {
            key,
            field: field.into(),
        });
        self
    }

    /// Accept writes whose bodies match `schema`
    #[must_use]
    pub fn writable(mut self, schema: BodySchema) -> Self {
        self.body_schema = Some(schema);
        self
    }

    /// Field a single entity is looked up by (`id` unless set)
    #[must_use]
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Resource name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field a single entity is looked up by
    #[must_use]
    pub fn id_field_name(&self) -> &str {
        &self.id_field
    }

    /// Storage backing the resource
    #[must_use]
    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// Settings of a declared include
    #[must_use]
    pub fn include_settings(&self, name: &str) -> Option<&IncludeSettings> {
        self.includes.get(name)
    }

    /// Context scopes applied to every fetch
    #[must_use]
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Schema of write bodies, if the resource is writable
    #[must_use]
    pub fn body_schema(&self) -> Option<&BodySchema> {
        self.body_schema.as_ref()
    }

    /// Validate a parameter node into provider parameters
    ///
    /// Client mistakes are collected into a single [`Error::Validation`].
    /// An include whose target resource is not registered is reported as a
    /// configuration error instead.
    pub fn validate(
        &self,
        registry: &ResourceRegistry,
        node: &ParameterNode,
        config: &QueryConfig,
    ) -> Result<ProviderParams> {
        let mut errors = Vec::new();
        let params = self.validate_at(registry, node, config, None, 0, &mut errors)?;

        if errors.is_empty() {
            Ok(params)
        } else {
            tracing::debug!(
                resource = %self.name,
                errors = errors.len(),
                "query parameters rejected"
            );
            Err(Error::Validation(errors))
        }
    }

    fn validate_at(
        &self,
        registry: &ResourceRegistry,
        node: &ParameterNode,
        config: &QueryConfig,
        path: Option<&str>,
        depth: usize,
        errors: &mut Vec<ApiError>,
    ) -> Result<ProviderParams> {
        let keyed = |family: &str, name: &str| match path {
            Some(path) => format!("{family}[{path}.{name}]"),
            None => format!("{family}[{name}]"),
        };

        // fields
        for field in unique(&node.fields) {
            if !self.available_fields.contains(field) {
                errors.push(
                    ApiError::invalid_query_parameter(format!(
                        "Requested field is not available - \"{field}\""
                    ))
                    .with_parameter("fields"),
                );
            }
        }

        // retrieve
        for section in unique(&node.retrieve) {
            if !RETRIEVABLE_SECTIONS.contains(&section.as_str()) {
                errors.push(
                    ApiError::invalid_query_parameter(format!(
                        "Requested section is not available - \"{section}\""
                    ))
                    .with_parameter("retrieve"),
                );
            }
        }

        // filters
        let mut filters = Filters::new();
        let mut unavailable_filters = BTreeSet::new();
        for (key, value) in &node.filter {
            let (field, _) = ComparisonOperator::split_key(key);
            if !self.available_filters.contains(field) {
                unavailable_filters.insert(field);
                continue;
            }

            let value = FilterValue::from(value);
            match ComparisonFilter::resolve(key, value.clone()) {
                Ok(_) => filters.insert(key.clone(), value),
                Err(e) => errors.push(
                    ApiError::invalid_filter_operator(e.to_string())
                        .with_parameter(keyed("filter", key)),
                ),
            }
        }
        for field in unavailable_filters {
            errors.push(
                ApiError::invalid_query_parameter(format!(
                    "Requested filter is not available - \"{field}\""
                ))
                .with_parameter(keyed("filter", field)),
            );
        }

        // page
        let limit = page_value(node.limit(), config.default_limit, "limit")
            .and_then(|limit| {
                if limit > config.max_limit {
                    Err(format!(
                        "Requested page limit \"{limit}\" is too big. Maximum is {}",
                        config.max_limit
                    ))
                } else {
                    Ok(limit)
                }
            })
            .unwrap_or_else(|detail| {
                errors.push(
                    ApiError::invalid_query_parameter(detail).with_parameter(keyed("page", "limit")),
                );
                config.default_limit
            });
        let offset = page_value(node.offset(), config.default_offset, "offset").unwrap_or_else(
            |detail| {
                errors.push(
                    ApiError::invalid_query_parameter(detail)
                        .with_parameter(keyed("page", "offset")),
                );
                config.default_offset
            },
        );

        // sort
        let mut sort = Vec::with_capacity(node.sort.len());
        let mut unavailable_sort = BTreeSet::new();
        for raw in &node.sort {
            let field = SortField::parse(raw).field;
            if self.available_sort_fields.contains(&field) {
                sort.push(raw.clone());
            } else if unavailable_sort.insert(field.clone()) {
                errors.push(
                    ApiError::invalid_query_parameter(format!(
                        "Requested sort field is not available - \"{field}\""
                    ))
                    .with_parameter("sort"),
                );
            }
        }

        // includes
        let mut include = BTreeMap::new();
        for (name, child) in &node.include {
            let Some(settings) = self.includes.get(name) else {
                errors.push(
                    ApiError::invalid_query_parameter(format!(
                        "Requested include is not available - \"{name}\""
                    ))
                    .with_parameter(INCLUDE_PARAM),
                );
                continue;
            };

            let target = registry.get(&settings.resource)?;
            let child_path = match path {
                Some(path) => format!("{path}.{name}"),
                None => name.clone(),
            };
            if depth >= config.max_include_depth {
                errors.push(
                    ApiError::invalid_query_parameter(format!(
                        "Requested include \"{child_path}\" is nested too deeply. Maximum depth is {}",
                        config.max_include_depth
                    ))
                    .with_parameter(INCLUDE_PARAM),
                );
                continue;
            }
            let params = target.validate_at(
                registry,
                child,
                config,
                Some(&child_path),
                depth + 1,
                errors,
            )?;
            include.insert(name.clone(), params);
        }

        Ok(ProviderParams {
            fields: node.fields.clone(),
            filters,
            page: PageParams::new(limit, offset),
            sort,
            include,
        })
    }
}

/// Values in first-seen order without repeats
fn unique(values: &[String]) -> impl Iterator<Item = &String> {
    let mut seen = BTreeSet::new();
    values.iter().filter(move |value| seen.insert(value.as_str()))
}

/// Parse a page value, falling back to `default` when absent
fn page_value(
    value: Option<&ParamValue>,
    default: u64,
    name: &str,
) -> std::result::Result<u64, String> {
    let Some(value) = value else {
        return Ok(default);
    };

    let raw = match value {
        ParamValue::Single(raw) => raw.clone(),
        ParamValue::List(values) => values.join(","),
    };

    raw.trim()
        .parse::<u64>()
        .map_err(|_| format!("Requested page {name} \"{raw}\" is not integer."))
}

/// Resources known to the service, by name
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, Arc<Resource>>,
}

impl ResourceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, replacing any registered under the same name
    #[must_use]
    pub fn register(mut self, resource: Resource) -> Self {
        self.resources
            .insert(resource.name.clone(), Arc::new(resource));
        self
    }

    /// Look up a resource
    pub fn get(&self, name: &str) -> std::result::Result<Arc<Resource>, ConfigurationError> {
        self.resources
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownResource(name.to_string()))
    }

    /// Names of every registered resource
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Check every include points at a registered resource and declares
    /// relations, and every writable resource has columns for its id and
    /// body fields
    ///
    /// Meant to be called once at startup so wiring mistakes surface before
    /// the first request.
    pub fn check(&self) -> std::result::Result<(), ConfigurationError> {
        for resource in self.resources.values() {
            if let Some(schema) = &resource.body_schema {
                let resolver = resource.source.resolver();
                let fields = std::iter::once(resource.id_field.as_str()).chain(schema.field_names());
                for field in fields {
                    if resolver.resolve(field).is_none() {
                        return Err(ConfigurationError::UnknownColumn {
                            resource: resource.name.clone(),
                            column: field.to_string(),
                        });
                    }
                }
            }

            for (include, settings) in &resource.includes {
                if settings.relations.is_empty() {
                    return Err(ConfigurationError::MissingRelations {
                        resource: resource.name.clone(),
                        include: include.clone(),
                        target: settings.resource.clone(),
                    });
                }
                self.get(&settings.resource)?;
            }
        }
        Ok(())
    }
}
