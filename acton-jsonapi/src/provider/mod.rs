//! Data providers
//!
//! A [`DataProvider`] turns validated [`ProviderParams`] into a [`Page`] of
//! rows from its resource's [`DataSource`], then resolves every requested
//! include into a nested page under the include name of each row.
//!
//! # Include resolution
//!
//! For each fetched row and each requested include, a child provider is built
//! for the included resource:
//!
//! - every declared [`Relation`](crate::resource::Relation) filters the child
//!   by `included_field = row[root_field]`; when the row has no value for
//!   `root_field`, the child is filtered by the literal name of `root_field`
//! - every declared [`InitParam`](crate::resource::InitParam) copies a value
//!   from the parent's context into the child's context
//! - the child's filters, sort, page and nested includes come from the
//!   include's own parameters; its fieldset is validated but not applied, so
//!   a nested include always sees the columns its relations read
//!
//! Includes are resolved concurrently, one child provider per row, and the
//! first failure aborts the whole fetch.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use acton_jsonapi::provider::{DataProvider, DataSource, MemoryTable, ProviderContext, ProviderParams};
//! use acton_jsonapi::resource::{Resource, ResourceRegistry};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> acton_jsonapi::error::Result<()> {
//! let articles = MemoryTable::from_values([json!({"id": 1, "title": "Hello"})]);
//! let registry = Arc::new(
//!     ResourceRegistry::new()
//!         .register(Resource::new("articles", DataSource::Memory(articles)).fields(["id", "title"])),
//! );
//!
//! let provider = DataProvider::new(
//!     registry,
//!     "articles",
//!     ProviderParams::default(),
//!     ProviderContext::new(),
//! )?;
//! let page = provider.get_many().await?;
//! assert_eq!(page.meta.count, 1);
//! # Ok(())
//! # }
//! ```

mod context;
mod memory;
#[cfg(feature = "database")]
mod postgres;

pub use context::{ContextKey, ProviderContext};
pub use memory::MemoryTable;
#[cfg(feature = "database")]
pub use postgres::PgTable;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api_error::ApiError;
use crate::error::{ConfigurationError, Error, Result};
use crate::filter::{ComparisonFilter, Filters};
use crate::projection::{ColumnRef, FieldResolver, Predicate, Projection};
use crate::resource::{IncludeSettings, Resource, ResourceRegistry};

/// A fetched row: field name to value
pub type Row = Map<String, Value>;

/// Page size used when none is requested
pub const DEFAULT_LIMIT: u64 = 100;

/// Page offset used when none is requested
pub const DEFAULT_OFFSET: u64 = 0;

/// Page bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    /// Maximum number of rows returned
    pub limit: u64,
    /// Number of matching rows skipped
    pub offset: u64,
}

impl PageParams {
    /// Create page bounds
    #[must_use]
    pub const fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_OFFSET)
    }
}

/// Validated parameters a provider is constructed with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderParams {
    /// Fields to return; empty returns every field
    pub fields: Vec<String>,
    /// Filters keyed by raw key
    pub filters: Filters,
    /// Page bounds
    pub page: PageParams,
    /// Sort fields, `-` prefixed for descending
    pub sort: Vec<String>,
    /// Parameters of each requested include
    pub include: BTreeMap<String, ProviderParams>,
}

/// Metadata of a fetched page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// Rows returned
    pub count: u64,
    /// Rows matching the filters, ignoring page bounds
    pub total_count: u64,
    /// Offset applied
    pub offset: u64,
}

/// A page of rows with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Rows, with included pages merged in
    pub data: Vec<Row>,
    /// Page metadata
    pub meta: PageMeta,
}

impl From<Page> for Value {
    fn from(page: Page) -> Self {
        serde_json::json!({
            "data": page.data.into_iter().map(Value::Object).collect::<Vec<_>>(),
            "meta": {
                "count": page.meta.count,
                "total_count": page.meta.total_count,
                "offset": page.meta.offset,
            },
        })
    }
}

/// Storage backing a resource
#[derive(Debug, Clone)]
pub enum DataSource {
    /// Rows held in memory
    Memory(MemoryTable),
    /// A PostgreSQL table
    #[cfg(feature = "database")]
    Postgres(PgTable),
}

impl DataSource {
    pub(crate) fn resolver(&self) -> &dyn FieldResolver {
        match self {
            Self::Memory(table) => table,
            #[cfg(feature = "database")]
            Self::Postgres(table) => table,
        }
    }

    async fn fetch(&self, projection: &Projection) -> Result<Vec<Row>> {
        match self {
            Self::Memory(table) => Ok(table.fetch(projection).await),
            #[cfg(feature = "database")]
            Self::Postgres(table) => table.fetch(projection).await,
        }
    }

    async fn count(&self, projection: &Projection) -> Result<u64> {
        match self {
            Self::Memory(table) => Ok(table.count(projection).await),
            #[cfg(feature = "database")]
            Self::Postgres(table) => table.count(projection).await,
        }
    }

    async fn insert(&self, id_field: &str, values: Vec<(ColumnRef, Value)>) -> Result<Row> {
        match self {
            Self::Memory(table) => Ok(table.insert(id_field, into_row(values)).await),
            #[cfg(feature = "database")]
            Self::Postgres(table) => table.insert(&values).await,
        }
    }

    async fn update(
        &self,
        predicates: &[Predicate],
        values: Vec<(ColumnRef, Value)>,
    ) -> Result<Vec<Row>> {
        match self {
            Self::Memory(table) => Ok(table.update(predicates, &into_row(values)).await),
            #[cfg(feature = "database")]
            Self::Postgres(table) => table.update(predicates, &values).await,
        }
    }

    async fn delete(&self, predicates: &[Predicate]) -> Result<u64> {
        match self {
            Self::Memory(table) => Ok(table.delete(predicates).await),
            #[cfg(feature = "database")]
            Self::Postgres(table) => table.delete(predicates).await,
        }
    }
}

fn into_row(values: Vec<(ColumnRef, Value)>) -> Row {
    values
        .into_iter()
        .map(|(column, value)| (column.name, value))
        .collect()
}

/// Fetches pages of one resource and resolves their includes
#[derive(Debug, Clone)]
pub struct DataProvider {
    registry: Arc<ResourceRegistry>,
    resource: Arc<Resource>,
    params: ProviderParams,
    context: ProviderContext,
}

impl DataProvider {
    /// Create a provider for a registered resource
    pub fn new(
        registry: Arc<ResourceRegistry>,
        resource: &str,
        params: ProviderParams,
        context: ProviderContext,
    ) -> Result<Self> {
        let resource = registry.get(resource)?;
        Ok(Self::for_resource(registry, resource, params, context))
    }

    /// Create a provider for an already resolved resource
    #[must_use]
    pub fn for_resource(
        registry: Arc<ResourceRegistry>,
        resource: Arc<Resource>,
        params: ProviderParams,
        context: ProviderContext,
    ) -> Self {
        Self {
            registry,
            resource,
            params,
            context,
        }
    }

    /// Restrict this provider to the entity whose id field equals `id`
    ///
    /// Replaces any bare equality filter on the id field. Fails when the
    /// storage has no column for the id field, since the filter would
    /// otherwise be skipped and match every row.
    pub fn filter_id(&mut self, id: &str) -> Result<()> {
        let field = self.resource.id_field_name().to_string();
        self.column(&field)?;
        self.params.filters.set_equals(field, Value::String(id.to_string()));
        Ok(())
    }

    /// Resource this provider serves
    #[must_use]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Parameters this provider was constructed with
    #[must_use]
    pub fn params(&self) -> &ProviderParams {
        &self.params
    }

    /// Context this provider was constructed with
    #[must_use]
    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// Fetch exactly one page of rows, without includes
    pub async fn get_data(&self) -> Result<Vec<Row>> {
        let projection = self.projection()?;
        self.resource.source().fetch(&projection).await
    }

    /// Count rows matching the filters, ignoring page bounds
    pub async fn get_total_count(&self) -> Result<u64> {
        let projection = self.projection()?;
        self.resource.source().count(&projection).await
    }

    /// Fetch a page and resolve its includes
    pub fn get_many(&self) -> BoxFuture<'_, Result<Page>> {
        async move {
            let (mut data, total_count) =
                futures::try_join!(self.get_data(), self.get_total_count())?;

            tracing::debug!(
                resource = self.resource.name(),
                rows = data.len(),
                total_count,
                "fetched page"
            );

            self.resolve_includes(&mut data).await?;

            Ok(Page {
                meta: PageMeta {
                    count: data.len() as u64,
                    total_count,
                    offset: self.params.page.offset,
                },
                data,
            })
        }
        .boxed()
    }

    /// Fetch the first row and resolve its includes
    ///
    /// Returns `None` when no row matches; deciding whether that is an error
    /// is left to the caller.
    pub async fn get_one(&self) -> Result<Option<Row>> {
        let mut data = self.get_data().await?;
        data.truncate(1);
        self.resolve_includes(&mut data).await?;
        Ok(data.into_iter().next())
    }

    /// Insert a row, stamping the scoped fields with their context values
    pub async fn create(&self, mut row: Row) -> Result<Row> {
        for scope in self.resource.scopes() {
            let value = self.scope_value(scope.key)?;
            row.insert(scope.field.clone(), value.clone());
        }

        let values = self.columns(row)?;
        let created = self
            .resource
            .source()
            .insert(self.resource.id_field_name(), values)
            .await?;

        tracing::debug!(resource = self.resource.name(), "created row");
        Ok(created)
    }

    /// Overwrite `changes` on the first row matching the filters
    ///
    /// Returns `None` when no row matches.
    pub async fn update(&self, changes: Row) -> Result<Option<Row>> {
        let predicates = self.write_predicates()?;
        let values = self.columns(changes)?;
        let updated = self.resource.source().update(&predicates, values).await?;

        tracing::debug!(
            resource = self.resource.name(),
            rows = updated.len(),
            "updated rows"
        );
        Ok(updated.into_iter().next())
    }

    /// Delete the rows matching the filters, returning whether any existed
    pub async fn delete(&self) -> Result<bool> {
        let predicates = self.write_predicates()?;
        let deleted = self.resource.source().delete(&predicates).await?;

        tracing::debug!(resource = self.resource.name(), rows = deleted, "deleted rows");
        Ok(deleted > 0)
    }

    /// Predicates of a write, refusing one that would touch every row
    fn write_predicates(&self) -> Result<Vec<Predicate>> {
        let predicates = self.projection()?.predicates;
        if predicates.is_empty() {
            return Err(Error::Internal(format!(
                "refusing an unfiltered write to '{}'",
                self.resource.name()
            )));
        }
        Ok(predicates)
    }

    /// Storage column backing `field`
    fn column(&self, field: &str) -> Result<ColumnRef> {
        self.resource
            .source()
            .resolver()
            .resolve(field)
            .ok_or_else(|| {
                ConfigurationError::UnknownColumn {
                    resource: self.resource.name().to_string(),
                    column: field.to_string(),
                }
                .into()
            })
    }

    /// Pair every value of a row with its storage column
    fn columns(&self, row: Row) -> Result<Vec<(ColumnRef, Value)>> {
        row.into_iter()
            .map(|(field, value)| self.column(&field).map(|column| (column, value)))
            .collect()
    }

    fn scope_value(&self, key: ContextKey) -> Result<&Value> {
        self.context.get(key).ok_or_else(|| {
            ConfigurationError::MissingContext {
                resource: self.resource.name().to_string(),
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Build the projection of this provider's parameters onto its storage
    fn projection(&self) -> Result<Projection> {
        let filters = self.effective_filters()?;
        let comparisons: Vec<ComparisonFilter> = filters.resolve().map_err(|e| {
            let detail = e.to_string();
            Error::Validation(vec![ApiError::invalid_filter_operator(detail)])
        })?;

        Ok(Projection::build(
            self.resource.source().resolver(),
            self.resource.name(),
            &self.params.fields,
            &comparisons,
            &self.params.sort,
            self.params.page,
        )?)
    }

    /// Requested filters plus the filters scoping this resource to the context
    fn effective_filters(&self) -> Result<Filters> {
        let mut filters = self.params.filters.clone();

        for scope in self.resource.scopes() {
            let value = self.scope_value(scope.key)?;
            filters.set_equals(scope.field.clone(), value.clone());
        }

        Ok(filters)
    }

    /// Resolve every requested include into the matching rows
    async fn resolve_includes(&self, rows: &mut [Row]) -> Result<()> {
        if self.params.include.is_empty() || rows.is_empty() {
            return Ok(());
        }

        let resolved = {
            let rows = &*rows;
            try_join_all(self.params.include.iter().map(|(name, params)| async move {
                let pages = self.resolve_include(name, params, rows).await?;
                Ok::<_, Error>((name, pages))
            }))
            .await?
        };

        for (name, pages) in resolved {
            for (row, page) in rows.iter_mut().zip(pages) {
                row.insert(name.clone(), Value::from(page));
            }
        }

        Ok(())
    }

    /// Fetch one include for every row, preserving row order
    async fn resolve_include(
        &self,
        name: &str,
        params: &ProviderParams,
        rows: &[Row],
    ) -> Result<Vec<Page>> {
        let settings = self.resource.include_settings(name).ok_or_else(|| {
            ConfigurationError::UnknownInclude {
                resource: self.resource.name().to_string(),
                include: name.to_string(),
            }
        })?;

        if settings.relations.is_empty() {
            return Err(ConfigurationError::MissingRelations {
                resource: self.resource.name().to_string(),
                include: name.to_string(),
                target: settings.resource.clone(),
            }
            .into());
        }

        let target = self.registry.get(&settings.resource)?;
        let context = self.child_context(settings)?;

        tracing::debug!(
            resource = self.resource.name(),
            include = name,
            target = target.name(),
            rows = rows.len(),
            "resolving include"
        );

        let children: Vec<DataProvider> = rows
            .iter()
            .map(|row| DataProvider {
                registry: Arc::clone(&self.registry),
                resource: Arc::clone(&target),
                params: ProviderParams {
                    fields: Vec::new(),
                    filters: relation_filters(settings, params, row),
                    page: params.page,
                    sort: params.sort.clone(),
                    include: params.include.clone(),
                },
                context: context.clone(),
            })
            .collect();

        try_join_all(children.iter().map(DataProvider::get_many)).await
    }

    /// Context forwarded to the providers of an include
    fn child_context(&self, settings: &IncludeSettings) -> Result<ProviderContext> {
        let mut context = ProviderContext::new();

        for init_param in &settings.init_params {
            let value = self.context.get(init_param.attribute).ok_or_else(|| {
                ConfigurationError::MissingInitParam {
                    resource: self.resource.name().to_string(),
                    key: init_param.attribute.to_string(),
                    param: init_param.param.to_string(),
                }
            })?;
            context.insert(init_param.param, value.clone());
        }

        Ok(context)
    }
}

/// Filters correlating an include's rows with one parent row
fn relation_filters(settings: &IncludeSettings, params: &ProviderParams, row: &Row) -> Filters {
    let mut filters = params.filters.clone();

    for relation in &settings.relations {
        let value = match row.get(&relation.root_field) {
            Some(value) if !value.is_null() => value.clone(),
            _ => Value::String(relation.root_field.clone()),
        };
        filters.set_equals(relation.included_field.clone(), value);
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterValue;
    use crate::resource::{InitParam, Relation};
    use serde_json::json;

    const TENANT: ContextKey = ContextKey::new("tenant_id");

    fn registry() -> Arc<ResourceRegistry> {
        let articles = MemoryTable::from_values([
            json!({"id": 1, "author_id": 10, "title": "First", "tenant_id": 1}),
            json!({"id": 2, "author_id": 20, "title": "Second", "tenant_id": 1}),
            json!({"id": 3, "author_id": 10, "title": "Third", "tenant_id": 1}),
            json!({"id": 4, "author_id": 10, "title": "Other tenant", "tenant_id": 2}),
        ]);
        let people = MemoryTable::from_values([
            json!({"id": 10, "name": "Ada", "team_id": 100}),
            json!({"id": 20, "name": "Grace", "team_id": 200}),
            json!({"id": 30, "name": "author_id"}),
        ]);
        let teams = MemoryTable::from_values([
            json!({"id": 100, "name": "Engines"}),
            json!({"id": 200, "name": "Compilers"}),
        ]);

        Arc::new(
            ResourceRegistry::new()
                .register(
                    Resource::new("articles", DataSource::Memory(articles))
                        .fields(["id", "author_id", "title"])
                        .include(
                            "author",
                            IncludeSettings::new("people")
                                .relation(Relation::new("id", "author_id")),
                        ),
                )
                .register(
                    Resource::new("people", DataSource::Memory(people))
                        .fields(["id", "name", "team_id"])
                        .include(
                            "team",
                            IncludeSettings::new("teams").relation(Relation::new("id", "team_id")),
                        ),
                )
                .register(Resource::new("teams", DataSource::Memory(teams))),
        )
    }

    fn include(name: &str, params: ProviderParams) -> BTreeMap<String, ProviderParams> {
        BTreeMap::from([(name.to_string(), params)])
    }

    fn provider(registry: Arc<ResourceRegistry>, params: ProviderParams) -> DataProvider {
        DataProvider::new(registry, "articles", params, ProviderContext::new()).unwrap()
    }

    #[tokio::test]
    async fn test_get_many_merges_include_into_each_row() {
        let mut params = ProviderParams {
            include: include("author", ProviderParams::default()),
            ..Default::default()
        };
        params.filters.insert("tenant_id", "1");

        let page = provider(registry(), params).get_many().await.unwrap();

        assert_eq!(page.meta.count, 3);
        assert_eq!(page.meta.total_count, 3);
        for row in &page.data {
            let author = &row["author"];
            assert_eq!(author["meta"]["count"], 1);
            assert_eq!(author["data"][0]["id"], row["author_id"]);
        }
        assert_eq!(page.data[1]["author"]["data"][0]["name"], "Grace");
    }

    #[tokio::test]
    async fn test_nested_includes() {
        let params = ProviderParams {
            include: include(
                "author",
                ProviderParams {
                    include: include("team", ProviderParams::default()),
                    ..Default::default()
                },
            ),
            ..Default::default()
        };

        let page = provider(registry(), params).get_many().await.unwrap();
        let team = &page.data[1]["author"]["data"][0]["team"];
        assert_eq!(team["data"][0]["name"], "Compilers");
        assert_eq!(team["meta"], json!({"count": 1, "total_count": 1, "offset": 0}));
    }

    #[tokio::test]
    async fn test_include_fieldset_keeps_nested_relation_columns() {
        let params = ProviderParams {
            include: include(
                "author",
                ProviderParams {
                    fields: vec!["name".to_string()],
                    include: include("team", ProviderParams::default()),
                    ..Default::default()
                },
            ),
            ..Default::default()
        };

        let page = provider(registry(), params).get_many().await.unwrap();
        let author = &page.data[0]["author"]["data"][0];
        assert_eq!(author["name"], "Ada");
        assert_eq!(author["team"]["meta"]["count"], 1);
        assert_eq!(author["team"]["data"][0]["name"], "Engines");
    }

    #[tokio::test]
    async fn test_total_count_ignores_page() {
        let params = ProviderParams {
            page: PageParams::new(1, 1),
            ..Default::default()
        };
        let provider = provider(registry(), params);

        assert_eq!(provider.get_total_count().await.unwrap(), 4);
        let page = provider.get_many().await.unwrap();
        assert_eq!(page.meta, PageMeta { count: 1, total_count: 4, offset: 1 });
        assert_eq!(page.data[0]["id"], 2);
    }

    #[tokio::test]
    async fn test_missing_root_value_filters_by_field_name() {
        // Without author_id in the selected fields the relation value is
        // absent, and the child is filtered by the literal "author_id"
        let params = ProviderParams {
            fields: vec!["id".to_string()],
            include: include("author", ProviderParams::default()),
            page: PageParams::new(1, 0),
            ..Default::default()
        };

        let page = provider(registry(), params).get_many().await.unwrap();
        let author = &page.data[0]["author"]["data"];
        assert_eq!(author.as_array().unwrap().len(), 0);

        let filters = relation_filters(
            &IncludeSettings::new("people").relation(Relation::new("name", "author_id")),
            &ProviderParams::default(),
            &page.data[0],
        );
        assert_eq!(filters.get("name"), Some(&FilterValue::One(json!("author_id"))));
    }

    #[test]
    fn test_relation_filter_replaces_bare_user_filter() {
        let mut params = ProviderParams::default();
        params.filters.insert("id", "99");
        params.filters.insert("id__ne", "5");

        let row = json!({"author_id": 10}).as_object().cloned().unwrap();
        let filters = relation_filters(
            &IncludeSettings::new("people").relation(Relation::new("id", "author_id")),
            &params,
            &row,
        );

        assert_eq!(filters.get("id"), Some(&FilterValue::One(json!(10))));
        assert_eq!(filters.get("id__ne"), Some(&FilterValue::from("5")));
    }

    #[tokio::test]
    async fn test_get_one_returns_first_row_or_none() {
        let mut params = ProviderParams {
            include: include("author", ProviderParams::default()),
            ..Default::default()
        };
        params.filters.insert("id", "3");

        let row = provider(registry(), params).get_one().await.unwrap().unwrap();
        assert_eq!(row["title"], "Third");
        assert_eq!(row["author"]["data"][0]["name"], "Ada");

        let mut params = ProviderParams::default();
        params.filters.insert("id", "404");
        assert!(provider(registry(), params).get_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_include_without_relations_is_configuration_error() {
        let registry = Arc::new(
            ResourceRegistry::new()
                .register(
                    Resource::new("articles", DataSource::Memory(MemoryTable::from_values([json!({"id": 1})])))
                        .include("author", IncludeSettings::new("people")),
                )
                .register(Resource::new("people", DataSource::Memory(MemoryTable::default()))),
        );
        let params = ProviderParams {
            include: include("author", ProviderParams::default()),
            ..Default::default()
        };

        let err = provider(registry, params).get_many().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingRelations { ref target, .. }) if target == "people"
        ));
    }

    #[tokio::test]
    async fn test_init_params_forward_context() {
        let registry = Arc::new(
            ResourceRegistry::new()
                .register(
                    Resource::new(
                        "teams",
                        DataSource::Memory(MemoryTable::from_values([json!({"id": 1, "name": "t"})])),
                    )
                    .include(
                        "articles",
                        IncludeSettings::new("articles")
                            .relation(Relation::new("tenant_id", "id"))
                            .init_param(InitParam::new(TENANT, TENANT)),
                    ),
                )
                .register(
                    Resource::new(
                        "articles",
                        DataSource::Memory(MemoryTable::from_values([
                            json!({"id": 1, "tenant_id": 1}),
                            json!({"id": 2, "tenant_id": 1}),
                        ])),
                    )
                    .scope(TENANT, "tenant_id"),
                ),
        );
        let params = ProviderParams {
            include: include("articles", ProviderParams::default()),
            ..Default::default()
        };

        let context = ProviderContext::new().with(TENANT, json!(1));
        let provider = DataProvider::new(Arc::clone(&registry), "teams", params.clone(), context)
            .unwrap();
        let page = provider.get_many().await.unwrap();
        assert_eq!(page.data[0]["articles"]["meta"]["count"], 2);

        let provider =
            DataProvider::new(registry, "teams", params, ProviderContext::new()).unwrap();
        let err = provider.get_many().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::MissingInitParam { .. })
        ));
    }

    #[tokio::test]
    async fn test_scoped_resource_requires_context() {
        let registry = Arc::new(ResourceRegistry::new().register(
            Resource::new(
                "articles",
                DataSource::Memory(MemoryTable::from_values([
                    json!({"id": 1, "tenant_id": 1}),
                    json!({"id": 2, "tenant_id": 2}),
                ])),
            )
            .scope(TENANT, "tenant_id"),
        ));

        let scoped = DataProvider::new(
            Arc::clone(&registry),
            "articles",
            ProviderParams::default(),
            ProviderContext::new().with(TENANT, json!(2)),
        )
        .unwrap();
        let page = scoped.get_many().await.unwrap();
        assert_eq!(page.meta.total_count, 1);
        assert_eq!(page.data[0]["id"], 2);

        let unscoped =
            DataProvider::new(registry, "articles", ProviderParams::default(), ProviderContext::new())
                .unwrap();
        assert!(matches!(
            unscoped.get_data().await,
            Err(Error::Configuration(ConfigurationError::MissingContext { .. }))
        ));
    }

    #[tokio::test]
    async fn test_filter_id_requires_a_backing_column() {
        let registry = Arc::new(ResourceRegistry::new().register(
            Resource::new(
                "keyed",
                DataSource::Memory(MemoryTable::from_values([json!({"id": 1, "name": "only"})])),
            )
            .id_field("uuid"),
        ));

        let mut provider =
            DataProvider::new(registry, "keyed", ProviderParams::default(), ProviderContext::new())
                .unwrap();
        assert!(matches!(
            provider.filter_id("does-not-exist"),
            Err(Error::Configuration(ConfigurationError::UnknownColumn { ref column, .. })) if column == "uuid"
        ));

        let mut provider = provider_for_articles();
        provider.filter_id("2").unwrap();
        assert_eq!(provider.get_one().await.unwrap().unwrap()["title"], "Second");
    }

    fn provider_for_articles() -> DataProvider {
        provider(registry(), ProviderParams::default())
    }

    #[tokio::test]
    async fn test_writes_stay_inside_the_context_scope() {
        let registry = Arc::new(ResourceRegistry::new().register(
            Resource::new(
                "articles",
                DataSource::Memory(MemoryTable::from_values([
                    json!({"id": 1, "tenant_id": 1, "title": "mine"}),
                    json!({"id": 2, "tenant_id": 2, "title": "theirs"}),
                ])),
            )
            .scope(TENANT, "tenant_id"),
        ));
        let scoped = |id: Option<&str>| {
            let mut provider = DataProvider::new(
                Arc::clone(&registry),
                "articles",
                ProviderParams::default(),
                ProviderContext::new().with(TENANT, json!(1)),
            )
            .unwrap();
            if let Some(id) = id {
                provider.filter_id(id).unwrap();
            }
            provider
        };

        let created = scoped(None)
            .create(json!({"title": "new"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(created["id"], 3);
        assert_eq!(created["tenant_id"], 1);

        let changes = json!({"title": "changed"}).as_object().cloned().unwrap();
        assert!(scoped(Some("2")).update(changes.clone()).await.unwrap().is_none());
        let updated = scoped(Some("1")).update(changes).await.unwrap().unwrap();
        assert_eq!(updated["title"], "changed");

        assert!(!scoped(Some("2")).delete().await.unwrap());
        assert!(scoped(Some("3")).delete().await.unwrap());
        assert_eq!(scoped(None).get_total_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unfiltered_write_is_refused() {
        let provider = provider_for_articles();
        assert!(matches!(provider.delete().await, Err(Error::Internal(_))));
        assert_eq!(provider.get_total_count().await.unwrap(), 4);

        let unknown = json!({"missing": 1}).as_object().cloned().unwrap();
        assert!(matches!(
            provider.create(unknown).await,
            Err(Error::Configuration(ConfigurationError::UnknownColumn { .. }))
        ));
    }

    #[test]
    fn test_unknown_resource() {
        let err = DataProvider::new(
            registry(),
            "missing",
            ProviderParams::default(),
            ProviderContext::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownResource(ref name)) if name == "missing"
        ));
    }

    #[test]
    fn test_page_into_value() {
        let page = Page {
            data: vec![json!({"id": 1}).as_object().cloned().unwrap()],
            meta: PageMeta { count: 1, total_count: 5, offset: 2 },
        };
        assert_eq!(
            Value::from(page),
            json!({"data": [{"id": 1}], "meta": {"count": 1, "total_count": 5, "offset": 2}})
        );
    }
}
