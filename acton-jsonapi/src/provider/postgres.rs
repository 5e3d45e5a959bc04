//! PostgreSQL storage backend
//!
//! [`PgTable`] turns a [`Projection`] into SQL with `sqlx::QueryBuilder`. Rows
//! come back as JSON objects through `row_to_json`, so any table can be served
//! without a Rust struct per resource.
//!
//! Filter values arrive as text and are bound as text, then cast to the
//! column's declared type:
//!
//! ```text
//! SELECT row_to_json(t) FROM (
//!     SELECT "id", "lang" FROM "articles"
//!     WHERE "author_id" = ANY($1::text[]::int8[]) AND "lang" <> $2::text
//!     ORDER BY "created_at" DESC LIMIT $3 OFFSET $4
//! ) t
//! ```
//!
//! Writes bind values the same way and return the written rows:
//!
//! ```text
//! UPDATE "articles" AS t SET "title" = $1::text WHERE "id" = $2::int8 RETURNING row_to_json(t)
//! ```

use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{Result, StorageError, StorageOperation};
use crate::filter::{value_text, ComparisonOperator};
use crate::projection::{ColumnRef, FieldResolver, Predicate, Projection};
use crate::provider::Row;

/// Storage type assumed for columns declared without one
pub const DEFAULT_COLUMN_TYPE: &str = "text";

/// A PostgreSQL table or view
#[derive(Debug, Clone)]
pub struct PgTable {
    pool: PgPool,
    table: String,
    columns: BTreeMap<String, String>,
}

impl PgTable {
    /// Create a table handle with no declared columns
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Declare a column and its storage type (`int8`, `text`, `timestamptz`, ...)
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.columns.insert(name.into(), sql_type.into());
        self
    }

    /// Declare text columns
    #[must_use]
    pub fn text_columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.columns
                .insert(name.into(), DEFAULT_COLUMN_TYPE.to_string());
        }
        self
    }

    /// Table name
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fetch one page of matching rows
    pub async fn fetch(&self, projection: &Projection) -> Result<Vec<Row>> {
        let mut query = select_query(&self.table, projection);
        tracing::trace!(sql = query.sql(), "fetching rows");

        let rows: Vec<Json<Row>> = query
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::from(e).for_resource(&self.table))?;

        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    /// Count rows matching the predicates, ignoring page bounds
    pub async fn count(&self, projection: &Projection) -> Result<u64> {
        let mut query = count_query(&self.table, projection);
        tracing::trace!(sql = query.sql(), "counting rows");

        let count: i64 = query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let mut error = StorageError::from(e).for_resource(&self.table);
                error.operation = StorageOperation::Count;
                error
            })?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Insert one row and return it as stored
    pub async fn insert(&self, values: &[(ColumnRef, Value)]) -> Result<Row> {
        let mut query = insert_query(&self.table, values);
        tracing::trace!(sql = query.sql(), "inserting row");

        let Json(row): Json<Row> = query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.write_error(e, StorageOperation::Insert))?;
        Ok(row)
    }

    /// Update every row matching the predicates and return them
    pub async fn update(
        &self,
        predicates: &[Predicate],
        values: &[(ColumnRef, Value)],
    ) -> Result<Vec<Row>> {
        let mut query = update_query(&self.table, predicates, values);
        tracing::trace!(sql = query.sql(), "updating rows");

        let rows: Vec<Json<Row>> = query
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.write_error(e, StorageOperation::Update))?;
        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    /// Delete every row matching the predicates, returning how many were removed
    pub async fn delete(&self, predicates: &[Predicate]) -> Result<u64> {
        let mut query = delete_query(&self.table, predicates);
        tracing::trace!(sql = query.sql(), "deleting rows");

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| self.write_error(e, StorageOperation::Delete))?;
        Ok(result.rows_affected())
    }

    fn write_error(&self, e: sqlx::Error, operation: StorageOperation) -> StorageError {
        let mut error = StorageError::from(e).for_resource(&self.table);
        error.operation = operation;
        error
    }
}

impl FieldResolver for PgTable {
    fn resolve(&self, field: &str) -> Option<ColumnRef> {
        self.columns
            .get(field)
            .map(|sql_type| ColumnRef::typed(field, sql_type.clone()))
    }
}

/// Quote an identifier for PostgreSQL
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_type(column: &ColumnRef) -> &str {
    column.sql_type.as_deref().unwrap_or(DEFAULT_COLUMN_TYPE)
}

/// Build the page query for a projection
pub(crate) fn select_query<'args>(
    table: &str,
    projection: &Projection,
) -> QueryBuilder<'args, Postgres> {
    let mut query = QueryBuilder::new("SELECT row_to_json(t) FROM (SELECT ");

    if projection.columns.is_empty() {
        query.push("*");
    } else {
        let mut columns = query.separated(", ");
        for column in &projection.columns {
            columns.push(quote_ident(&column.name));
        }
    }

    query.push(" FROM ").push(quote_ident(table));
    push_where(&mut query, &projection.predicates);

    if !projection.order.is_empty() {
        query.push(" ORDER BY ");
        let mut order = query.separated(", ");
        for (column, direction) in &projection.order {
            order.push(format!(
                "{} {}",
                quote_ident(&column.name),
                direction.to_string().to_uppercase()
            ));
        }
    }

    query
        .push(" LIMIT ")
        .push_bind(i64::try_from(projection.page.limit).unwrap_or(i64::MAX))
        .push(" OFFSET ")
        .push_bind(i64::try_from(projection.page.offset).unwrap_or(i64::MAX))
        .push(") t");

    query
}

/// Build the count query for a projection
pub(crate) fn count_query<'args>(
    table: &str,
    projection: &Projection,
) -> QueryBuilder<'args, Postgres> {
    let mut query = QueryBuilder::new("SELECT COUNT(*) FROM ");
    query.push(quote_ident(table));
    push_where(&mut query, &projection.predicates);
    query
}

/// Build an insert returning the stored row
pub(crate) fn insert_query<'args>(
    table: &str,
    values: &[(ColumnRef, Value)],
) -> QueryBuilder<'args, Postgres> {
    let mut query = QueryBuilder::new("INSERT INTO ");
    query.push(quote_ident(table)).push(" AS t");

    if values.is_empty() {
        query.push(" DEFAULT VALUES");
    } else {
        query.push(" (");
        let mut columns = query.separated(", ");
        for (column, _) in values {
            columns.push(quote_ident(&column.name));
        }
        query.push(") VALUES (");
        for (index, (column, value)) in values.iter().enumerate() {
            if index > 0 {
                query.push(", ");
            }
            push_value(&mut query, column, value);
        }
        query.push(")");
    }

    query.push(" RETURNING row_to_json(t)");
    query
}

/// Build an update returning the updated rows
pub(crate) fn update_query<'args>(
    table: &str,
    predicates: &[Predicate],
    values: &[(ColumnRef, Value)],
) -> QueryBuilder<'args, Postgres> {
    let mut query = QueryBuilder::new("UPDATE ");
    query.push(quote_ident(table)).push(" AS t SET ");

    for (index, (column, value)) in values.iter().enumerate() {
        if index > 0 {
            query.push(", ");
        }
        query.push(format!("{} = ", quote_ident(&column.name)));
        push_value(&mut query, column, value);
    }

    push_where(&mut query, predicates);
    query.push(" RETURNING row_to_json(t)");
    query
}

/// Build a delete of the matching rows
pub(crate) fn delete_query<'args>(
    table: &str,
    predicates: &[Predicate],
) -> QueryBuilder<'args, Postgres> {
    let mut query = QueryBuilder::new("DELETE FROM ");
    query.push(quote_ident(table));
    push_where(&mut query, predicates);
    query
}

/// Bind a JSON value as text cast to the column type; null binds SQL NULL
fn push_value(query: &mut QueryBuilder<'_, Postgres>, column: &ColumnRef, value: &Value) {
    let text = (!value.is_null()).then(|| value_text(value));
    query
        .push_bind(text)
        .push(format!("::{}", column_type(column)));
}

fn push_where(query: &mut QueryBuilder<'_, Postgres>, predicates: &[Predicate]) {
    for (index, predicate) in predicates.iter().enumerate() {
        query.push(if index == 0 { " WHERE " } else { " AND " });
        push_predicate(query, predicate);
    }
}

fn push_predicate(query: &mut QueryBuilder<'_, Postgres>, predicate: &Predicate) {
    let column = quote_ident(&predicate.column.name);
    let sql_type = column_type(&predicate.column).to_string();
    let values: Vec<String> = predicate.value.values().iter().map(value_text).collect();

    match (predicate.operator, predicate.value.is_list()) {
        (ComparisonOperator::In, _) | (ComparisonOperator::Equals, true) => {
            query
                .push(format!("{column} = ANY("))
                .push_bind(values)
                .push(format!("::text[]::{sql_type}[])"));
        }
        (ComparisonOperator::NotEquals, true) => {
            query
                .push(format!("{column} <> ALL("))
                .push_bind(values)
                .push(format!("::text[]::{sql_type}[])"));
        }
        (operator, _) => {
            let value = values.into_iter().next().unwrap_or_default();
            let sql_operator = match operator {
                ComparisonOperator::NotEquals => "<>",
                ComparisonOperator::LessOrEqual => "<=",
                ComparisonOperator::GreaterOrEqual => ">=",
                ComparisonOperator::Equals | ComparisonOperator::In => "=",
            };
            query
                .push(format!("{column} {sql_operator} "))
                .push_bind(value)
                .push(format!("::{sql_type}"));
        }
    }
}
