//! In-memory storage backend
//!
//! [`MemoryTable`] holds its rows in a shared vector and evaluates a
//! [`Projection`] directly. Clones of a table share the same rows. Values coming from the query string are text, so equality is
//! decided on the text form of both sides; ordering compares numerically when
//! both sides parse as numbers and falls back to text otherwise. A null or
//! missing column satisfies no comparison, as in SQL.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::filter::{value_text, ComparisonOperator};
use crate::projection::{ColumnRef, FieldResolver, OrderDirection, Predicate, Projection};
use crate::provider::Row;

/// A table of rows held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    columns: BTreeSet<String>,
    rows: Arc<RwLock<Vec<Row>>>,
}

impl MemoryTable {
    /// Create a table whose columns are every key appearing in `rows`
    pub fn new(rows: Vec<Row>) -> Self {
        let columns = rows.iter().flat_map(|row| row.keys().cloned()).collect();
        Self {
            columns,
            rows: Arc::new(RwLock::new(rows)),
        }
    }

    /// Build a table from JSON objects, ignoring any value that is not one
    ///
    /// ```rust
    /// use acton_jsonapi::provider::MemoryTable;
    /// use serde_json::json;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let table = MemoryTable::from_values([
    ///     json!({"id": 1, "name": "first"}),
    ///     json!({"id": 2, "name": "second"}),
    ///     json!("not a row"),
    /// ]);
    /// assert_eq!(table.len().await, 2);
    /// # }
    /// ```
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let rows = values
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect();
        Self::new(rows)
    }

    /// Declare additional columns that may be missing from every row
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Number of rows held
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the table holds no rows
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Fetch one page of matching rows
    pub async fn fetch(&self, projection: &Projection) -> Vec<Row> {
        let rows = self.rows.read().await;
        let mut matching: Vec<&Row> = rows
            .iter()
            .filter(|row| matches_all(row, &projection.predicates))
            .collect();

        if !projection.order.is_empty() {
            matching.sort_by(|a, b| compare_rows(a, b, &projection.order));
        }

        matching
            .into_iter()
            .skip(usize::try_from(projection.page.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(projection.page.limit).unwrap_or(usize::MAX))
            .map(|row| select(row, &projection.columns))
            .collect()
    }

    /// Count rows matching the predicates, ignoring page bounds
    pub async fn count(&self, projection: &Projection) -> u64 {
        self.rows
            .read()
            .await
            .iter()
            .filter(|row| matches_all(row, &projection.predicates))
            .count() as u64
    }

    /// Append a row
    ///
    /// A row without a value for `id_field` is given the next integer id.
    pub async fn insert(&self, id_field: &str, mut row: Row) -> Row {
        let mut rows = self.rows.write().await;

        if matches!(row.get(id_field), None | Some(Value::Null)) {
            let next = rows
                .iter()
                .filter_map(|existing| existing.get(id_field).and_then(Value::as_i64))
                .max()
                .unwrap_or(0)
                + 1;
            row.insert(id_field.to_string(), Value::from(next));
        }

        rows.push(row.clone());
        row
    }

    /// Overwrite `changes` on every row matching the predicates
    ///
    /// Returns the rows as they are after the update.
    pub async fn update(&self, predicates: &[Predicate], changes: &Row) -> Vec<Row> {
        let mut rows = self.rows.write().await;
        let mut updated = Vec::new();

        for row in rows.iter_mut() {
            if matches_all(row, predicates) {
                for (field, value) in changes {
                    row.insert(field.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }

        updated
    }

    /// Remove every row matching the predicates, returning how many were removed
    pub async fn delete(&self, predicates: &[Predicate]) -> u64 {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| !matches_all(row, predicates));
        (before - rows.len()) as u64
    }
}

impl FieldResolver for MemoryTable {
    fn resolve(&self, field: &str) -> Option<ColumnRef> {
        self.columns
            .contains(field)
            .then(|| ColumnRef::new(field))
    }
}

fn matches_all(row: &Row, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|predicate| matches(row, predicate))
}

fn matches(row: &Row, predicate: &Predicate) -> bool {
    let actual = row.get(&predicate.column.name).unwrap_or(&Value::Null);
    if actual.is_null() {
        return false;
    }
    let values = predicate.value.values();

    match predicate.operator {
        ComparisonOperator::Equals | ComparisonOperator::In => {
            values.iter().any(|expected| text_eq(actual, expected))
        }
        ComparisonOperator::NotEquals => !values.iter().any(|expected| text_eq(actual, expected)),
        ComparisonOperator::LessOrEqual => values
            .first()
            .is_some_and(|expected| compare_values(actual, expected).is_le()),
        ComparisonOperator::GreaterOrEqual => values
            .first()
            .is_some_and(|expected| compare_values(actual, expected).is_ge()),
    }
}

fn text_eq(a: &Value, b: &Value) -> bool {
    value_text(a) == value_text(b)
}

/// Order two values, nulls first, numbers numerically, everything else as text
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => {
            let (a, b) = (value_text(a), value_text(b));
            match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.cmp(&b),
            }
        }
    }
}

fn compare_rows(a: &Row, b: &Row, order: &[(ColumnRef, OrderDirection)]) -> Ordering {
    order
        .iter()
        .map(|(column, direction)| {
            let left = a.get(&column.name).unwrap_or(&Value::Null);
            let right = b.get(&column.name).unwrap_or(&Value::Null);
            let ordering = compare_values(left, right);
            match direction {
                OrderDirection::Ascending => ordering,
                OrderDirection::Descending => ordering.reverse(),
            }
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn select(row: &Row, columns: &[ColumnRef]) -> Row {
    if columns.is_empty() {
        return row.clone();
    }

    columns
        .iter()
        .map(|column| {
            let value = row.get(&column.name).cloned().unwrap_or(Value::Null);
            (column.name.clone(), value)
        })
        .collect()
}
