//! Field, filter and sort projection onto storage columns
//!
//! Validated field names are mapped to [`ColumnRef`]s through a
//! [`FieldResolver`] supplied by the storage backend. The result is a
//! [`Projection`]: the columns to select, the predicates to apply, the order
//! to sort by and the page bounds.
//!
//! # Example
//!
//! ```rust
//! use acton_jsonapi::projection::{OrderDirection, SortField};
//!
//! let sort = SortField::parse("-created_at");
//! assert_eq!(sort.field, "created_at");
//! assert_eq!(sort.direction, OrderDirection::Descending);
//! assert_eq!(format!("{}", sort.direction), "desc");
//! ```

use std::fmt;

use crate::error::ConfigurationError;
use crate::filter::{ComparisonFilter, ComparisonOperator, FilterValue};
use crate::params::FIELD_MODIFIERS;
use crate::provider::PageParams;

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Sort in ascending order (A-Z, 0-9)
    #[default]
    Ascending,
    /// Sort in descending order (Z-A, 9-0)
    Descending,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// A sort field with its direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    /// Field name with the direction marker stripped
    pub field: String,
    /// Sort direction
    pub direction: OrderDirection,
}

impl SortField {
    /// Parse a sort field, a leading `-` meaning descending
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(FIELD_MODIFIERS) {
            Some(field) => Self {
                field: field.to_string(),
                direction: OrderDirection::Descending,
            },
            None => Self {
                field: raw.to_string(),
                direction: OrderDirection::Ascending,
            },
        }
    }
}

/// A storage column a field maps onto
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Column name
    pub name: String,
    /// Storage type used to cast bound text values, if the backend needs one
    pub sql_type: Option<String>,
}

impl ColumnRef {
    /// Untyped column
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: None,
        }
    }

    /// Column with a storage type
    pub fn typed(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: Some(sql_type.into()),
        }
    }
}

/// Maps field names onto storage columns
pub trait FieldResolver {
    /// Column backing `field`, or `None` if the storage has no such column
    fn resolve(&self, field: &str) -> Option<ColumnRef>;
}

/// A comparison bound to a column
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Column compared
    pub column: ColumnRef,
    /// Comparison to apply
    pub operator: ComparisonOperator,
    /// Value to compare against
    pub value: FilterValue,
}

/// Everything a backend needs to run one page query
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Columns to select, in request order; empty selects every column
    pub columns: Vec<ColumnRef>,
    /// Conditions every returned row satisfies
    pub predicates: Vec<Predicate>,
    /// Sort order, most significant first
    pub order: Vec<(ColumnRef, OrderDirection)>,
    /// Page bounds
    pub page: PageParams,
}

impl Projection {
    /// Project validated names onto the backend's columns
    ///
    /// Filters on fields the storage does not know are skipped. Unknown
    /// selected or sort fields are a configuration error, since validation
    /// already restricted them to the resource's declared fields.
    pub fn build(
        resolver: &dyn FieldResolver,
        resource: &str,
        fields: &[String],
        filters: &[ComparisonFilter],
        sort: &[String],
        page: PageParams,
    ) -> Result<Self, ConfigurationError> {
        let unknown = |column: &str| ConfigurationError::UnknownColumn {
            resource: resource.to_string(),
            column: column.to_string(),
        };

        let columns = fields
            .iter()
            .map(|field| resolver.resolve(field).ok_or_else(|| unknown(field)))
            .collect::<Result<Vec<_>, _>>()?;

        let predicates = filters
            .iter()
            .filter_map(|filter| match resolver.resolve(&filter.field) {
                Some(column) => Some(Predicate {
                    column,
                    operator: filter.operator,
                    value: filter.value.clone(),
                }),
                None => {
                    tracing::debug!(
                        resource,
                        field = %filter.field,
                        "no column for filter, skipping"
                    );
                    None
                }
            })
            .collect();

        let order = sort
            .iter()
            .map(|raw| {
                let sort = SortField::parse(raw);
                resolver
                    .resolve(&sort.field)
                    .map(|column| (column, sort.direction))
                    .ok_or_else(|| unknown(&sort.field))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            columns,
            predicates,
            order,
            page,
        })
    }
}
