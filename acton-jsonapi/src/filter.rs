//! Comparison filters
//!
//! A filter key may carry a comparison suffix (`__lte`, `__gte`, `__ne`).
//! Without one, the operator is inferred from the value's shape: a list means
//! membership, anything else means equality. The string grammar is parsed into
//! a [`ComparisonOperator`] as soon as a filter is resolved.
//!
//! # Example
//!
//! ```rust
//! use acton_jsonapi::filter::{ComparisonFilter, ComparisonOperator, FilterValue};
//!
//! let filter = ComparisonFilter::resolve("age__gte", FilterValue::from("18")).unwrap();
//! assert_eq!(filter.field, "age");
//! assert_eq!(filter.operator, ComparisonOperator::GreaterOrEqual);
//!
//! let filter = ComparisonFilter::resolve("id", FilterValue::from(vec!["1", "2"])).unwrap();
//! assert_eq!(filter.operator, ComparisonOperator::In);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::params::ParamValue;

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    /// `field = value`
    Equals,
    /// `field != value`, or not any of the values for a list
    NotEquals,
    /// `field <= value`
    LessOrEqual,
    /// `field >= value`
    GreaterOrEqual,
    /// `field IN (values)`
    In,
}

impl ComparisonOperator {
    /// Operators selected by an explicit key suffix
    const SUFFIXED: [(&'static str, Self); 3] = [
        ("__lte", Self::LessOrEqual),
        ("__gte", Self::GreaterOrEqual),
        ("__ne", Self::NotEquals),
    ];

    /// Split a filter key into its bare field name and explicit operator
    ///
    /// ```rust
    /// use acton_jsonapi::filter::ComparisonOperator;
    ///
    /// assert_eq!(
    ///     ComparisonOperator::split_key("price__lte"),
    ///     ("price", Some(ComparisonOperator::LessOrEqual))
    /// );
    /// assert_eq!(ComparisonOperator::split_key("price"), ("price", None));
    /// ```
    #[must_use]
    pub fn split_key(key: &str) -> (&str, Option<Self>) {
        Self::SUFFIXED
            .iter()
            .find_map(|(suffix, operator)| {
                key.strip_suffix(*suffix)
                    .map(|field| (field, Some(*operator)))
            })
            .unwrap_or((key, None))
    }

    /// Whether the operator orders values rather than matching them
    #[must_use]
    pub const fn is_ordering(&self) -> bool {
        matches!(self, Self::LessOrEqual | Self::GreaterOrEqual)
    }

    /// The key suffix selecting this operator, if any
    #[must_use]
    pub fn suffix(&self) -> Option<&'static str> {
        Self::SUFFIXED
            .iter()
            .find(|(_, operator)| operator == self)
            .map(|(suffix, _)| *suffix)
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals => write!(f, "="),
            Self::NotEquals => write!(f, "!="),
            Self::LessOrEqual => write!(f, "<="),
            Self::GreaterOrEqual => write!(f, ">="),
            Self::In => write!(f, "IN"),
        }
    }
}

/// Value a filter compares against
///
/// Values from the query string are strings; values copied from a parent row
/// while resolving an include keep their JSON type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// A single value
    One(Value),
    /// A list of values
    Many(Vec<Value>),
}

impl FilterValue {
    /// Whether the value is a list
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, Self::Many(_))
    }

    /// All values, a single value yielding a one-element slice
    #[must_use]
    pub fn values(&self) -> &[Value] {
        match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        }
    }
}

impl From<&ParamValue> for FilterValue {
    fn from(value: &ParamValue) -> Self {
        match value {
            ParamValue::Single(value) => Self::One(Value::String(value.clone())),
            ParamValue::List(values) => {
                Self::Many(values.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        Self::One(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::One(Value::String(value.to_string()))
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::One(Value::String(value))
    }
}

impl From<Vec<&str>> for FilterValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Many(values.into_iter().map(|v| Value::String(v.to_string())).collect())
    }
}

/// Text form of a JSON value, used to compare query strings with typed values
///
/// ```rust
/// use acton_jsonapi::filter::value_text;
/// use serde_json::json;
///
/// assert_eq!(value_text(&json!("en")), "en");
/// assert_eq!(value_text(&json!(42)), "42");
/// assert_eq!(value_text(&json!(true)), "true");
/// ```
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// A comparison operator misapplied to its value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// An ordering comparison was given a list
    #[error("Requested filter[{key}] comparison operation not applied to list.")]
    ListComparison {
        /// Full filter key, suffix included
        key: String,
    },
}

/// A resolved filter: bare field, operator and value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonFilter {
    /// Field name with any comparison suffix removed
    pub field: String,
    /// Comparison to apply
    pub operator: ComparisonOperator,
    /// Value to compare against
    pub value: FilterValue,
}

impl ComparisonFilter {
    /// Resolve a filter key and value into a comparison
    ///
    /// An explicit suffix always wins over inference. Ordering comparisons
    /// reject list values.
    pub fn resolve(key: &str, value: FilterValue) -> Result<Self, FilterError> {
        let (field, explicit) = ComparisonOperator::split_key(key);

        let operator = match explicit {
            Some(operator) if operator.is_ordering() && value.is_list() => {
                return Err(FilterError::ListComparison {
                    key: key.to_string(),
                });
            }
            Some(operator) => operator,
            None if value.is_list() => ComparisonOperator::In,
            None => ComparisonOperator::Equals,
        };

        Ok(Self {
            field: field.to_string(),
            operator,
            value,
        })
    }
}

/// Filters keyed by their raw key (comparison suffix included)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, FilterValue>);

impl Filters {
    /// Create an empty filter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a filter under its raw key, replacing any previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set an equality filter on a bare field
    ///
    /// Replaces a filter already set under the same bare key; suffixed
    /// filters on the same field are kept.
    pub fn set_equals(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), FilterValue::One(value));
    }

    /// Value set under a raw key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.0.get(key)
    }

    /// Number of filters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no filters are set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over raw keys and values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Resolve every filter into a comparison
    pub fn resolve(&self) -> Result<Vec<ComparisonFilter>, FilterError> {
        self.0
            .iter()
            .map(|(key, value)| ComparisonFilter::resolve(key, value.clone()))
            .collect()
    }
}

impl FromIterator<(String, FilterValue)> for Filters {
    fn from_iter<I: IntoIterator<Item = (String, FilterValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
