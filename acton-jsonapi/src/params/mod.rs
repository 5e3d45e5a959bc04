//! Query parameter tree
//!
//! Parses the flat, multi-valued query string of a JSON:API style request into a
//! [`ParameterNode`] tree keyed by include path.
//!
//! The recognized parameter families are:
//!
//! - `include=a,b,a.c` - relation paths, dot-delimited for nesting
//! - `fields=f1,rel.f2`, `retrieve=...`, `sort=f1,-rel.f2` - list families
//! - `filter[path]=v1,v2`, `page[path.limit]=N` - dict families
//!
//! The `include` parameter is processed first, so the include skeleton exists
//! before any scoped parameter is attached. A scoped parameter addressing an
//! entity that was never included is dropped. Family names are matched
//! exactly: `FIELDS=...` is an unknown parameter.
//!
//! Include paths deeper than the configured maximum are rejected before any
//! of the tree is built.
//!
//! # Example
//!
//! ```rust
//! use acton_jsonapi::params::{ParamValue, ParameterNode};
//!
//! let node = ParameterNode::from_pairs([
//!     ("include", "author"),
//!     ("filter[author.lang]", "en,de"),
//!     ("sort", "-author.created_at"),
//! ])
//! .unwrap();
//!
//! let author = &node.include["author"];
//! assert_eq!(
//!     author.filter["lang"],
//!     ParamValue::List(vec!["en".to_string(), "de".to_string()])
//! );
//! assert_eq!(author.sort, vec!["-created_at".to_string()]);
//! ```

mod extract;

pub use extract::QueryParams;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::api_error::ApiError;

/// Name of the include parameter
pub const INCLUDE_PARAM: &str = "include";

/// Separator between values of a list parameter
pub const VALUE_LIST_DELIMITER: char = ',';

/// Separator between segments of an entity path
pub const ENTITY_PATH_DELIMITER: char = '.';

/// Characters that modify a field and travel with it (sort direction)
pub const FIELD_MODIFIERS: &[char] = &['-'];

/// Deepest include path accepted unless configured otherwise
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 8;

/// Matches a parameter key: the family name plus an optional bracketed path
static PARAM_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<family>fields|retrieve|sort|filter|page)(?:\[(?P<path>[^\]]+)\])?$")
        .expect("parameter key regex is valid")
});

/// A raw parameter value: a single string, or a list when the value held a comma
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A single value (`filter[x]=1`)
    Single(String),
    /// A comma-separated or repeated value (`filter[x]=1,2,3`)
    List(Vec<String>),
}

impl ParamValue {
    /// Build a value from its raw query-string form
    ///
    /// ```rust
    /// use acton_jsonapi::params::ParamValue;
    ///
    /// assert_eq!(ParamValue::parse("1"), ParamValue::Single("1".to_string()));
    /// assert_eq!(
    ///     ParamValue::parse("1,2"),
    ///     ParamValue::List(vec!["1".to_string(), "2".to_string()])
    /// );
    /// ```
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.contains(VALUE_LIST_DELIMITER) {
            Self::List(raw.split(VALUE_LIST_DELIMITER).map(str::to_string).collect())
        } else {
            Self::Single(raw.to_string())
        }
    }

    /// Whether the value is a list
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// The single value, if this is not a list
    #[must_use]
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Self::Single(value) => Some(value),
            Self::List(_) => None,
        }
    }

    /// Combine with a value given for the same key again
    fn merge(self, other: Self) -> Self {
        let mut values = self.into_values();
        values.extend(other.into_values());
        Self::List(values)
    }

    fn into_values(self) -> Vec<String> {
        match self {
            Self::Single(value) => vec![value],
            Self::List(values) => values,
        }
    }
}

/// Parsed query configuration of one resource
///
/// The root node describes the requested resource; `include` holds one node
/// per included relation, recursively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterNode {
    /// Sparse fieldset, in request order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,

    /// Alternative sparse fieldset family, kept apart from `fields`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retrieve: Vec<String>,

    /// Filters keyed by field name (comparison suffix included)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, ParamValue>,

    /// Paging values (`limit`, `offset`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub page: BTreeMap<String, ParamValue>,

    /// Sort fields, each optionally prefixed with `-`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<String>,

    /// Included relations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub include: BTreeMap<String, ParameterNode>,
}

/// Parameter families that accumulate values in a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListFamily {
    Fields,
    Retrieve,
    Sort,
}

/// Parameter families keyed by a bracketed field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DictFamily {
    Filter,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    List(ListFamily),
    Dict(DictFamily),
}

impl Family {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "fields" => Some(Self::List(ListFamily::Fields)),
            "retrieve" => Some(Self::List(ListFamily::Retrieve)),
            "sort" => Some(Self::List(ListFamily::Sort)),
            "filter" => Some(Self::Dict(DictFamily::Filter)),
            "page" => Some(Self::Dict(DictFamily::Page)),
            _ => None,
        }
    }
}

impl ParameterNode {
    /// Create an empty node
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a parameter tree from query-string key/value pairs
    ///
    /// Keys may repeat. Unknown keys are ignored. Include paths deeper than
    /// [`DEFAULT_MAX_INCLUDE_DEPTH`] are rejected.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::from_pairs_with_depth(pairs, DEFAULT_MAX_INCLUDE_DEPTH)
    }

    /// Build a parameter tree, rejecting include paths with more than
    /// `max_include_depth` segments
    ///
    /// ```rust
    /// use acton_jsonapi::params::ParameterNode;
    ///
    /// assert!(ParameterNode::from_pairs_with_depth([("include", "a.b")], 2).is_ok());
    /// assert!(ParameterNode::from_pairs_with_depth([("include", "a.b.c")], 2).is_err());
    /// ```
    pub fn from_pairs_with_depth<I, K, V>(
        pairs: I,
        max_include_depth: usize,
    ) -> Result<Self, ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut includes = Vec::new();
        let mut rest = Vec::new();

        for (key, value) in pairs {
            if key.as_ref() == INCLUDE_PARAM {
                includes.push(value);
            } else {
                rest.push((key, value));
            }
        }

        let paths: Vec<&str> = includes
            .iter()
            .flat_map(|value| value.as_ref().split(VALUE_LIST_DELIMITER))
            .collect();
        if let Some(path) = paths
            .iter()
            .find(|path| include_depth(path) > max_include_depth)
        {
            tracing::debug!(
                depth = include_depth(path),
                max_include_depth,
                "include path too deep"
            );
            let shown: String = path.chars().take(64).collect();
            return Err(ApiError::invalid_query_parameter(format!(
                "Requested include \"{shown}\" is nested too deeply. Maximum depth is {max_include_depth}"
            ))
            .with_parameter(INCLUDE_PARAM));
        }

        let mut root = Self::new();
        for path in paths {
            root.add_entity(path);
        }

        // Dict families collect repeated keys before they are attached
        let mut dict_params: Vec<(DictFamily, String, ParamValue)> = Vec::new();

        for (key, value) in rest {
            let key = key.as_ref();
            let Some(captures) = PARAM_KEY_REGEX.captures(key) else {
                tracing::trace!(param = key, "ignoring unknown query parameter");
                continue;
            };
            let Some(family) = Family::from_name(&captures["family"]) else {
                continue;
            };

            match family {
                Family::List(family) => {
                    for raw_path in value.as_ref().split(VALUE_LIST_DELIMITER) {
                        if raw_path.is_empty() {
                            continue;
                        }
                        let (entity_path, field) = split_entity_and_field(raw_path);
                        root.add_entity_field(entity_path.as_deref(), family, field);
                    }
                }
                Family::Dict(family) => {
                    let Some(path) = captures.name("path") else {
                        tracing::debug!(param = key, "dict parameter without a path, skipping");
                        continue;
                    };
                    let path = path.as_str().to_string();
                    let parsed = ParamValue::parse(value.as_ref());

                    match dict_params
                        .iter_mut()
                        .find(|(f, p, _)| *f == family && *p == path)
                    {
                        Some(entry) => {
                            let previous = std::mem::replace(&mut entry.2, ParamValue::List(vec![]));
                            entry.2 = previous.merge(parsed);
                        }
                        None => dict_params.push((family, path, parsed)),
                    }
                }
            }
        }

        for (family, path, value) in dict_params {
            let (entity_path, field) = split_entity_and_field(&path);
            root.add_param(entity_path.as_deref(), family, field, value);
        }

        Ok(root)
    }

    /// Paging limit, if given
    #[must_use]
    pub fn limit(&self) -> Option<&ParamValue> {
        self.page.get("limit")
    }

    /// Paging offset, if given
    #[must_use]
    pub fn offset(&self) -> Option<&ParamValue> {
        self.page.get("offset")
    }

    /// Whether the node carries no parameters at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.retrieve.is_empty()
            && self.filter.is_empty()
            && self.page.is_empty()
            && self.sort.is_empty()
            && self.include.is_empty()
    }

    /// Create the include skeleton for a dot-delimited path
    fn add_entity(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split(ENTITY_PATH_DELIMITER) {
            if segment.is_empty() {
                continue;
            }
            node = node.include.entry(segment.to_string()).or_default();
        }
    }

    /// Find the included node an entity path addresses
    ///
    /// Returns `None` when any segment was never included.
    fn find_entity_mut(&mut self, entity_path: Option<&str>) -> Option<&mut Self> {
        let Some(path) = entity_path else {
            return Some(self);
        };

        let mut node = self;
        for segment in path.split(ENTITY_PATH_DELIMITER) {
            node = node.include.get_mut(segment)?;
        }
        Some(node)
    }

    fn add_entity_field(&mut self, entity_path: Option<&str>, family: ListFamily, field: String) {
        let Some(node) = self.find_entity_mut(entity_path) else {
            tracing::debug!(
                entity = entity_path,
                field = %field,
                "entity is not included, dropping parameter"
            );
            return;
        };

        let target = match family {
            ListFamily::Fields => &mut node.fields,
            ListFamily::Retrieve => &mut node.retrieve,
            ListFamily::Sort => &mut node.sort,
        };
        target.push(field);
    }

    fn add_param(
        &mut self,
        entity_path: Option<&str>,
        family: DictFamily,
        field: String,
        value: ParamValue,
    ) {
        let Some(node) = self.find_entity_mut(entity_path) else {
            tracing::debug!(
                entity = entity_path,
                field = %field,
                "entity is not included, dropping parameter"
            );
            return;
        };

        let target = match family {
            DictFamily::Filter => &mut node.filter,
            DictFamily::Page => &mut node.page,
        };
        target.insert(field, value);
    }
}

/// Number of non-empty segments of an include path
fn include_depth(path: &str) -> usize {
    path.split(ENTITY_PATH_DELIMITER)
        .filter(|segment| !segment.is_empty())
        .count()
}

/// Split a parameter path into its entity path and field name
///
/// The entity path is everything before the last dot. A leading modifier is
/// moved from the entity path onto the field, so `-child.created_at` addresses
/// entity `child` and field `-created_at`.
///
/// ```rust
/// use acton_jsonapi::params::split_entity_and_field;
///
/// assert_eq!(split_entity_and_field("lang"), (None, "lang".to_string()));
/// assert_eq!(
///     split_entity_and_field("-child.created_at"),
///     (Some("child".to_string()), "-created_at".to_string())
/// );
/// ```
#[must_use]
pub fn split_entity_and_field(path: &str) -> (Option<String>, String) {
    let Some((entity_path, field)) = path.rsplit_once(ENTITY_PATH_DELIMITER) else {
        return (None, path.to_string());
    };

    match entity_path.chars().next() {
        Some(modifier) if FIELD_MODIFIERS.contains(&modifier) => {
            let stripped = &entity_path[modifier.len_utf8()..];
            (Some(stripped.to_string()), format!("{modifier}{field}"))
        }
        _ => (Some(entity_path.to_string()), field.to_string()),
    }
}
