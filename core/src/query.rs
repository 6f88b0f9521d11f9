//! Per-request query state and its compilation into OData query
//! parameters and a JSON body.
//!
//! # Design
//! `QueryState` is a mutable builder. Every declared field has a default
//! given by `QueryState::default()`; `reset_only` and `reset_exclude` copy
//! fields back from a fresh default value, so a reset never restores an
//! earlier caller value. Fields are named through `QueryField` rather than
//! strings; the `*_named` variants accept strings at the boundary and
//! ignore names they do not know.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ODataError;

static GUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}(?:-[0-9a-fA-F]{4}){3}-[0-9a-fA-F]{12}").expect("GUID pattern is valid")
});

fn is_blank(value: &str) -> bool {
    value.is_empty() || value == "0"
}

/// Amount of metadata the server attaches to each JSON record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataLevel {
    Minimal,
    None,
    Full,
}

impl MetadataLevel {
    pub const ALL: [MetadataLevel; 3] = [MetadataLevel::Minimal, MetadataLevel::None, MetadataLevel::Full];

    /// Constant name accepted by `from_str`.
    pub fn name(&self) -> &'static str {
        match self {
            MetadataLevel::Minimal => "MINIMAL",
            MetadataLevel::None => "NO",
            MetadataLevel::Full => "FULL",
        }
    }

    /// Value sent as `$format`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataLevel::Minimal => "application/json;odata=minimalmetadata",
            MetadataLevel::None => "application/json;odata=nometadata",
            MetadataLevel::Full => "application/json;odata=fullmetadata",
        }
    }
}

impl FromStr for MetadataLevel {
    type Err = ODataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.name() == s || level.as_str() == s)
            .ok_or_else(|| {
                invalid_choice(
                    s,
                    Self::ALL.iter().map(|l| l.as_str()),
                    Self::ALL.iter().map(|l| l.name()),
                )
            })
    }
}

/// `$inlinecount` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineCount {
    None,
    AllPages,
}

impl InlineCount {
    pub const ALL: [InlineCount; 2] = [InlineCount::None, InlineCount::AllPages];

    pub fn name(&self) -> &'static str {
        match self {
            InlineCount::None => "NONE",
            InlineCount::AllPages => "ALLPAGES",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InlineCount::None => "none",
            InlineCount::AllPages => "allpages",
        }
    }
}

impl FromStr for InlineCount {
    type Err = ODataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name() == s || mode.as_str() == s)
            .ok_or_else(|| {
                invalid_choice(
                    s,
                    Self::ALL.iter().map(|m| m.as_str()),
                    Self::ALL.iter().map(|m| m.name()),
                )
            })
    }
}

fn invalid_choice<'a>(
    value: &str,
    values: impl Iterator<Item = &'a str>,
    names: impl Iterator<Item = &'a str>,
) -> ODataError {
    ODataError::InvalidParameter(format!(
        "invalid value '{value}'; expected one of: {} or one of the constants: {}",
        values.collect::<Vec<_>>().join(", "),
        names.collect::<Vec<_>>().join(", "),
    ))
}

/// Value for `$select`, `$expand` and `$orderby`: either a preformatted
/// string or a list joined with `,`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldList {
    Text(String),
    List(Vec<String>),
}

impl FieldList {
    fn compile(self) -> String {
        match self {
            FieldList::Text(s) => s.trim().to_string(),
            FieldList::List(items) => items.join(","),
        }
    }
}

impl From<&str> for FieldList {
    fn from(s: &str) -> Self {
        FieldList::Text(s.to_string())
    }
}

impl From<String> for FieldList {
    fn from(s: String) -> Self {
        FieldList::Text(s)
    }
}

impl From<Vec<String>> for FieldList {
    fn from(items: Vec<String>) -> Self {
        FieldList::List(items)
    }
}

impl From<Vec<&str>> for FieldList {
    fn from(items: Vec<&str>) -> Self {
        FieldList::List(items.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for FieldList {
    fn from(items: &[&str]) -> Self {
        FieldList::List(items.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FieldList {
    fn from(items: [&str; N]) -> Self {
        FieldList::List(items.iter().map(|s| s.to_string()).collect())
    }
}

impl TryFrom<Value> for FieldList {
    type Error = ODataError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(FieldList::Text(s)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(ODataError::InvalidParameter(format!(
                        "expected a string list item, got: {}",
                        json_type_name(&other)
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(FieldList::List),
            other => Err(ODataError::InvalidParameter(format!(
                "expected a string or a list, got: {}",
                json_type_name(&other)
            ))),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declared fields of `QueryState`, used to drive resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryField {
    Resource,
    Guid,
    Filter,
    Select,
    Expand,
    Data,
    Skip,
    Top,
    OrderBy,
    InlineCount,
    IsOnlyCount,
    Format,
}

impl QueryField {
    pub const ALL: [QueryField; 12] = [
        QueryField::Resource,
        QueryField::Guid,
        QueryField::Filter,
        QueryField::Select,
        QueryField::Expand,
        QueryField::Data,
        QueryField::Skip,
        QueryField::Top,
        QueryField::OrderBy,
        QueryField::InlineCount,
        QueryField::IsOnlyCount,
        QueryField::Format,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QueryField::Resource => "resource",
            QueryField::Guid => "guid",
            QueryField::Filter => "filter",
            QueryField::Select => "select",
            QueryField::Expand => "expand",
            QueryField::Data => "data",
            QueryField::Skip => "skip",
            QueryField::Top => "top",
            QueryField::OrderBy => "orderBy",
            QueryField::InlineCount => "inlineCount",
            QueryField::IsOnlyCount => "isOnlyCount",
            QueryField::Format => "format",
        }
    }
}

impl fmt::Display for QueryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueryField {
    type Err = ODataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| ODataError::InvalidParameter(format!("unknown query field '{s}'")))
    }
}

/// Compiled request halves: query-string mapping and JSON body.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueryAndBody {
    pub query: BTreeMap<String, String>,
    pub body: String,
}

/// Accumulated query intent for one logical request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    resource: String,
    guid: Option<String>,
    filter: String,
    select: String,
    expand: String,
    data: Map<String, Value>,
    skip: Option<u64>,
    top: Option<u64>,
    order_by: String,
    inline_count: Option<InlineCount>,
    is_only_count: bool,
    format: Option<MetadataLevel>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn set_resource(&mut self, resource: &str) -> &mut Self {
        self.resource = resource.trim().to_string();
        self
    }

    /// Compiled key predicate, or an empty string when no GUID is set.
    pub fn guid(&self) -> &str {
        self.guid.as_deref().unwrap_or_default()
    }

    /// Store the first GUID found anywhere in `raw` as `(guid'<guid>')`.
    ///
    /// Characters around the match are ignored, so `"x0000...0000y"`
    /// succeeds. On failure the current GUID is left untouched.
    pub fn set_guid(&mut self, raw: &str) -> Result<&mut Self, ODataError> {
        let found = GUID_PATTERN.find(raw).ok_or_else(|| {
            ODataError::InvalidParameter(format!("value '{raw}' is not in GUID format or empty"))
        })?;
        self.guid = Some(format!("(guid'{}')", found.as_str()));
        Ok(self)
    }

    pub fn clear_guid(&mut self) -> &mut Self {
        self.guid = None;
        self
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Stored verbatim after trimming; the expression is not validated.
    pub fn set_filter(&mut self, filter: &str) -> &mut Self {
        self.filter = filter.trim().to_string();
        self
    }

    pub fn select(&self) -> &str {
        &self.select
    }

    pub fn set_select(&mut self, select: impl Into<FieldList>) -> &mut Self {
        self.select = select.into().compile();
        self
    }

    pub fn expand(&self) -> &str {
        &self.expand
    }

    pub fn set_expand(&mut self, expand: impl Into<FieldList>) -> &mut Self {
        self.expand = expand.into().compile();
        self
    }

    pub fn order_by(&self) -> &str {
        &self.order_by
    }

    pub fn set_order_by(&mut self, order_by: impl Into<FieldList>) -> &mut Self {
        self.order_by = order_by.into().compile();
        self
    }

    pub fn skip(&self) -> Option<u64> {
        self.skip
    }

    /// Negative values are clamped to 0.
    pub fn set_skip(&mut self, skip: i64) -> &mut Self {
        self.skip = Some(skip.max(0) as u64);
        self
    }

    pub fn top(&self) -> Option<u64> {
        self.top
    }

    /// Negative values are clamped to 0.
    pub fn set_top(&mut self, top: i64) -> &mut Self {
        self.top = Some(top.max(0) as u64);
        self
    }

    pub fn inline_count(&self) -> Option<InlineCount> {
        self.inline_count
    }

    pub fn set_inline_count(&mut self, mode: InlineCount) -> &mut Self {
        self.inline_count = Some(mode);
        self
    }

    pub fn format(&self) -> Option<MetadataLevel> {
        self.format
    }

    pub fn set_metadata_level(&mut self, level: MetadataLevel) -> &mut Self {
        self.format = Some(level);
        self
    }

    pub fn is_only_count(&self) -> bool {
        self.is_only_count
    }

    /// There is no unset; only a reset clears the flag.
    pub fn set_true_is_only_count(&mut self) -> &mut Self {
        self.is_only_count = true;
        self
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Replace the payload wholesale.
    pub fn set_data(&mut self, data: Map<String, Value>) -> &mut Self {
        self.data = data;
        self
    }

    /// Reset the named fields to their defaults.
    pub fn reset_only(&mut self, fields: &[QueryField]) -> &mut Self {
        let mut defaults = Self::default();
        for field in fields {
            self.reset_field(*field, &mut defaults);
        }
        self
    }

    /// Reset every field except the named ones.
    pub fn reset_exclude(&mut self, keep: &[QueryField]) -> &mut Self {
        let mut defaults = Self::default();
        for field in QueryField::ALL {
            if !keep.contains(&field) {
                self.reset_field(field, &mut defaults);
            }
        }
        self
    }

    /// `reset_only` by field name; unknown names are ignored.
    pub fn reset_only_named(&mut self, fields: &[&str]) -> &mut Self {
        let fields: Vec<QueryField> = fields.iter().filter_map(|name| name.parse().ok()).collect();
        self.reset_only(&fields)
    }

    /// `reset_exclude` by field name; unknown names are ignored.
    pub fn reset_exclude_named(&mut self, keep: &[&str]) -> &mut Self {
        let keep: Vec<QueryField> = keep.iter().filter_map(|name| name.parse().ok()).collect();
        self.reset_exclude(&keep)
    }

    fn reset_field(&mut self, field: QueryField, defaults: &mut QueryState) {
        use std::mem::take;

        match field {
            QueryField::Resource => self.resource = take(&mut defaults.resource),
            QueryField::Guid => self.guid = take(&mut defaults.guid),
            QueryField::Filter => self.filter = take(&mut defaults.filter),
            QueryField::Select => self.select = take(&mut defaults.select),
            QueryField::Expand => self.expand = take(&mut defaults.expand),
            QueryField::Data => self.data = take(&mut defaults.data),
            QueryField::Skip => self.skip = take(&mut defaults.skip),
            QueryField::Top => self.top = take(&mut defaults.top),
            QueryField::OrderBy => self.order_by = take(&mut defaults.order_by),
            QueryField::InlineCount => self.inline_count = take(&mut defaults.inline_count),
            QueryField::IsOnlyCount => self.is_only_count = take(&mut defaults.is_only_count),
            QueryField::Format => self.format = take(&mut defaults.format),
        }
    }

    /// Protocol query parameters with every empty entry removed.
    ///
    /// A value of `""` or `"0"` counts as empty, as does a `skip` or `top`
    /// of 0, so "skip 0 records" compiles the same as "no skip".
    pub fn get_parameters(&self) -> BTreeMap<String, String> {
        let candidates = [
            ("$filter", Some(self.filter.clone())),
            ("$select", Some(self.select.clone())),
            ("$expand", Some(self.expand.clone())),
            ("$skip", self.skip.filter(|n| *n > 0).map(|n| n.to_string())),
            ("$top", self.top.filter(|n| *n > 0).map(|n| n.to_string())),
            ("$orderby", Some(self.order_by.clone())),
            ("$inlinecount", self.inline_count.map(|m| m.as_str().to_string())),
            ("$format", self.format.map(|l| l.as_str().to_string())),
        ];

        candidates
            .into_iter()
            .filter_map(|(key, value)| value.filter(|v| !is_blank(v)).map(|v| (key.to_string(), v)))
            .collect()
    }

    /// Payload entries that can be sent as flat JSON.
    ///
    /// Scalars and null are kept, as are empty arrays and objects; non-empty
    /// arrays and objects are dropped without an error.
    pub fn get_data(&self) -> Map<String, Value> {
        self.data
            .iter()
            .filter(|(_, value)| match value {
                Value::Array(items) => items.is_empty(),
                Value::Object(fields) => fields.is_empty(),
                _ => true,
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn get_query_and_body(&self) -> Result<QueryAndBody, ODataError> {
        let body = serde_json::to_string(&self.get_data()).map_err(|e| ODataError::Serialization(e.to_string()))?;
        Ok(QueryAndBody {
            query: self.get_parameters(),
            body,
        })
    }
}
