//! Type definitions for the attribute store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::constants::{DIMENSION_COUNT, SLOTS_PER_CATEGORY, VALUE_FIELD};
use crate::errors::{HypercubeError, Result, ValidationErrorExt};
use crate::identity::{identity_of_value, Identity};
use crate::validation;

// =============================================================================
// SLOT SCHEMA
// =============================================================================

macro_rules! dimensions {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// One of the 40 named attribute slots.
        ///
        /// Declaration order is the axis order: `Sector` is D0, `Consistency` is D39.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum Dimension {
            $($variant),+
        }

        impl Dimension {
            /// Every slot in axis order
            pub const ALL: [Dimension; DIMENSION_COUNT] = [$(Dimension::$variant),+];

            /// Slot name as used in string-keyed input
            pub fn name(self) -> &'static str {
                match self {
                    $(Dimension::$variant => $name),+
                }
            }

            /// Resolve a slot name; `None` for anything outside the schema
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Dimension::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

dimensions! {
    // Business (D0-D9)
    Sector => "sector",
    Brand => "brand",
    ProductType => "product_type",
    Market => "market",
    Region => "region",
    CustomerSegment => "customer_segment",
    RevenueTier => "revenue_tier",
    GrowthStage => "growth_stage",
    Partnership => "partnership",
    ComplianceZone => "compliance_zone",
    // Technical (D10-D19)
    TechStack => "tech_stack",
    Version => "version",
    DeploymentEnv => "deployment_env",
    LatencyTier => "latency_tier",
    StorageType => "storage_type",
    ApiProtocol => "api_protocol",
    SecurityLevel => "security_level",
    IntegrationType => "integration_type",
    ComputeTier => "compute_tier",
    NetworkZone => "network_zone",
    // Temporal (D20-D29)
    Year => "year",
    Quarter => "quarter",
    Month => "month",
    Week => "week",
    Day => "day",
    Hour => "hour",
    BreathCycle => "breath_cycle",
    Epoch => "epoch",
    Milestone => "milestone",
    Phase => "phase",
    // Quality (D30-D39)
    QualityScore => "quality_score",
    Completeness => "completeness",
    Verified => "verified",
    Confidence => "confidence",
    Relevance => "relevance",
    Freshness => "freshness",
    Authority => "authority",
    Coverage => "coverage",
    Accessibility => "accessibility",
    Consistency => "consistency",
}

/// Slot category, ten slots each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimensionCategory {
    Business,
    Technical,
    Temporal,
    Quality,
}

impl Dimension {
    /// Axis index (0-39)
    pub fn axis(self) -> usize {
        self as usize
    }

    pub fn category(self) -> DimensionCategory {
        match self.axis() / SLOTS_PER_CATEGORY {
            0 => DimensionCategory::Business,
            1 => DimensionCategory::Technical,
            2 => DimensionCategory::Temporal,
            _ => DimensionCategory::Quality,
        }
    }

    /// Parse a slot name, rejecting unknown names
    pub fn parse(name: &str) -> Result<Self> {
        Self::from_name(name).ok_or_else(|| {
            HypercubeError::validation(name, "unknown attribute slot")
        })
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}:{}", self.axis(), self.name())
    }
}

impl FromStr for Dimension {
    type Err = HypercubeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// =============================================================================
// SLOT VALUES
// =============================================================================

/// Scalar held by a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Hashable form of an [`AttributeValue`] used as equality-index key.
///
/// Typed: `Int(2025)` and `Float(2025.0)` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum IndexKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl AttributeValue {
    pub(crate) fn index_key(&self) -> IndexKey {
        match self {
            Self::Bool(b) => IndexKey::Bool(*b),
            Self::Int(i) => IndexKey::Int(*i),
            // -0.0 and 0.0 compare equal, so they must share a bucket
            Self::Float(f) => IndexKey::Float(if *f == 0.0 { 0.0f64.to_bits() } else { f.to_bits() }),
            Self::Str(s) => IndexKey::Str(s.clone()),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Ordering used by range operators.
    ///
    /// Numbers compare with numbers, strings with strings; every other pairing
    /// (including any boolean) is incomparable and never matches.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Bool(_), _) | (_, Self::Bool(_)) => None,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    fn validate(&self, dimension: Dimension) -> Result<()> {
        match self {
            Self::Float(f) => validation::validate_finite(*f).map_validation_err(dimension.name()),
            Self::Str(s) => {
                validation::validate_string_attribute(s).map_validation_err(dimension.name())
            }
            _ => Ok(()),
        }
    }

    /// Convert a JSON scalar. `Ok(None)` for null, error for arrays/objects.
    pub fn from_json(value: &Value) -> std::result::Result<Option<Self>, &'static str> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(Self::Bool(*b))),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Some(Self::Int(i))),
                None => n
                    .as_f64()
                    .map(|f| Some(Self::Float(f)))
                    .ok_or("number out of range"),
            },
            Value::String(s) => Ok(Some(Self::Str(s.clone()))),
            Value::Array(_) => Err("expected a scalar, got an array"),
            Value::Object(_) => Err("expected a scalar, got an object"),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

// =============================================================================
// ATTRIBUTES
// =============================================================================

/// Sparse slot → value mapping. Absent slots are omitted, never zero-filled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<Dimension, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, dimension: Dimension, value: impl Into<AttributeValue>) -> Self {
        self.0.insert(dimension, value.into());
        self
    }

    pub fn set(&mut self, dimension: Dimension, value: impl Into<AttributeValue>) -> Option<AttributeValue> {
        self.0.insert(dimension, value.into())
    }

    pub fn get(&self, dimension: Dimension) -> Option<&AttributeValue> {
        self.0.get(&dimension)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &AttributeValue)> {
        self.0.iter().map(|(d, v)| (*d, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (dimension, value) in self.iter() {
            value.validate(dimension)?;
        }
        Ok(())
    }

    /// Strict conversion from string-keyed input.
    ///
    /// Unknown slot names and non-scalar values are rejected; nulls are treated
    /// as absent.
    pub fn from_json(map: &Map<String, Value>) -> Result<Self> {
        let mut attributes = Self::new();
        for (key, value) in map {
            let dimension = Dimension::parse(key)?;
            let parsed = AttributeValue::from_json(value)
                .map_err(|reason| HypercubeError::validation(key.as_str(), reason))?;
            if let Some(parsed) = parsed {
                parsed.validate(dimension)?;
                attributes.0.insert(dimension, parsed);
            }
        }
        Ok(attributes)
    }

    /// Lenient extraction from arbitrary content: keeps scalar fields whose key
    /// is a slot name and skips everything else.
    pub fn extract_known(content: &Value) -> Self {
        let mut attributes = Self::new();
        if let Value::Object(map) = content {
            for (key, value) in map {
                let Some(dimension) = Dimension::from_name(key) else {
                    continue;
                };
                if let Ok(Some(parsed)) = AttributeValue::from_json(value) {
                    if parsed.validate(dimension).is_ok() {
                        attributes.0.insert(dimension, parsed);
                    }
                }
            }
        }
        attributes
    }

    /// Flat JSON object keyed by slot name
    pub fn to_json(&self) -> Map<String, Value> {
        self.iter()
            .map(|(d, v)| (d.name().to_string(), v.to_json()))
            .collect()
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Input to [`crate::store::AttributeStore::store`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub attributes: Attributes,

    /// Amount routed through the CARE ledger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// Opaque, non-indexed provenance carried with the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl StoreRequest {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            value: None,
            payload: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Parse a flat string-keyed document: slot names plus the reserved
    /// `value` key. Any other key is rejected.
    pub fn from_json(document: &Value) -> Result<Self> {
        let Value::Object(map) = document else {
            return Err(HypercubeError::validation(
                "record",
                "expected a JSON object of slot names",
            ));
        };

        let mut slots = map.clone();
        let value = match slots.remove(VALUE_FIELD) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(other) => {
                return Err(HypercubeError::validation(
                    VALUE_FIELD,
                    format!("expected a number, got {other}"),
                ))
            }
        };

        Ok(Self {
            attributes: Attributes::from_json(&slots)?,
            value,
            payload: None,
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.attributes.validate()?;
        if let Some(value) = self.value {
            validation::validate_finite(value).map_validation_err(VALUE_FIELD)?;
        }
        Ok(())
    }

    /// Canonical document the identity is computed over
    pub fn canonical_document(&self) -> Value {
        let mut doc = self.attributes.to_json();
        if let Some(value) = self.value {
            doc.insert(VALUE_FIELD.to_string(), Value::from(value));
        }
        if let Some(payload) = &self.payload {
            doc.insert("payload".to_string(), payload.clone());
        }
        Value::Object(doc)
    }

    pub fn identity(&self) -> Identity {
        identity_of_value(&self.canonical_document())
    }
}

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identity: Identity,
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
    /// Insertion sequence, used as the recency tie-break
    pub sequence: u64,
}

impl Record {
    pub fn get(&self, dimension: Dimension) -> Option<&AttributeValue> {
        self.attributes.get(dimension)
    }

    /// Recompute the identity from content
    pub fn content_identity(&self) -> Identity {
        StoreRequest {
            attributes: self.attributes.clone(),
            value: self.value,
            payload: self.payload.clone(),
        }
        .identity()
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Comparison operator for a single filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::In => "in",
        }
    }

    /// Resolved through the equality index rather than a scan
    pub fn uses_index(self) -> bool {
        matches!(self, Self::Eq | Self::In)
    }

    /// Whether `ordering` (record value vs threshold) satisfies a range operator
    pub(crate) fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Gt => ordering == Ordering::Greater,
            Self::Lt => ordering == Ordering::Less,
            Self::Gte => ordering != Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
            Self::Eq => ordering == Ordering::Equal,
            Self::In => false,
        }
    }
}

impl FromStr for Operator {
    type Err = HypercubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "==" => Ok(Self::Eq),
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Gte),
            "<=" => Ok(Self::Lte),
            "in" => Ok(Self::In),
            other => Err(HypercubeError::validation(
                "operator",
                format!("unknown operator '{other}' (expected ==, >, <, >=, <=, in)"),
            )),
        }
    }
}

/// Right-hand side of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Set(Vec<AttributeValue>),
    Scalar(AttributeValue),
}

/// One `slot <op> value` condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub dimension: Dimension,
    pub operator: Operator,
    pub value: FilterValue,
}

impl Filter {
    pub fn validate(&self) -> Result<()> {
        let field = self.dimension.name();
        match (self.operator, &self.value) {
            (Operator::In, FilterValue::Set(values)) => {
                for v in values {
                    v.validate(self.dimension)?;
                }
                Ok(())
            }
            (Operator::In, FilterValue::Scalar(_)) => Err(HypercubeError::validation(
                field,
                "operator 'in' requires a list of values",
            )),
            (op, FilterValue::Set(_)) => Err(HypercubeError::validation(
                field,
                format!("operator '{}' requires a single value", op.symbol()),
            )),
            (Operator::Eq, FilterValue::Scalar(v)) => v.validate(self.dimension),
            (op, FilterValue::Scalar(AttributeValue::Bool(_))) => Err(HypercubeError::validation(
                field,
                format!("operator '{}' cannot compare booleans", op.symbol()),
            )),
            (_, FilterValue::Scalar(v)) => v.validate(self.dimension),
        }
    }

    /// Evaluate against a record by direct comparison (the scan path)
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(self.dimension) else {
            return false;
        };
        match (&self.value, self.operator) {
            (FilterValue::Set(values), Operator::In) => {
                let key = actual.index_key();
                values.iter().any(|v| v.index_key() == key)
            }
            (FilterValue::Scalar(expected), Operator::Eq) => {
                actual.index_key() == expected.index_key()
            }
            (FilterValue::Scalar(threshold), op) => actual
                .compare(threshold)
                .map(|ordering| op.accepts(ordering))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Multi-slot query; all filters must hold (intersection)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeQuery {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AttributeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, dimension: Dimension, operator: Operator, value: FilterValue) -> Self {
        self.filters.push(Filter {
            dimension,
            operator,
            value,
        });
        self
    }

    pub fn eq(self, dimension: Dimension, value: impl Into<AttributeValue>) -> Self {
        self.filter(dimension, Operator::Eq, FilterValue::Scalar(value.into()))
    }

    pub fn gt(self, dimension: Dimension, value: impl Into<AttributeValue>) -> Self {
        self.filter(dimension, Operator::Gt, FilterValue::Scalar(value.into()))
    }

    pub fn lt(self, dimension: Dimension, value: impl Into<AttributeValue>) -> Self {
        self.filter(dimension, Operator::Lt, FilterValue::Scalar(value.into()))
    }

    pub fn gte(self, dimension: Dimension, value: impl Into<AttributeValue>) -> Self {
        self.filter(dimension, Operator::Gte, FilterValue::Scalar(value.into()))
    }

    pub fn lte(self, dimension: Dimension, value: impl Into<AttributeValue>) -> Self {
        self.filter(dimension, Operator::Lte, FilterValue::Scalar(value.into()))
    }

    pub fn one_of<V: Into<AttributeValue>>(
        self,
        dimension: Dimension,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let set = values.into_iter().map(Into::into).collect();
        self.filter(dimension, Operator::In, FilterValue::Set(set))
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build from the string-keyed form used by external callers:
    /// `filters` maps slot names to values, `operators` maps slot names to
    /// operator symbols (default `==`).
    pub fn from_json(
        filters: &Map<String, Value>,
        operators: &HashMap<String, String>,
        limit: Option<usize>,
    ) -> Result<Self> {
        for slot in operators.keys() {
            if !filters.contains_key(slot) {
                Dimension::parse(slot)?;
                return Err(HypercubeError::validation(
                    slot.as_str(),
                    "operator given for a slot without a filter value",
                ));
            }
        }

        let mut query = Self::new();
        for (slot, raw) in filters {
            let dimension = Dimension::parse(slot)?;
            let operator = match operators.get(slot) {
                Some(symbol) => symbol.parse::<Operator>()?,
                None => Operator::Eq,
            };
            let value = match raw {
                Value::Array(items) => {
                    let mut set = Vec::with_capacity(items.len());
                    for item in items {
                        match AttributeValue::from_json(item) {
                            Ok(Some(v)) => set.push(v),
                            Ok(None) => {}
                            Err(reason) => {
                                return Err(HypercubeError::validation(slot.as_str(), reason))
                            }
                        }
                    }
                    FilterValue::Set(set)
                }
                other => match AttributeValue::from_json(other) {
                    Ok(Some(v)) => FilterValue::Scalar(v),
                    Ok(None) => {
                        return Err(HypercubeError::validation(
                            slot.as_str(),
                            "filter value cannot be null",
                        ))
                    }
                    Err(reason) => return Err(HypercubeError::validation(slot.as_str(), reason)),
                },
            };
            query = query.filter(dimension, operator, value);
        }
        query.limit = limit;
        query.validate()?;
        Ok(query)
    }

    pub fn validate(&self) -> Result<()> {
        for filter in &self.filters {
            filter.validate()?;
        }
        if let Some(limit) = self.limit {
            validation::validate_limit(limit).map_validation_err("limit")?;
        }
        Ok(())
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Attribute store statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Store calls accepted (re-stores of an existing identity included)
    pub total_stored: u64,
    pub total_queries: u64,
    /// Distinct records held
    pub record_count: usize,
    /// Distinct (slot, value) equality buckets
    pub index_buckets: usize,
    pub dimensions: usize,
    pub care_rate: f64,
    pub care_pool: f64,
    pub care_redistributed: f64,
    pub avg_query_time_ms: f64,
    /// Share of the dense record × slot grid left empty
    pub free_capacity_percent: f64,
}
