//! Field extraction from inbound bodies

use crate::{JsonPath, PathError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Placeholder assigned to every field when a mapping is run in test mode
pub const SAMPLE_VALUE: &str = "sample_value";

/// Result of extracting one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// The path matched; this is its first match (which may be `null`)
    Present(Value),
    /// The path matched nothing
    Absent,
}

impl FieldValue {
    pub fn is_present(&self) -> bool {
        matches!(self, FieldValue::Present(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Present(value) => Some(value),
            FieldValue::Absent => None,
        }
    }
}

impl From<Option<Value>> for FieldValue {
    fn from(value: Option<Value>) -> Self {
        value.map_or(FieldValue::Absent, FieldValue::Present)
    }
}

/// Named values handed to a formula
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    fields: BTreeMap<String, FieldValue>,
}

impl ExtractedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every field set to [`SAMPLE_VALUE`]
    pub fn sample(incoming_fields: &BTreeMap<String, String>) -> Self {
        let fields = incoming_fields
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    FieldValue::Present(Value::String(SAMPLE_VALUE.to_string())),
                )
            })
            .collect();
        Self { fields }
    }

    /// Set a present value
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, FieldValue::Present(value.into()));
        self
    }

    /// Mark a field absent
    pub fn with_absent(mut self, name: impl Into<String>) -> Self {
        self.insert(name, FieldValue::Absent);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Look up a field. Unknown names are `None`, same as absent ones.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(FieldValue::as_value)
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Names of fields whose path matched nothing
    pub fn absent(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_present())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Present fields as a JSON object; absent fields are left out
    pub fn to_object(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .filter_map(|(k, v)| v.as_value().map(|v| (k.clone(), v.clone())))
            .collect();
        Value::Object(map)
    }
}

/// Pulls named values out of a JSON document
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate each path independently and keep its first match.
    ///
    /// An expression that does not parse yields [`FieldValue::Absent`] for
    /// that field only; the rest are still extracted.
    pub fn extract(&self, body: &Value, incoming_fields: &BTreeMap<String, String>) -> ExtractedFields {
        let mut extracted = ExtractedFields::new();
        for (name, expr) in incoming_fields {
            let value = match JsonPath::parse(expr) {
                Ok(path) => FieldValue::from(path.first(body).cloned()),
                Err(e) => {
                    warn!(field = %name, path = %expr, error = %e, "Invalid path expression, field treated as absent");
                    FieldValue::Absent
                }
            };
            extracted.insert(name.clone(), value);
        }
        extracted
    }

    /// Every field whose path expression does not parse
    pub fn validate(&self, incoming_fields: &BTreeMap<String, String>) -> Vec<(String, PathError)> {
        incoming_fields
            .iter()
            .filter_map(|(name, expr)| JsonPath::parse(expr).err().map(|e| (name.clone(), e)))
            .collect()
    }
}
