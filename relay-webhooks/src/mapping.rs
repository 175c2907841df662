//! Reusable mapping definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// How to pull fields out of an inbound body and build the outbound one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingDefinition {
    /// Unique mapping ID
    pub id: String,

    /// Label
    pub name: String,

    /// Output field name to path expression over the inbound body
    #[serde(default)]
    pub incoming_fields: BTreeMap<String, String>,

    /// Declared shape of the outbound body. Informational only; the
    /// formula's actual output is not checked against it.
    #[serde(default)]
    pub outgoing_fields: serde_json::Value,

    /// Expression evaluated over the extracted fields
    pub formula: String,
}

impl MappingDefinition {
    /// Create a mapping with a generated ID
    pub fn new(name: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            incoming_fields: BTreeMap::new(),
            outgoing_fields: serde_json::Value::Null,
            formula: formula.into(),
        }
    }

    /// Set a custom ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Add an extracted field
    pub fn with_field(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.incoming_fields.insert(name.into(), path.into());
        self
    }

    /// Describe the expected output fields
    pub fn with_outgoing(mut self, outgoing: serde_json::Value) -> Self {
        self.outgoing_fields = outgoing;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_builder() {
        let mapping = MappingDefinition::new("teams", r#"{ text: "Message: " + msg }"#)
            .with_id("m1")
            .with_field("msg", "$.object.data.object.body")
            .with_field("from", "$.object.data.object.from");

        assert_eq!(mapping.id, "m1");
        assert_eq!(mapping.incoming_fields.len(), 2);
        assert_eq!(mapping.incoming_fields["msg"], "$.object.data.object.body");
    }

    #[test]
    fn test_deserialize_legacy_record() {
        let mapping: MappingDefinition = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "name": "OpenPhone to Teams",
            "incomingFields": { "msg": "$.object.data.object.body" },
            "outgoingFields": ["text"],
            "formula": "{ text: msg }"
        }))
        .unwrap();

        assert_eq!(mapping.outgoing_fields, serde_json::json!(["text"]));
        assert_eq!(mapping.incoming_fields.len(), 1);
    }
}
