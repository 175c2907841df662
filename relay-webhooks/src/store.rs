//! Read path into endpoint and mapping configuration

use crate::{MappingDefinition, StoreError, WebhookEndpoint};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup of endpoint and mapping records by ID.
///
/// Both reads are side-effect free. `Ok(None)` means the record does not
/// exist; `Err` means the store itself failed.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Resolve an endpoint by ID
    async fn get_endpoint(&self, id: &str) -> Result<Option<WebhookEndpoint>, StoreError>;

    /// Resolve a mapping by ID
    async fn get_mapping(&self, id: &str) -> Result<Option<MappingDefinition>, StoreError>;
}

/// Serializable contents of a store, used as the seed file format
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,
    #[serde(default)]
    pub mappings: Vec<MappingDefinition>,
}

/// In-process store with concurrent reads.
///
/// Endpoints reference mappings by ID only, so removing a mapping leaves
/// referencing endpoints with a dangling `mapping_id` that resolves to `None`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    endpoints: Arc<RwLock<HashMap<String, WebhookEndpoint>>>,
    mappings: Arc<RwLock<HashMap<String, MappingDefinition>>>,
}

impl InMemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot; later duplicates replace earlier ones
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        for mapping in snapshot.mappings {
            store.insert_mapping(mapping);
        }
        for endpoint in snapshot.endpoints {
            store.insert_endpoint(endpoint);
        }
        store
    }

    /// Copy the current contents out, sorted by ID
    pub fn snapshot(&self) -> StoreSnapshot {
        let mut endpoints = self.endpoints();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        let mut mappings = self.mappings();
        mappings.sort_by(|a, b| a.id.cmp(&b.id));
        StoreSnapshot {
            endpoints,
            mappings,
        }
    }

    /// Insert or replace an endpoint, returning its ID
    pub fn insert_endpoint(&self, endpoint: WebhookEndpoint) -> String {
        let id = endpoint.id.clone();
        self.endpoints.write().insert(id.clone(), endpoint);
        id
    }

    /// Insert or replace a mapping, returning its ID
    pub fn insert_mapping(&self, mapping: MappingDefinition) -> String {
        let id = mapping.id.clone();
        self.mappings.write().insert(id.clone(), mapping);
        id
    }

    /// Remove an endpoint by ID
    pub fn remove_endpoint(&self, id: &str) -> Option<WebhookEndpoint> {
        self.endpoints.write().remove(id)
    }

    /// Remove a mapping by ID. Referencing endpoints are left untouched.
    pub fn remove_mapping(&self, id: &str) -> Option<MappingDefinition> {
        self.mappings.write().remove(id)
    }

    /// All endpoints
    pub fn endpoints(&self) -> Vec<WebhookEndpoint> {
        self.endpoints.read().values().cloned().collect()
    }

    /// All mappings
    pub fn mappings(&self) -> Vec<MappingDefinition> {
        self.mappings.read().values().cloned().collect()
    }

    /// Number of endpoints
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Number of mappings
    pub fn mapping_count(&self) -> usize {
        self.mappings.read().len()
    }

    /// Endpoints whose `mapping_id` points at no stored mapping
    pub fn dangling_endpoints(&self) -> Vec<WebhookEndpoint> {
        let mappings = self.mappings.read();
        self.endpoints
            .read()
            .values()
            .filter(|e| {
                e.mapping_id
                    .as_ref()
                    .is_some_and(|id| !mappings.contains_key(id))
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MappingStore for InMemoryStore {
    async fn get_endpoint(&self, id: &str) -> Result<Option<WebhookEndpoint>, StoreError> {
        Ok(self.endpoints.read().get(id).cloned())
    }

    async fn get_mapping(&self, id: &str) -> Result<Option<MappingDefinition>, StoreError> {
        Ok(self.mappings.read().get(id).cloned())
    }
}
