//! Entity: a typed node in the knowledge graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::{ids, PropertyMap, Value};

/// A first-class typed node.
///
/// Entities are created by domain operations outside this crate and are
/// referenced, never owned, by relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub internal_id: String,
    /// Externally stable identifier (`<type>--<uuid>`).
    pub stix_id: Option<String>,
    /// Taxonomy leaf, e.g. `"Malware"` or `"Report"`.
    pub entity_type: String,
    pub attributes: PropertyMap,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

impl Entity {
    /// New entity with a fresh internal id and no stix id.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            internal_id: ids::new_internal_id(),
            stix_id: None,
            entity_type: entity_type.into(),
            attributes: PropertyMap::new(),
            created_at: Utc::now(),
            deleted: false,
        }
    }

    pub fn with_stix_id(mut self, stix_id: impl Into<String>) -> Self {
        self.stix_id = Some(stix_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }
}
