//! Caller-facing inputs and outputs of the relationship service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::PropertyMap;
use crate::pagination::PageRequest;
use crate::planner::{OrderBy, OrderMode};

/// A new core relationship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipInput {
    pub relationship_type: String,
    pub from_id: String,
    pub to_id: String,
    /// Generated as `relationship--<uuid>` when absent.
    pub stix_id: Option<String>,
    pub confidence: Option<i64>,
    pub description: Option<String>,
    pub revoked: bool,
    pub attributes: PropertyMap,
}

impl RelationshipInput {
    pub fn new(relationship_type: impl Into<String>, from_id: impl Into<String>, to_id: impl Into<String>) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: i64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_stix_id(mut self, stix_id: impl Into<String>) -> Self {
        self.stix_id = Some(stix_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A meta relation to hang off an existing element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaInput {
    pub relationship_type: String,
    pub to_id: String,
}

impl MetaInput {
    pub fn new(relationship_type: impl Into<String>, to_id: impl Into<String>) -> Self {
        Self { relationship_type: relationship_type.into(), to_id: to_id.into() }
    }
}

/// Relationship listing filter. Every field is optional; the empty filter
/// lists every live core relationship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipFilter {
    /// A core type, or the `stix-core-relationship` abstract for all of them.
    pub relationship_type: Option<String>,
    pub from_id: Option<String>,
    pub to_id: Option<String>,
    /// Restrict the `to` end to these types (abstract types expand).
    pub to_types: Vec<String>,
    pub search: Option<String>,
    pub min_confidence: Option<i64>,
    pub max_confidence: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub exclude_revoked: bool,
    pub order_by: OrderBy,
    pub order_mode: OrderMode,
    #[serde(flatten)]
    pub page: PageRequest,
}

impl RelationshipFilter {
    pub fn of_type(relationship_type: impl Into<String>) -> Self {
        Self { relationship_type: Some(relationship_type.into()), ..Self::default() }
    }

    pub fn page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }
}

/// Scope of a relationship count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeArgs {
    pub relationship_type: Option<String>,
    pub from_id: Option<String>,
    pub to_id: Option<String>,
    pub to_types: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// `count` honors every scope bound; `total` ignores `end_date`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub count: usize,
    pub total: usize,
}
