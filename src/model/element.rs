//! Element: anything addressable by id: an entity or a relationship.
//!
//! Meta relations may originate from a relationship (marking a relationship,
//! for instance), so relationship ends reference elements, not just entities.

use serde::{Deserialize, Serialize};
use super::{Entity, Relationship};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum Element {
    Entity(Entity),
    Relationship(Relationship),
}

impl Element {
    pub fn internal_id(&self) -> &str {
        match self {
            Element::Entity(e) => &e.internal_id,
            Element::Relationship(r) => &r.internal_id,
        }
    }

    pub fn stix_id(&self) -> Option<&str> {
        match self {
            Element::Entity(e) => e.stix_id.as_deref(),
            Element::Relationship(r) => r.stix_id.as_deref(),
        }
    }

    /// The type used for taxonomy checks: `entity_type` for entities,
    /// `relationship_type` for relationships.
    pub fn element_type(&self) -> &str {
        match self {
            Element::Entity(e) => &e.entity_type,
            Element::Relationship(r) => &r.relationship_type,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            Element::Entity(e) => e.deleted,
            Element::Relationship(r) => r.deleted,
        }
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self, Element::Relationship(_))
    }

    /// Free-text fields a search term is matched against.
    pub fn search_text(&self) -> Vec<&str> {
        match self {
            Element::Entity(e) => ["name", "description"]
                .iter()
                .filter_map(|k| e.get(k).and_then(|v| v.as_str()))
                .collect(),
            Element::Relationship(r) => r.description.as_deref().into_iter().collect(),
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Element::Entity(e) => Some(e),
            Element::Relationship(_) => None,
        }
    }

    pub fn into_relationship(self) -> Option<Relationship> {
        match self {
            Element::Relationship(r) => Some(r),
            Element::Entity(_) => None,
        }
    }
}

impl From<Entity> for Element {
    fn from(e: Entity) -> Self { Element::Entity(e) }
}

impl From<Relationship> for Element {
    fn from(r: Relationship) -> Self { Element::Relationship(r) }
}
