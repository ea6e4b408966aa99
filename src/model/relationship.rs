//! Relationship (edge) in the knowledge graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::{ids, PropertyMap, Value};
use crate::{Error, Result};

/// Traversal direction relative to an anchor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Anchor is the `from` role.
    Outgoing,
    /// Anchor is the `to` role.
    Incoming,
    /// Anchor may hold either role.
    Either,
}

/// A typed directed edge between two elements.
///
/// Serialized field names follow the persisted relation record shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub internal_id: String,
    pub stix_id: Option<String>,
    pub relationship_type: String,
    #[serde(rename = "from_internal_id")]
    pub from_id: String,
    #[serde(rename = "to_internal_id")]
    pub to_id: String,
    /// Element type of the `from` end, denormalized at creation.
    pub from_type: String,
    /// Element type of the `to` end, denormalized at creation.
    pub to_type: String,
    pub confidence: Option<u8>,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub revoked: bool,
    #[serde(default)]
    pub attributes: PropertyMap,
    #[serde(default)]
    pub deleted: bool,
}

impl Relationship {
    pub fn new(
        relationship_type: impl Into<String>,
        from: (&str, &str),
        to: (&str, &str),
    ) -> Self {
        let now = Utc::now();
        Self {
            internal_id: ids::new_internal_id(),
            stix_id: None,
            relationship_type: relationship_type.into(),
            from_id: from.0.to_string(),
            from_type: from.1.to_string(),
            to_id: to.0.to_string(),
            to_type: to.1.to_string(),
            confidence: None,
            description: None,
            created: now,
            modified: now,
            revoked: false,
            attributes: PropertyMap::new(),
            deleted: false,
        }
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// The "other" end of the relationship from the given element.
    pub fn other_end(&self, from: &str) -> Option<&str> {
        if from == self.from_id { Some(&self.to_id) }
        else if from == self.to_id { Some(&self.from_id) }
        else { None }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from_id == self.to_id
    }

    /// Relation context carried next to a traversal result.
    pub fn meta(&self) -> RelationMeta {
        RelationMeta {
            internal_id: self.internal_id.clone(),
            relationship_type: self.relationship_type.clone(),
            from_id: self.from_id.clone(),
            to_id: self.to_id.clone(),
        }
    }

    /// Apply a validated patch and bump `modified`.
    pub fn apply(&mut self, patch: &FieldPatch, now: DateTime<Utc>) -> Result<()> {
        patch.validate()?;
        match patch.key.as_str() {
            "confidence" => self.confidence = patch.confidence()?,
            "description" => self.description = patch.value.as_str().map(str::to_string),
            "revoked" => self.revoked = patch.value.as_bool().unwrap_or(false),
            key => {
                if patch.value.is_null() {
                    self.attributes.remove(key);
                } else {
                    self.attributes.insert(key.to_string(), patch.value.clone());
                }
            }
        }
        self.modified = now;
        Ok(())
    }
}

/// Relation context attached to a connection edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationMeta {
    pub internal_id: String,
    pub relationship_type: String,
    pub from_id: String,
    pub to_id: String,
}

/// Fields that identify a relationship and can never be edited.
pub const IMMUTABLE_FIELDS: &[&str] = &[
    "internal_id",
    "stix_id",
    "relationship_type",
    "from",
    "from_id",
    "from_internal_id",
    "to",
    "to_id",
    "to_internal_id",
    "created",
];

/// A single-attribute edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch {
    pub key: String,
    pub value: Value,
}

impl FieldPatch {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Reject immutable keys and ill-typed values for known keys.
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::InvalidInput("field patch key is empty".into()));
        }
        if IMMUTABLE_FIELDS.contains(&self.key.as_str()) {
            return Err(Error::InvalidInput(format!("field '{}' is immutable", self.key)));
        }
        match self.key.as_str() {
            "confidence" => self.confidence().map(|_| ()),
            "description" if !(self.value.is_string() || self.value.is_null()) => {
                Err(Error::InvalidInput(format!(
                    "description must be a string, got {}",
                    self.value.type_name()
                )))
            }
            "revoked" if self.value.as_bool().is_none() => Err(Error::InvalidInput(format!(
                "revoked must be a boolean, got {}",
                self.value.type_name()
            ))),
            "modified" => Err(Error::InvalidInput("modified is maintained by the store".into())),
            _ => Ok(()),
        }
    }

    fn confidence(&self) -> Result<Option<u8>> {
        if self.value.is_null() {
            return Ok(None);
        }
        let raw = self.value.as_int().ok_or_else(|| Error::InvalidInput(format!(
            "confidence must be an integer, got {}",
            self.value.type_name()
        )))?;
        validate_confidence(raw).map(Some)
    }
}

/// Confidence is an integer percentage.
pub fn validate_confidence(raw: i64) -> Result<u8> {
    u8::try_from(raw)
        .ok()
        .filter(|c| *c <= 100)
        .ok_or_else(|| Error::InvalidInput(format!("confidence {raw} outside 0..=100")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Relationship {
        Relationship::new("uses", ("a", "Intrusion-Set"), ("b", "Malware"))
    }

    #[test]
    fn test_other_end() {
        let rel = sample();
        assert_eq!(rel.other_end("a"), Some("b"));
        assert_eq!(rel.other_end("b"), Some("a"));
        assert_eq!(rel.other_end("c"), None);
    }

    #[test]
    fn test_apply_confidence_bumps_modified() {
        let mut rel = sample();
        let later = rel.modified + chrono::Duration::seconds(5);
        rel.apply(&FieldPatch::new("confidence", 75), later).unwrap();
        assert_eq!(rel.confidence, Some(75));
        assert_eq!(rel.modified, later);
    }

    #[test]
    fn test_immutable_fields_rejected() {
        for key in ["relationship_type", "from", "to", "internal_id"] {
            let err = FieldPatch::new(key, "x").validate().unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{key} should be immutable");
        }
    }

    #[test]
    fn test_confidence_bounds() {
        assert!(FieldPatch::new("confidence", 101).validate().is_err());
        assert!(FieldPatch::new("confidence", -1).validate().is_err());
        assert!(FieldPatch::new("confidence", "high").validate().is_err());
        assert!(FieldPatch::new("confidence", 0).validate().is_ok());
        assert!(FieldPatch::new("confidence", Value::Null).validate().is_ok());
    }

    #[test]
    fn test_free_attribute_null_removes() {
        let mut rel = sample();
        let now = Utc::now();
        rel.apply(&FieldPatch::new("x_opencti_weight", 3), now).unwrap();
        assert_eq!(rel.attributes.get("x_opencti_weight"), Some(&Value::Int(3)));
        rel.apply(&FieldPatch::new("x_opencti_weight", Value::Null), now).unwrap();
        assert!(rel.attributes.get("x_opencti_weight").is_none());
    }
}
