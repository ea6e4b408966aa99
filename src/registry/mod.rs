//! # Relation Type Registry
//!
//! The single authoritative answer to "what kind of relation is this?" and
//! "may this relation join these two element types?". Every call site that
//! needs a taxonomy decision consults the registry instead of re-deriving it
//! from the type string.
//!
//! The registry is built once from a [`TaxonomyDefinition`] and is immutable
//! afterwards: pure lookups, no I/O, safe to share behind an `Arc`.

pub mod taxonomy;

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};
pub use taxonomy::*;

/// Taxonomy category of a relationship type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationClass {
    /// Structural attachment (label, marking, authorship, reference).
    Meta,
    /// Domain relation between two first-class entities.
    Core,
    /// Not registered.
    Unknown,
}

impl RelationClass {
    /// The abstract parent every relation of this class descends from.
    pub fn abstract_type(self) -> Option<&'static str> {
        match self {
            RelationClass::Meta => Some(ABSTRACT_STIX_META_RELATIONSHIP),
            RelationClass::Core => Some(ABSTRACT_STIX_CORE_RELATIONSHIP),
            RelationClass::Unknown => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelationTypeRegistry {
    classes: HashMap<String, RelationClass>,
    rules: HashMap<String, Vec<DirectionRule>>,
    /// Element type → direct parents. Relation types are registered here
    /// too, under their class's abstract type.
    parents: HashMap<String, Vec<String>>,
}

impl RelationTypeRegistry {
    /// Registry seeded with the standard taxonomy.
    pub fn standard() -> Self {
        // The bundled definition is checked by `test_standard_definition_is_valid`.
        Self::build(TaxonomyDefinition::standard())
    }

    /// Build from a definition, rejecting inconsistent data.
    pub fn from_definition(def: TaxonomyDefinition) -> Result<Self> {
        Self::validate(&def)?;
        Ok(Self::build(def))
    }

    /// Build from a JSON-serialized [`TaxonomyDefinition`].
    pub fn from_json(json: &str) -> Result<Self> {
        let def: TaxonomyDefinition = serde_json::from_str(json)?;
        Self::from_definition(def)
    }

    fn validate(def: &TaxonomyDefinition) -> Result<()> {
        let mut seen = HashSet::new();
        for rel in &def.relations {
            if rel.class == RelationClass::Unknown {
                return Err(Error::Config(format!(
                    "relation type '{}' must be classified meta or core",
                    rel.relationship_type
                )));
            }
            if !seen.insert(rel.relationship_type.as_str()) {
                return Err(Error::Config(format!(
                    "relation type '{}' is defined more than once",
                    rel.relationship_type
                )));
            }
            if def.entity_types.contains_key(&rel.relationship_type) {
                return Err(Error::Config(format!(
                    "'{}' is declared both as entity type and relation type",
                    rel.relationship_type
                )));
            }
        }
        for (ty, parents) in &def.entity_types {
            for parent in parents {
                if !def.entity_types.contains_key(parent) {
                    return Err(Error::Config(format!(
                        "entity type '{ty}' has undeclared parent '{parent}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn build(def: TaxonomyDefinition) -> Self {
        let mut parents: HashMap<String, Vec<String>> = def.entity_types.into_iter().collect();
        parents.insert(ABSTRACT_BASIC_RELATIONSHIP.into(), Vec::new());
        parents.insert(ABSTRACT_STIX_CORE_RELATIONSHIP.into(), vec![ABSTRACT_BASIC_RELATIONSHIP.into()]);
        parents.insert(ABSTRACT_STIX_META_RELATIONSHIP.into(), vec![ABSTRACT_BASIC_RELATIONSHIP.into()]);

        let mut classes = HashMap::new();
        let mut rules = HashMap::new();
        for rel in def.relations {
            if let Some(parent) = rel.class.abstract_type() {
                parents.insert(rel.relationship_type.clone(), vec![parent.to_string()]);
            }
            classes.insert(rel.relationship_type.clone(), rel.class);
            rules.insert(rel.relationship_type, rel.rules);
        }
        Self { classes, rules, parents }
    }

    // ========================================================================
    // Classification
    // ========================================================================

    pub fn classify(&self, relationship_type: &str) -> RelationClass {
        self.classes
            .get(relationship_type)
            .copied()
            .unwrap_or(RelationClass::Unknown)
    }

    pub fn is_meta(&self, relationship_type: &str) -> bool {
        self.classify(relationship_type) == RelationClass::Meta
    }

    pub fn is_core(&self, relationship_type: &str) -> bool {
        self.classify(relationship_type) == RelationClass::Core
    }

    /// Every concrete relation type of a class, sorted.
    pub fn types_of(&self, class: RelationClass) -> Vec<String> {
        let mut types: Vec<String> = self
            .classes
            .iter()
            .filter(|(_, c)| **c == class)
            .map(|(t, _)| t.clone())
            .collect();
        types.sort();
        types
    }

    // ========================================================================
    // Type hierarchy
    // ========================================================================

    /// True when the type is declared (entity, abstract, or relation type).
    pub fn is_known_type(&self, element_type: &str) -> bool {
        self.parents.contains_key(element_type)
    }

    /// True for declared entity types, abstract or concrete; false for
    /// relation types.
    pub fn is_entity_type(&self, element_type: &str) -> bool {
        self.is_known_type(element_type) && !self.is_a(element_type, ABSTRACT_BASIC_RELATIONSHIP)
    }

    /// True for entity types no other declared type descends from. Only
    /// these may be instantiated.
    pub fn is_leaf_entity_type(&self, element_type: &str) -> bool {
        self.is_entity_type(element_type)
            && !self.parents.values().any(|parents| parents.iter().any(|p| p == element_type))
    }

    /// True when `element_type` is `ancestor` or descends from it.
    pub fn is_a(&self, element_type: &str, ancestor: &str) -> bool {
        element_type == ancestor || self.ancestors(element_type).iter().any(|a| a == ancestor)
    }

    /// Every proper ancestor of `element_type`, nearest first. Empty for
    /// roots and undeclared types.
    pub fn ancestors(&self, element_type: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let mut queue = VecDeque::from([element_type]);
        let mut visited: HashSet<&str> = HashSet::from([element_type]);
        while let Some(current) = queue.pop_front() {
            let Some(parents) = self.parents.get(current) else {
                continue;
            };
            for parent in parents {
                if visited.insert(parent.as_str()) {
                    found.push(parent.clone());
                    queue.push_back(parent);
                }
            }
        }
        found
    }

    /// All declared types that are any of `roots` or descend from one, sorted.
    pub fn descendants_of(&self, roots: &[impl AsRef<str>]) -> Vec<String> {
        let mut types: Vec<String> = self
            .parents
            .keys()
            .filter(|t| roots.iter().any(|r| self.is_a(t, r.as_ref())))
            .cloned()
            .collect();
        types.sort();
        types
    }

    // ========================================================================
    // Direction legality
    // ========================================================================

    /// Whether `relationship_type` may join a `from_type` element to a
    /// `to_type` element. Unknown relation types never are.
    pub fn is_assignable_direction(&self, relationship_type: &str, from_type: &str, to_type: &str) -> bool {
        let Some(rules) = self.rules.get(relationship_type) else {
            return false;
        };
        rules.iter().any(|rule| {
            rule.from.iter().any(|f| self.is_a(from_type, f))
                && rule.to.iter().any(|t| self.is_a(to_type, t))
        })
    }

    /// Classification plus direction check, as one boundary guard.
    pub fn check(&self, relationship_type: &str, expected: RelationClass, from_type: &str, to_type: &str) -> Result<()> {
        let class = self.classify(relationship_type);
        if class != expected {
            return Err(Error::InvalidRelationType(format!(
                "'{relationship_type}' is classified {class:?}, this entry point accepts {expected:?} relations only"
            )));
        }
        if !self.is_assignable_direction(relationship_type, from_type, to_type) {
            return Err(Error::IllegalDirection {
                relationship_type: relationship_type.to_string(),
                from_type: from_type.to_string(),
                to_type: to_type.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RelationTypeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_definition_is_valid() {
        RelationTypeRegistry::from_definition(TaxonomyDefinition::standard()).unwrap();
    }

    #[test]
    fn test_classify() {
        let registry = RelationTypeRegistry::standard();
        assert_eq!(registry.classify("object-marking"), RelationClass::Meta);
        assert_eq!(registry.classify("created-by"), RelationClass::Meta);
        assert_eq!(registry.classify("uses"), RelationClass::Core);
        assert_eq!(registry.classify("targets"), RelationClass::Core);
        assert_eq!(registry.classify("befriends"), RelationClass::Unknown);
        assert_eq!(registry.classify(ABSTRACT_STIX_CORE_RELATIONSHIP), RelationClass::Unknown);
    }

    #[test]
    fn test_every_type_has_exactly_one_class() {
        let registry = RelationTypeRegistry::standard();
        let meta = registry.types_of(RelationClass::Meta);
        let core = registry.types_of(RelationClass::Core);
        assert_eq!(meta.len(), 6);
        assert_eq!(core.len(), 7);
        assert!(meta.iter().all(|t| !core.contains(t)));
    }

    #[test]
    fn test_hierarchy() {
        let registry = RelationTypeRegistry::standard();
        assert!(registry.is_a("Organization", "Identity"));
        assert!(registry.is_a("Report", ABSTRACT_STIX_CORE_OBJECT));
        assert!(registry.is_a("uses", ABSTRACT_STIX_CORE_RELATIONSHIP));
        assert!(registry.is_a("object-label", ABSTRACT_STIX_META_RELATIONSHIP));
        assert!(!registry.is_a("Label", ABSTRACT_STIX_CORE_OBJECT));
        assert!(!registry.is_a("Malware", "Identity"));
    }

    #[test]
    fn test_leaf_entity_types() {
        let registry = RelationTypeRegistry::standard();
        assert!(registry.is_leaf_entity_type("Malware"));
        assert!(registry.is_leaf_entity_type("Report"));
        assert!(!registry.is_leaf_entity_type("Container"));
        assert!(!registry.is_leaf_entity_type(ENTITY_TYPE_IDENTITY));
        assert!(!registry.is_leaf_entity_type(ABSTRACT_STIX_CORE_OBJECT));
        assert!(!registry.is_leaf_entity_type("uses"));
        assert!(!registry.is_leaf_entity_type("Unheard-Of"));
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let registry = RelationTypeRegistry::standard();
        assert_eq!(
            registry.ancestors("Malware"),
            vec![ABSTRACT_STIX_DOMAIN_OBJECT, ABSTRACT_STIX_CORE_OBJECT, "Stix-Object", "Basic-Object"]
        );
        assert_eq!(
            registry.ancestors("uses"),
            vec![ABSTRACT_STIX_CORE_RELATIONSHIP, ABSTRACT_BASIC_RELATIONSHIP]
        );
        assert!(registry.ancestors(ABSTRACT_BASIC_RELATIONSHIP).is_empty());
        assert!(registry.ancestors("Unheard-Of").is_empty());
    }

    #[test]
    fn test_direction_rules() {
        let registry = RelationTypeRegistry::standard();
        assert!(registry.is_assignable_direction("uses", "Intrusion-Set", "Malware"));
        assert!(!registry.is_assignable_direction("uses", "Malware", "Intrusion-Set"));
        assert!(registry.is_assignable_direction("targets", "Campaign", "Sector"));
        assert!(registry.is_assignable_direction("object-marking", "Report", "Marking-Definition"));
        assert!(registry.is_assignable_direction("object-marking", "uses", "Marking-Definition"));
        assert!(!registry.is_assignable_direction("object-marking", "Report", "Label"));
        assert!(!registry.is_assignable_direction("object", "Malware", "Report"));
        assert!(!registry.is_assignable_direction("befriends", "Malware", "Tool"));
    }

    #[test]
    fn test_check_reports_kind() {
        let registry = RelationTypeRegistry::standard();
        assert!(matches!(
            registry.check("object-label", RelationClass::Core, "Malware", "Label"),
            Err(Error::InvalidRelationType(_))
        ));
        assert!(matches!(
            registry.check("uses", RelationClass::Core, "Tool", "Malware"),
            Err(Error::IllegalDirection { .. })
        ));
        registry.check("uses", RelationClass::Core, "Threat-Actor", "Tool").unwrap();
    }

    #[test]
    fn test_new_relation_type_is_a_data_change() {
        let mut def = TaxonomyDefinition::standard();
        def.relations.push(RelationDefinition {
            relationship_type: "impersonates".into(),
            class: RelationClass::Core,
            rules: vec![DirectionRule {
                from: vec!["Threat-Actor".into()],
                to: vec!["Identity".into()],
            }],
        });
        let json = serde_json::to_string(&def).unwrap();
        let registry = RelationTypeRegistry::from_json(&json).unwrap();
        assert!(registry.is_core("impersonates"));
        assert!(registry.is_assignable_direction("impersonates", "Threat-Actor", "Individual"));
    }

    #[test]
    fn test_duplicate_relation_rejected() {
        let mut def = TaxonomyDefinition::standard();
        def.relations.push(RelationDefinition {
            relationship_type: "uses".into(),
            class: RelationClass::Meta,
            rules: Vec::new(),
        });
        assert!(matches!(
            RelationTypeRegistry::from_definition(def),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_descendants() {
        let registry = RelationTypeRegistry::standard();
        let identities = registry.descendants_of(&["Identity"]);
        assert_eq!(identities, vec!["Identity", "Individual", "Organization", "Sector"]);
    }
}
