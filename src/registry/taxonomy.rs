//! Taxonomy data: the serializable definition the registry is built from,
//! plus the standard STIX-flavoured seed table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::RelationClass;

// ============================================================================
// Abstract types
// ============================================================================

pub const ABSTRACT_BASIC_RELATIONSHIP: &str = "basic-relationship";
pub const ABSTRACT_STIX_CORE_RELATIONSHIP: &str = "stix-core-relationship";
pub const ABSTRACT_STIX_META_RELATIONSHIP: &str = "stix-meta-relationship";

pub const ABSTRACT_STIX_CORE_OBJECT: &str = "Stix-Core-Object";
pub const ABSTRACT_STIX_DOMAIN_OBJECT: &str = "Stix-Domain-Object";
pub const ABSTRACT_STIX_META_OBJECT: &str = "Stix-Meta-Object";

// ============================================================================
// Well-known concrete types
// ============================================================================

pub const RELATION_OBJECT_MARKING: &str = "object-marking";
pub const RELATION_OBJECT_LABEL: &str = "object-label";
pub const RELATION_CREATED_BY: &str = "created-by";
pub const RELATION_OBJECT: &str = "object";
pub const RELATION_KILL_CHAIN_PHASE: &str = "kill-chain-phase";
pub const RELATION_EXTERNAL_REFERENCE: &str = "external-reference";

pub const ENTITY_TYPE_IDENTITY: &str = "Identity";
pub const ENTITY_TYPE_LABEL: &str = "Label";
pub const ENTITY_TYPE_MARKING_DEFINITION: &str = "Marking-Definition";
pub const ENTITY_TYPE_KILL_CHAIN_PHASE: &str = "Kill-Chain-Phase";
pub const ENTITY_TYPE_EXTERNAL_REFERENCE: &str = "External-Reference";
pub const ENTITY_TYPE_CONTAINER_REPORT: &str = "Report";
pub const ENTITY_TYPE_CONTAINER_NOTE: &str = "Note";
pub const ENTITY_TYPE_CONTAINER_OPINION: &str = "Opinion";

// ============================================================================
// Definition
// ============================================================================

/// One permitted (from, to) pairing. Either side may name abstract types;
/// a concrete type matches when it descends from any listed type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionRule {
    pub from: Vec<String>,
    pub to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub class: RelationClass,
    pub rules: Vec<DirectionRule>,
}

/// The full taxonomy as data. Adding a relation type means adding an entry
/// here (or to the JSON a deployment loads), never new code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyDefinition {
    /// Element type → direct parents.
    pub entity_types: BTreeMap<String, Vec<String>>,
    pub relations: Vec<RelationDefinition>,
}

// ============================================================================
// Standard seed table
// ============================================================================

const CORE_OR_RELATION: &[&str] = &[ABSTRACT_STIX_CORE_OBJECT, ABSTRACT_STIX_CORE_RELATIONSHIP];

const ENTITY_HIERARCHY: &[(&str, &[&str])] = &[
    ("Basic-Object", &[]),
    ("Stix-Object", &["Basic-Object"]),
    (ABSTRACT_STIX_CORE_OBJECT, &["Stix-Object"]),
    (ABSTRACT_STIX_META_OBJECT, &["Stix-Object"]),
    (ABSTRACT_STIX_DOMAIN_OBJECT, &[ABSTRACT_STIX_CORE_OBJECT]),
    ("Stix-Cyber-Observable", &[ABSTRACT_STIX_CORE_OBJECT]),
    // Containers
    ("Container", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    (ENTITY_TYPE_CONTAINER_REPORT, &["Container"]),
    (ENTITY_TYPE_CONTAINER_NOTE, &["Container"]),
    (ENTITY_TYPE_CONTAINER_OPINION, &["Container"]),
    ("Observed-Data", &["Container"]),
    // Identities
    (ENTITY_TYPE_IDENTITY, &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Individual", &[ENTITY_TYPE_IDENTITY]),
    ("Organization", &[ENTITY_TYPE_IDENTITY]),
    ("Sector", &[ENTITY_TYPE_IDENTITY]),
    // Locations
    ("Location", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("City", &["Location"]),
    ("Country", &["Location"]),
    ("Region", &["Location"]),
    ("Position", &["Location"]),
    // Other domain objects
    ("Attack-Pattern", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Campaign", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Course-Of-Action", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Indicator", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Infrastructure", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Intrusion-Set", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Malware", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Threat-Actor", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Tool", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("Vulnerability", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    ("X-OpenCTI-Incident", &[ABSTRACT_STIX_DOMAIN_OBJECT]),
    // Observables
    ("Autonomous-System", &["Stix-Cyber-Observable"]),
    ("Domain-Name", &["Stix-Cyber-Observable"]),
    ("Email-Addr", &["Stix-Cyber-Observable"]),
    ("IPv4-Addr", &["Stix-Cyber-Observable"]),
    ("IPv6-Addr", &["Stix-Cyber-Observable"]),
    ("Mac-Addr", &["Stix-Cyber-Observable"]),
    ("StixFile", &["Stix-Cyber-Observable"]),
    ("X509-Certificate", &["Stix-Cyber-Observable"]),
    // Meta objects
    (ENTITY_TYPE_LABEL, &[ABSTRACT_STIX_META_OBJECT]),
    (ENTITY_TYPE_MARKING_DEFINITION, &[ABSTRACT_STIX_META_OBJECT]),
    (ENTITY_TYPE_KILL_CHAIN_PHASE, &[ABSTRACT_STIX_META_OBJECT]),
    (ENTITY_TYPE_EXTERNAL_REFERENCE, &[ABSTRACT_STIX_META_OBJECT]),
];

type RuleRow = (&'static [&'static str], &'static [&'static str]);

const META_RELATIONS: &[(&str, &[RuleRow])] = &[
    (RELATION_OBJECT_MARKING, &[(CORE_OR_RELATION, &[ENTITY_TYPE_MARKING_DEFINITION])]),
    (RELATION_OBJECT_LABEL, &[(CORE_OR_RELATION, &[ENTITY_TYPE_LABEL])]),
    (RELATION_CREATED_BY, &[(CORE_OR_RELATION, &[ENTITY_TYPE_IDENTITY])]),
    (RELATION_KILL_CHAIN_PHASE, &[(CORE_OR_RELATION, &[ENTITY_TYPE_KILL_CHAIN_PHASE])]),
    (RELATION_EXTERNAL_REFERENCE, &[(CORE_OR_RELATION, &[ENTITY_TYPE_EXTERNAL_REFERENCE])]),
    (RELATION_OBJECT, &[(&["Container"], CORE_OR_RELATION)]),
];

const THREATS: &[&str] = &["Threat-Actor", "Intrusion-Set", "Campaign", "X-OpenCTI-Incident"];

const CORE_RELATIONS: &[(&str, &[RuleRow])] = &[
    ("uses", &[
        (THREATS, &["Malware", "Tool", "Attack-Pattern", "Infrastructure"]),
        (&["Malware"], &["Malware", "Tool", "Attack-Pattern", "Infrastructure"]),
    ]),
    ("targets", &[
        (THREATS, &[ENTITY_TYPE_IDENTITY, "Location", "Vulnerability"]),
        (&["Malware", "Attack-Pattern", "Tool"], &[ENTITY_TYPE_IDENTITY, "Location", "Vulnerability"]),
    ]),
    ("indicates", &[
        (&["Indicator"], &[
            "Malware", "Tool", "Attack-Pattern", "Infrastructure",
            "Threat-Actor", "Intrusion-Set", "Campaign", "X-OpenCTI-Incident",
        ]),
    ]),
    ("attributed-to", &[
        (&["Campaign", "Intrusion-Set", "X-OpenCTI-Incident"], &["Threat-Actor", "Intrusion-Set", "Campaign"]),
    ]),
    ("mitigates", &[
        (&["Course-Of-Action"], &["Attack-Pattern", "Malware", "Tool", "Vulnerability", "Indicator"]),
    ]),
    ("located-at", &[
        (&[ENTITY_TYPE_IDENTITY, "Threat-Actor", "Intrusion-Set", "Campaign", "Infrastructure", "Location"], &["Location"]),
    ]),
    ("related-to", &[(&[ABSTRACT_STIX_CORE_OBJECT], &[ABSTRACT_STIX_CORE_OBJECT])]),
];

fn owned(types: &[&str]) -> Vec<String> {
    types.iter().map(|t| t.to_string()).collect()
}

fn relations(class: RelationClass, rows: &[(&str, &[RuleRow])]) -> impl Iterator<Item = RelationDefinition> {
    rows.iter().map(move |(name, rules)| RelationDefinition {
        relationship_type: name.to_string(),
        class,
        rules: rules
            .iter()
            .map(|(from, to)| DirectionRule { from: owned(from), to: owned(to) })
            .collect(),
    })
}

impl TaxonomyDefinition {
    /// The default taxonomy: six meta relations and seven core relations
    /// over the STIX domain object hierarchy.
    pub fn standard() -> Self {
        let entity_types = ENTITY_HIERARCHY
            .iter()
            .map(|(t, parents)| (t.to_string(), owned(parents)))
            .collect();
        let relations = relations(RelationClass::Meta, META_RELATIONS)
            .chain(relations(RelationClass::Core, CORE_RELATIONS))
            .collect();
        Self { entity_types, relations }
    }
}
