//! Topic naming and subscription patterns.
//!
//! Topics are named `<class>.<kind>`, e.g. `core-relationship.added`.

use std::fmt;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Element class a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopicClass {
    CoreRelationship,
    CoreObject,
}

impl TopicClass {
    pub const ALL: [TopicClass; 2] = [TopicClass::CoreRelationship, TopicClass::CoreObject];

    pub fn as_str(self) -> &'static str {
        match self {
            TopicClass::CoreRelationship => "core-relationship",
            TopicClass::CoreObject => "core-object",
        }
    }
}

impl fmt::Display for TopicClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three topics of one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub added: String,
    pub edited: String,
    pub context: String,
}

impl TopicSet {
    fn for_class(class: TopicClass) -> Self {
        Self {
            added: format!("{class}.added"),
            edited: format!("{class}.edited"),
            context: format!("{class}.context"),
        }
    }
}

/// Every topic the bus accepts. Built once and shared by `Arc` with the
/// service, the tracker and the bus.
#[derive(Debug, Clone)]
pub struct TopicRegistry {
    relationship: TopicSet,
    object: TopicSet,
    names: HashSet<String>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        let relationship = TopicSet::for_class(TopicClass::CoreRelationship);
        let object = TopicSet::for_class(TopicClass::CoreObject);
        let names = [&relationship, &object]
            .into_iter()
            .flat_map(|set| [set.added.clone(), set.edited.clone(), set.context.clone()])
            .collect();
        Self { relationship, object, names }
    }

    pub fn topics(&self, class: TopicClass) -> &TopicSet {
        match class {
            TopicClass::CoreRelationship => &self.relationship,
            TopicClass::CoreObject => &self.object,
        }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.names.contains(topic)
    }

    /// Registered topic names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Parse a subscription pattern: an exact topic, `<class>.*`, or `*`.
    pub fn pattern(&self, pattern: &str) -> Result<TopicPattern> {
        if pattern == "*" {
            return Ok(TopicPattern::All);
        }
        if let Some(class) = pattern.strip_suffix(".*") {
            return TopicClass::ALL
                .into_iter()
                .find(|c| c.as_str() == class)
                .map(TopicPattern::Class)
                .ok_or_else(|| Error::InvalidInput(format!("unknown topic class in pattern '{pattern}'")));
        }
        if self.contains(pattern) {
            Ok(TopicPattern::Exact(pattern.to_string()))
        } else {
            Err(Error::InvalidInput(format!("unknown topic '{pattern}'")))
        }
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
    Exact(String),
    Class(TopicClass),
    All,
}

impl TopicPattern {
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Exact(name) => name == topic,
            TopicPattern::Class(class) => topic
                .strip_prefix(class.as_str())
                .is_some_and(|rest| rest.starts_with('.')),
            TopicPattern::All => true,
        }
    }
}
