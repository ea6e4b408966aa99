//! # Graph Query Builder
//!
//! Turns a traversal request into a [`TraversalPlan`]: a side-effect-free,
//! store-agnostic description of three elements to match
//!
//! ```text
//! (anchor {id: $anchor_id}) -[rel:<relation types>]-> (target:<target types>)
//! ```
//!
//! joined through the edge's role bindings. Caller-supplied literals (ids,
//! search terms, bounds) are validated here and carried as named
//! parameters. They never become part of any query text, so escaping is
//! the store adapter's job at a single boundary.
//!
//! Relation-class and abstract target predicates are expanded against the
//! [`RelationTypeRegistry`] at build time, so a store can execute a plan
//! with plain set membership.

use std::cmp::Ordering;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::model::{Direction, Element, PropertyMap, Relationship, Value};
use crate::registry::{RelationClass, RelationTypeRegistry};
use crate::{Error, Result};

// ============================================================================
// Parameters
// ============================================================================

pub const PARAM_ANCHOR_ID: &str = "anchor_id";
pub const PARAM_FROM_ID: &str = "from_id";
pub const PARAM_TO_ID: &str = "to_id";
pub const PARAM_SEARCH: &str = "search";
pub const PARAM_MIN_CONFIDENCE: &str = "min_confidence";
pub const PARAM_MAX_CONFIDENCE: &str = "max_confidence";
pub const PARAM_START_DATE: &str = "start_date";
pub const PARAM_END_DATE: &str = "end_date";

const MAX_ID_LEN: usize = 256;
const MAX_SEARCH_LEN: usize = 512;

/// Validate a caller literal before it enters a plan.
pub fn validate_literal(what: &str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{what} is empty")));
    }
    if value.len() > max_len {
        return Err(Error::InvalidInput(format!("{what} exceeds {max_len} bytes")));
    }
    if value.chars().any(char::is_control) {
        return Err(Error::InvalidInput(format!("{what} contains control characters")));
    }
    Ok(())
}

pub fn validate_id(what: &str, id: &str) -> Result<()> {
    validate_literal(what, id, MAX_ID_LEN)
}

// ============================================================================
// Plan
// ============================================================================

/// Relation-type predicate of a traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationFilter {
    /// Exactly these types. All must share one class.
    Types(Vec<String>),
    /// Every registered type of the class.
    Class(RelationClass),
    /// Explicitly untyped: spans both classes.
    Any,
}

/// What a plan returns per match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraversalTarget {
    /// The far-side element, with the edge as relation context.
    Nodes,
    /// The matched edges themselves.
    Relationships,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    Created,
    Modified,
    Confidence,
    InternalId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderMode {
    #[default]
    Asc,
    Desc,
}

/// Target node predicate: what the caller declared, and the concrete
/// type set it expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePredicate {
    pub declared: Vec<String>,
    pub expanded: Vec<String>,
}

/// A parameterized traversal, ready for a store to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalPlan {
    /// True when `$anchor_id` is bound.
    pub anchored: bool,
    pub direction: Direction,
    /// Concrete relation types to match. Empty means any type.
    pub relation_types: SmallVec<[String; 4]>,
    pub target: Option<TypePredicate>,
    pub returns: TraversalTarget,
    pub allow_self_loops: bool,
    pub include_revoked: bool,
    pub order_by: OrderBy,
    pub order_mode: OrderMode,
    params: PropertyMap,
}

impl TraversalPlan {
    pub fn params(&self) -> &PropertyMap {
        &self.params
    }

    fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    fn param_date(&self, name: &str) -> Option<DateTime<Utc>> {
        self.params.get(name).and_then(Value::as_datetime)
    }

    pub fn anchor_id(&self) -> Option<&str> { self.param_str(PARAM_ANCHOR_ID) }
    pub fn from_id(&self) -> Option<&str> { self.param_str(PARAM_FROM_ID) }
    pub fn to_id(&self) -> Option<&str> { self.param_str(PARAM_TO_ID) }
    pub fn search(&self) -> Option<&str> { self.param_str(PARAM_SEARCH) }
    pub fn start_date(&self) -> Option<DateTime<Utc>> { self.param_date(PARAM_START_DATE) }
    pub fn end_date(&self) -> Option<DateTime<Utc>> { self.param_date(PARAM_END_DATE) }

    /// Same plan with the end-date bound dropped.
    pub fn without_end_date(&self) -> TraversalPlan {
        let mut plan = self.clone();
        plan.params.remove(PARAM_END_DATE);
        plan
    }

    pub fn accepts_relation_type(&self, relationship_type: &str) -> bool {
        self.relation_types.is_empty()
            || self.relation_types.iter().any(|t| t == relationship_type)
    }

    pub fn accepts_target_type(&self, element_type: &str) -> bool {
        self.target
            .as_ref()
            .is_none_or(|p| p.expanded.iter().any(|t| t == element_type))
    }

    /// Attribute-level edge predicate: type, revocation, self-loop,
    /// confidence and created-date bounds. Role bindings are the store's.
    pub fn relation_matches(&self, rel: &Relationship) -> bool {
        if rel.deleted || !self.accepts_relation_type(&rel.relationship_type) {
            return false;
        }
        if rel.revoked && !self.include_revoked {
            return false;
        }
        if rel.is_self_loop() && !self.allow_self_loops {
            return false;
        }
        let confidence = rel.confidence.map(i64::from);
        if let Some(min) = self.params.get(PARAM_MIN_CONFIDENCE).and_then(Value::as_int) {
            if confidence.is_none_or(|c| c < min) {
                return false;
            }
        }
        if let Some(max) = self.params.get(PARAM_MAX_CONFIDENCE).and_then(Value::as_int) {
            if confidence.is_none_or(|c| c > max) {
                return false;
            }
        }
        if self.start_date().is_some_and(|start| rel.created < start) {
            return false;
        }
        if self.end_date().is_some_and(|end| rel.created > end) {
            return false;
        }
        true
    }

    /// Case-insensitive substring match of `$search` against the element
    /// the plan returns. No search term matches everything.
    pub fn search_matches(&self, element: &Element) -> bool {
        let Some(term) = self.search() else {
            return true;
        };
        let term = term.to_lowercase();
        element
            .search_text()
            .iter()
            .any(|text| text.to_lowercase().contains(&term))
    }

    /// Order rows by the plan's key, ties broken by edge internal id so the
    /// order is total and pagination is stable.
    pub fn sort<T>(&self, rows: &mut [T], edge: impl Fn(&T) -> &Relationship) {
        rows.sort_by(|a, b| {
            let (a, b) = (edge(a), edge(b));
            let primary = match self.order_by {
                OrderBy::Created => a.created.cmp(&b.created),
                OrderBy::Modified => a.modified.cmp(&b.modified),
                OrderBy::Confidence => a.confidence.cmp(&b.confidence),
                OrderBy::InternalId => Ordering::Equal,
            };
            let primary = match self.order_mode {
                OrderMode::Asc => primary,
                OrderMode::Desc => primary.reverse(),
            };
            primary.then_with(|| a.internal_id.cmp(&b.internal_id))
        });
    }

    /// Human-readable pattern for logs. Parameters appear by name only.
    pub fn render(&self) -> String {
        let mut out = String::from("MATCH ");
        let anchor = if self.anchored { "(anchor {id: $anchor_id})" } else { "(anchor)" };
        let rel = if self.relation_types.is_empty() {
            "[rel]".to_string()
        } else {
            let types: Vec<String> = self.relation_types.iter().map(|t| format!("`{t}`")).collect();
            format!("[rel:{}]", types.join("|"))
        };
        let target = match &self.target {
            Some(p) => {
                let labels: Vec<String> = p.declared.iter().map(|t| format!("`{t}`")).collect();
                format!("(target:{})", labels.join("|"))
            }
            None => "(target)".to_string(),
        };
        let _ = match self.direction {
            Direction::Outgoing => write!(out, "{anchor}-{rel}->{target}"),
            Direction::Incoming => write!(out, "{anchor}<-{rel}-{target}"),
            Direction::Either => write!(out, "{anchor}-{rel}-{target}"),
        };

        let mut conditions = Vec::new();
        let bound = |name: &str| self.params.contains_key(name);
        if bound(PARAM_FROM_ID) { conditions.push("startNode(rel).id = $from_id".to_string()); }
        if bound(PARAM_TO_ID) { conditions.push("endNode(rel).id = $to_id".to_string()); }
        if bound(PARAM_MIN_CONFIDENCE) { conditions.push("rel.confidence >= $min_confidence".to_string()); }
        if bound(PARAM_MAX_CONFIDENCE) { conditions.push("rel.confidence <= $max_confidence".to_string()); }
        if bound(PARAM_START_DATE) { conditions.push("rel.created >= $start_date".to_string()); }
        if bound(PARAM_END_DATE) { conditions.push("rel.created <= $end_date".to_string()); }
        if bound(PARAM_SEARCH) { conditions.push("result CONTAINS $search".to_string()); }
        if !self.include_revoked { conditions.push("NOT rel.revoked".to_string()); }
        if !self.allow_self_loops { conditions.push("anchor <> target".to_string()); }
        if !conditions.is_empty() {
            let _ = write!(out, " WHERE {}", conditions.join(" AND "));
        }

        let result = match self.returns {
            TraversalTarget::Nodes => "target, rel",
            TraversalTarget::Relationships => "rel",
        };
        let key = match self.order_by {
            OrderBy::Created => "rel.created",
            OrderBy::Modified => "rel.modified",
            OrderBy::Confidence => "rel.confidence",
            OrderBy::InternalId => "rel.internal_id",
        };
        let mode = match self.order_mode {
            OrderMode::Asc => "ASC",
            OrderMode::Desc => "DESC",
        };
        let _ = write!(out, " RETURN {result} ORDER BY {key} {mode}");
        out
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds a [`TraversalPlan`], validating every literal it is given.
#[derive(Debug, Clone)]
pub struct TraversalBuilder<'r> {
    registry: &'r RelationTypeRegistry,
    anchor: Option<String>,
    direction: Direction,
    relation: Option<RelationFilter>,
    target_types: Vec<String>,
    returns: TraversalTarget,
    allow_self_loops: bool,
    include_revoked: bool,
    from_id: Option<String>,
    to_id: Option<String>,
    search: Option<String>,
    min_confidence: Option<i64>,
    max_confidence: Option<i64>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    order_by: OrderBy,
    order_mode: OrderMode,
}

impl<'r> TraversalBuilder<'r> {
    pub fn new(registry: &'r RelationTypeRegistry) -> Self {
        Self {
            registry,
            anchor: None,
            direction: Direction::Outgoing,
            relation: None,
            target_types: Vec::new(),
            returns: TraversalTarget::Nodes,
            allow_self_loops: false,
            include_revoked: true,
            from_id: None,
            to_id: None,
            search: None,
            min_confidence: None,
            max_confidence: None,
            start_date: None,
            end_date: None,
            order_by: OrderBy::default(),
            order_mode: OrderMode::default(),
        }
    }

    pub fn anchor(mut self, id: impl Into<String>, direction: Direction) -> Self {
        self.anchor = Some(id.into());
        self.direction = direction;
        self
    }

    pub fn relation(mut self, filter: RelationFilter) -> Self {
        self.relation = Some(filter);
        self
    }

    pub fn relation_type(self, relationship_type: impl Into<String>) -> Self {
        self.relation(RelationFilter::Types(vec![relationship_type.into()]))
    }

    pub fn target_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.target_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn returning(mut self, returns: TraversalTarget) -> Self {
        self.returns = returns;
        self
    }

    pub fn allow_self_loops(mut self, allow: bool) -> Self {
        self.allow_self_loops = allow;
        self
    }

    pub fn include_revoked(mut self, include: bool) -> Self {
        self.include_revoked = include;
        self
    }

    pub fn from_id(mut self, id: Option<String>) -> Self {
        self.from_id = id;
        self
    }

    pub fn to_id(mut self, id: Option<String>) -> Self {
        self.to_id = id;
        self
    }

    pub fn search(mut self, term: Option<String>) -> Self {
        self.search = term;
        self
    }

    pub fn confidence_range(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min_confidence = min;
        self.max_confidence = max;
        self
    }

    pub fn created_between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn order(mut self, order_by: OrderBy, order_mode: OrderMode) -> Self {
        self.order_by = order_by;
        self.order_mode = order_mode;
        self
    }

    pub fn build(self) -> Result<TraversalPlan> {
        let mut params = PropertyMap::new();

        if let Some(anchor) = &self.anchor {
            validate_id("anchor id", anchor)?;
            params.insert(PARAM_ANCHOR_ID.into(), Value::from(anchor.as_str()));
        }
        if let Some(id) = &self.from_id {
            validate_id("from id", id)?;
            params.insert(PARAM_FROM_ID.into(), Value::from(id.as_str()));
        }
        if let Some(id) = &self.to_id {
            validate_id("to id", id)?;
            params.insert(PARAM_TO_ID.into(), Value::from(id.as_str()));
        }
        if let Some(term) = &self.search {
            validate_literal("search term", term, MAX_SEARCH_LEN)?;
            params.insert(PARAM_SEARCH.into(), Value::from(term.as_str()));
        }
        for (name, bound) in [
            (PARAM_MIN_CONFIDENCE, self.min_confidence),
            (PARAM_MAX_CONFIDENCE, self.max_confidence),
        ] {
            if let Some(bound) = bound {
                crate::model::validate_confidence(bound)?;
                params.insert(name.into(), Value::Int(bound));
            }
        }
        if let (Some(min), Some(max)) = (self.min_confidence, self.max_confidence) {
            if min > max {
                return Err(Error::InvalidInput(format!("confidence range {min}..={max} is empty")));
            }
        }
        if let Some(start) = self.start_date {
            params.insert(PARAM_START_DATE.into(), Value::DateTime(start));
        }
        if let Some(end) = self.end_date {
            params.insert(PARAM_END_DATE.into(), Value::DateTime(end));
        }

        let relation_types = self.expand_relation()?;
        let target = self.expand_target()?;

        Ok(TraversalPlan {
            anchored: self.anchor.is_some(),
            direction: self.direction,
            relation_types,
            target,
            returns: self.returns,
            allow_self_loops: self.allow_self_loops,
            include_revoked: self.include_revoked,
            order_by: self.order_by,
            order_mode: self.order_mode,
            params,
        })
    }

    fn expand_relation(&self) -> Result<SmallVec<[String; 4]>> {
        // No predicate means core relations only; spanning both classes
        // takes an explicit `RelationFilter::Any`.
        let filter = self
            .relation
            .clone()
            .unwrap_or(RelationFilter::Class(RelationClass::Core));
        match filter {
            RelationFilter::Any => Ok(SmallVec::new()),
            RelationFilter::Class(RelationClass::Unknown) => Err(Error::InvalidRelationType(
                "cannot traverse the unknown relation class".into(),
            )),
            RelationFilter::Class(class) => Ok(self.registry.types_of(class).into_iter().collect()),
            RelationFilter::Types(types) => {
                if types.is_empty() {
                    return Err(Error::InvalidRelationType("empty relation type list".into()));
                }
                let first = self.registry.classify(&types[0]);
                for ty in &types {
                    match self.registry.classify(ty) {
                        RelationClass::Unknown => {
                            return Err(Error::InvalidRelationType(format!("unknown relation type '{ty}'")));
                        }
                        class if class != first => {
                            return Err(Error::InvalidRelationType(format!(
                                "relation types {types:?} mix meta and core classes"
                            )));
                        }
                        _ => {}
                    }
                }
                Ok(types.into_iter().collect())
            }
        }
    }

    fn expand_target(&self) -> Result<Option<TypePredicate>> {
        if self.target_types.is_empty() {
            return Ok(None);
        }
        for ty in &self.target_types {
            if !self.registry.is_known_type(ty) {
                return Err(Error::InvalidInput(format!("unknown target type '{ty}'")));
            }
        }
        Ok(Some(TypePredicate {
            declared: self.target_types.clone(),
            expanded: self.registry.descendants_of(self.target_types.as_slice()),
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
