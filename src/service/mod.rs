//! # Relationship Service
//!
//! CRUD and traversal reads over relationships. Writes are validated
//! against the [`RelationTypeRegistry`], applied as one store mutation in
//! one `ReadWrite` transaction, and only then announced on the bus:
//!
//! ```text
//! validate ──▶ begin_tx ──▶ mutate ──▶ commit ──▶ publish (best effort)
//!                                │
//!                                └─ error ──▶ rollback, nothing published
//! ```
//!
//! A publish failure after a commit is logged and dropped; the mutation
//! stands. Reads build a [`TraversalPlan`], execute it, and window the
//! result with the paginator.

pub mod input;

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::bus::{topic_class_of, EventKind, EventPayload, NotificationBus, TopicClass, TopicRegistry};
use crate::config::CoreConfig;
use crate::model::ids::{is_internal_id, is_stix_id, new_stix_id};
use crate::model::*;
use crate::pagination::{paginate, paginate_with_context, Connection};
use crate::planner::{validate_id, RelationFilter, TraversalBuilder, TraversalPlan, TraversalTarget};
use crate::registry::*;
use crate::storage::{finish_tx, GraphStore, TraversalRow};
use crate::tx::TxMode;
use crate::{Error, Result};
pub use input::{Counts, MetaInput, RelationshipFilter, RelationshipInput, ScopeArgs};

pub struct RelationshipService<B: GraphStore> {
    store: Arc<B>,
    registry: Arc<RelationTypeRegistry>,
    topics: Arc<TopicRegistry>,
    bus: Arc<NotificationBus>,
    config: Arc<CoreConfig>,
}

impl<B: GraphStore> RelationshipService<B> {
    pub fn new(
        store: Arc<B>,
        registry: Arc<RelationTypeRegistry>,
        topics: Arc<TopicRegistry>,
        bus: Arc<NotificationBus>,
        config: Arc<CoreConfig>,
    ) -> Self {
        Self { store, registry, topics, bus, config }
    }

    pub fn registry(&self) -> &RelationTypeRegistry {
        &self.registry
    }

    // ========================================================================
    // Relationship reads
    // ========================================================================

    /// List live relationships matching the filter, one page at a time. Without
    /// a type filter only core relationships are listed.
    #[instrument(skip(self, filter))]
    pub async fn find_all(&self, filter: &RelationshipFilter) -> Result<Connection<Relationship>> {
        let (offset, limit) = filter.page.resolve(&self.config)?;
        let plan = self.listing_plan(filter)?;
        let rows = self.run(&plan).await?;
        let relationships = rows.into_iter().map(|row| row.relation).collect();
        Ok(paginate(relationships, offset, Some(limit)))
    }

    /// Look up a core relationship by internal or stix id. Any other id
    /// form is treated as a derived id and resolved through the store's
    /// inference path.
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: &str) -> Result<Relationship> {
        validate_id("relationship id", id)?;
        if !is_stix_id(id) && !is_internal_id(id) {
            let tx = self.store.begin_tx(TxMode::ReadOnly).await?;
            let inferred = self.store.get_inferred_relationship(&tx, id).await;
            let inferred = finish_tx(self.store.as_ref(), tx, inferred).await?;
            debug!(found = inferred.is_some(), "inferred lookup");
            return inferred.ok_or_else(|| Error::NotFound(format!("inferred relationship {id}")));
        }
        self.load_core_relationship(id).await
    }

    /// Relationships whose `from` end is `element_id`.
    pub async fn relations_of(&self, element_id: &str, filter: &RelationshipFilter) -> Result<Connection<Relationship>> {
        let filter = RelationshipFilter { from_id: Some(element_id.to_string()), ..filter.clone() };
        self.find_all(&filter).await
    }

    /// Count core relationships in scope. `count` applies every bound;
    /// `total` drops `end_date` and keeps the rest.
    #[instrument(skip(self, scope))]
    pub async fn counts_by_scope(&self, scope: &ScopeArgs) -> Result<Counts> {
        let plan = TraversalBuilder::new(&self.registry)
            .relation(self.core_filter(scope.relationship_type.as_deref())?)
            .returning(TraversalTarget::Relationships)
            .allow_self_loops(true)
            .from_id(scope.from_id.clone())
            .to_id(scope.to_id.clone())
            .target_types(scope.to_types.iter().cloned())
            .created_between(scope.start_date, scope.end_date)
            .build()?;
        let unbounded = plan.without_end_date();

        let tx = self.store.begin_tx(TxMode::ReadOnly).await?;
        let counts = self.count_both(&tx, &plan, &unbounded).await;
        finish_tx(self.store.as_ref(), tx, counts).await
    }

    async fn count_both(&self, tx: &B::Tx, plan: &TraversalPlan, unbounded: &TraversalPlan) -> Result<Counts> {
        let count = self.store.count(tx, plan).await?;
        let total = self.store.count(tx, unbounded).await?;
        debug!(count, total, "scope counted");
        Ok(Counts { count, total })
    }

    // ========================================================================
    // Meta traversals
    // ========================================================================

    /// The identity that authored an element, if recorded.
    #[instrument(skip(self))]
    pub async fn created_by(&self, id: &str) -> Result<Option<Entity>> {
        let rows = self
            .meta_rows(id, RELATION_CREATED_BY, ENTITY_TYPE_IDENTITY, Direction::Outgoing)
            .await?;
        Ok(rows.into_iter().find_map(|row| row.node.into_entity()))
    }

    pub async fn reports(&self, id: &str) -> Result<Connection<Entity>> {
        self.meta_list(id, RELATION_OBJECT, ENTITY_TYPE_CONTAINER_REPORT, Direction::Incoming).await
    }

    pub async fn notes(&self, id: &str) -> Result<Connection<Entity>> {
        self.meta_list(id, RELATION_OBJECT, ENTITY_TYPE_CONTAINER_NOTE, Direction::Incoming).await
    }

    pub async fn opinions(&self, id: &str) -> Result<Connection<Entity>> {
        self.meta_list(id, RELATION_OBJECT, ENTITY_TYPE_CONTAINER_OPINION, Direction::Incoming).await
    }

    pub async fn labels(&self, id: &str) -> Result<Connection<Entity>> {
        self.meta_list(id, RELATION_OBJECT_LABEL, ENTITY_TYPE_LABEL, Direction::Outgoing).await
    }

    pub async fn marking_definitions(&self, id: &str) -> Result<Connection<Entity>> {
        self.meta_list(id, RELATION_OBJECT_MARKING, ENTITY_TYPE_MARKING_DEFINITION, Direction::Outgoing).await
    }

    pub async fn kill_chain_phases(&self, id: &str) -> Result<Connection<Entity>> {
        self.meta_list(id, RELATION_KILL_CHAIN_PHASE, ENTITY_TYPE_KILL_CHAIN_PHASE, Direction::Outgoing).await
    }

    pub async fn external_references(&self, id: &str) -> Result<Connection<Entity>> {
        self.meta_list(id, RELATION_EXTERNAL_REFERENCE, ENTITY_TYPE_EXTERNAL_REFERENCE, Direction::Outgoing).await
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create a core relationship and announce it on
    /// `core-relationship.added`.
    #[instrument(skip(self, actor, input), fields(actor = %actor.id, relationship_type = %input.relationship_type))]
    pub async fn create(&self, actor: &Actor, input: RelationshipInput) -> Result<Relationship> {
        match self.registry.classify(&input.relationship_type) {
            RelationClass::Core => {}
            RelationClass::Meta => {
                return Err(Error::InvalidRelationType(format!(
                    "'{}' is a meta relation, attach it to its owner instead",
                    input.relationship_type
                )));
            }
            RelationClass::Unknown => {
                return Err(Error::InvalidRelationType(format!(
                    "unknown relation type '{}'",
                    input.relationship_type
                )));
            }
        }
        validate_id("from id", &input.from_id)?;
        validate_id("to id", &input.to_id)?;
        let confidence = input.confidence.map(validate_confidence).transpose()?;
        let stix_id = match input.stix_id {
            Some(id) if is_stix_id(&id) => id,
            Some(id) => return Err(Error::InvalidInput(format!("malformed stix id '{id}'"))),
            None => new_stix_id("relationship"),
        };

        let from = self.load_element(&input.from_id).await?;
        let to = self.load_element(&input.to_id).await?;
        self.registry
            .check(&input.relationship_type, RelationClass::Core, from.element_type(), to.element_type())?;

        let mut rel = Relationship::new(
            input.relationship_type,
            (from.internal_id(), from.element_type()),
            (to.internal_id(), to.element_type()),
        );
        rel.stix_id = Some(stix_id);
        rel.confidence = confidence;
        rel.description = input.description;
        rel.revoked = input.revoked;
        rel.attributes = input.attributes;

        let mut tx = self.store.begin_tx(TxMode::ReadWrite).await?;
        let outcome = self.store.create_relationship(&mut tx, rel).await;
        let created = finish_tx(self.store.as_ref(), tx, outcome).await?;
        info!(internal_id = %created.internal_id, from = %created.from_id, to = %created.to_id, "relationship created");

        let topic = &self.topics.topics(TopicClass::CoreRelationship).added;
        self.notify(topic, EventKind::Added, created.clone(), actor);
        Ok(created)
    }

    /// Logically delete a core relationship. Publishes nothing. Returns the
    /// deleted relationship's internal id.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn delete(&self, actor: &Actor, id: &str) -> Result<String> {
        let rel = self.load_core_relationship(id).await?;

        let mut tx = self.store.begin_tx(TxMode::ReadWrite).await?;
        let outcome = self.store.delete_relationship(&mut tx, &rel.internal_id).await;
        let deleted = finish_tx(self.store.as_ref(), tx, outcome).await?;
        if !deleted {
            return Err(Error::ConflictingWrite(format!(
                "relationship {} was deleted concurrently",
                rel.internal_id
            )));
        }
        info!(internal_id = %rel.internal_id, "relationship deleted");
        Ok(rel.internal_id)
    }

    /// Update one attribute and announce the refreshed record on
    /// `core-relationship.edited`.
    #[instrument(skip(self, actor, patch), fields(actor = %actor.id, key = %patch.key))]
    pub async fn edit_field(&self, actor: &Actor, id: &str, patch: FieldPatch) -> Result<Relationship> {
        patch.validate()?;
        let rel = self.load_core_relationship(id).await?;

        let mut tx = self.store.begin_tx(TxMode::ReadWrite).await?;
        let outcome = self.store.update_relationship(&mut tx, &rel.internal_id, &patch).await;
        let updated = finish_tx(self.store.as_ref(), tx, outcome).await?;
        info!(internal_id = %updated.internal_id, "relationship edited");

        let topic = &self.topics.topics(TopicClass::CoreRelationship).edited;
        self.notify(topic, EventKind::Edited, updated.clone(), actor);
        Ok(updated)
    }

    /// Hang a meta relation off an element (`from = id`). Publishes the new
    /// edge on the owner's `edited` topic. Attaching an edge that already
    /// exists returns it unchanged and publishes nothing.
    #[instrument(skip(self, actor, meta), fields(actor = %actor.id, relationship_type = %meta.relationship_type))]
    pub async fn attach_meta(&self, actor: &Actor, id: &str, meta: MetaInput) -> Result<Relationship> {
        let owner = self.load_element(id).await?;
        self.require_meta(&meta.relationship_type, "attached")?;
        validate_id("to id", &meta.to_id)?;
        let target = self.load_element(&meta.to_id).await?;
        self.registry.check(
            &meta.relationship_type,
            RelationClass::Meta,
            owner.element_type(),
            target.element_type(),
        )?;

        let rel = Relationship::new(
            meta.relationship_type,
            (owner.internal_id(), owner.element_type()),
            (target.internal_id(), target.element_type()),
        );
        let mut tx = self.store.begin_tx(TxMode::ReadWrite).await?;
        let outcome = self.store.merge_relationship(&mut tx, rel).await;
        let (created, is_new) = finish_tx(self.store.as_ref(), tx, outcome).await?;
        if !is_new {
            debug!(owner = %owner.internal_id(), internal_id = %created.internal_id, "meta relation already present");
            return Ok(created);
        }
        info!(owner = %owner.internal_id(), to = %created.to_id, "meta relation attached");

        let topic = &self.topics.topics(topic_class_of(&owner)).edited;
        self.notify(topic, EventKind::Edited, created.clone(), actor);
        Ok(created)
    }

    /// Remove every `relationship_type` meta edge from the element to
    /// `to_id`. Publishes the owner's refreshed state on its `edited` topic,
    /// also when there was nothing to remove.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn detach_meta(&self, actor: &Actor, id: &str, to_id: &str, relationship_type: &str) -> Result<Element> {
        let owner = self.load_element(id).await?;
        self.require_meta(relationship_type, "detached")?;
        validate_id("to id", to_id)?;

        let mut tx = self.store.begin_tx(TxMode::ReadWrite).await?;
        let outcome = self
            .store
            .delete_relationships_between(&mut tx, owner.internal_id(), to_id, relationship_type)
            .await;
        let removed = finish_tx(self.store.as_ref(), tx, outcome).await?;
        info!(owner = %owner.internal_id(), removed, "meta relation detached");

        let owner = self.load_element(owner.internal_id()).await?;
        let topic = &self.topics.topics(topic_class_of(&owner)).edited;
        self.notify(topic, EventKind::Edited, owner.clone(), actor);
        Ok(owner)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Announce a committed write. The write already happened, so a bus
    /// failure is logged and dropped.
    fn notify(&self, topic: &str, kind: EventKind, payload: impl Into<EventPayload>, actor: &Actor) {
        if let Err(err) = self.bus.publish(topic, kind, payload, actor) {
            warn!(topic, error = %err, "notification dropped after commit");
        }
    }

    fn require_meta(&self, relationship_type: &str, verb: &str) -> Result<()> {
        if self.registry.is_meta(relationship_type) {
            Ok(())
        } else {
            Err(Error::InvalidRelationType(format!(
                "only {ABSTRACT_STIX_META_RELATIONSHIP} types can be {verb} through this method, got '{relationship_type}'"
            )))
        }
    }

    /// Relation predicate for listings: any named known type, or every core
    /// type when none is given.
    fn listing_filter(&self, relationship_type: Option<&str>) -> Result<RelationFilter> {
        let Some(ty) = relationship_type else {
            return Ok(RelationFilter::Class(RelationClass::Core));
        };
        if ty == ABSTRACT_STIX_CORE_RELATIONSHIP {
            return Ok(RelationFilter::Class(RelationClass::Core));
        }
        match self.registry.classify(ty) {
            RelationClass::Core | RelationClass::Meta => Ok(RelationFilter::Types(vec![ty.to_string()])),
            RelationClass::Unknown => Err(Error::InvalidRelationType(format!("unknown relation type '{ty}'"))),
        }
    }

    /// Relation predicate for counts: a named core type, or all of them.
    fn core_filter(&self, relationship_type: Option<&str>) -> Result<RelationFilter> {
        let Some(ty) = relationship_type else {
            return Ok(RelationFilter::Class(RelationClass::Core));
        };
        if ty == ABSTRACT_STIX_CORE_RELATIONSHIP {
            return Ok(RelationFilter::Class(RelationClass::Core));
        }
        match self.registry.classify(ty) {
            RelationClass::Core => Ok(RelationFilter::Types(vec![ty.to_string()])),
            RelationClass::Meta => Err(Error::InvalidRelationType(format!(
                "'{ty}' is a meta relation, list it through its owner"
            ))),
            RelationClass::Unknown => Err(Error::InvalidRelationType(format!("unknown relation type '{ty}'"))),
        }
    }

    fn listing_plan(&self, filter: &RelationshipFilter) -> Result<TraversalPlan> {
        TraversalBuilder::new(&self.registry)
            .relation(self.listing_filter(filter.relationship_type.as_deref())?)
            .returning(TraversalTarget::Relationships)
            .allow_self_loops(true)
            .include_revoked(!filter.exclude_revoked)
            .from_id(filter.from_id.clone())
            .to_id(filter.to_id.clone())
            .target_types(filter.to_types.iter().cloned())
            .search(filter.search.clone())
            .confidence_range(filter.min_confidence, filter.max_confidence)
            .created_between(filter.start_date, filter.end_date)
            .order(filter.order_by, filter.order_mode)
            .build()
    }

    async fn run(&self, plan: &TraversalPlan) -> Result<Vec<TraversalRow>> {
        debug!(plan = %plan.render(), "executing traversal");
        let tx = self.store.begin_tx(TxMode::ReadOnly).await?;
        let rows = self.store.execute(&tx, plan).await;
        let rows = finish_tx(self.store.as_ref(), tx, rows).await?;
        debug!(rows = rows.len(), "traversal done");
        Ok(rows)
    }

    async fn meta_rows(
        &self,
        id: &str,
        relationship_type: &str,
        target_type: &str,
        direction: Direction,
    ) -> Result<Vec<TraversalRow>> {
        let plan = TraversalBuilder::new(&self.registry)
            .anchor(id, direction)
            .relation_type(relationship_type)
            .target_types([target_type])
            .build()?;
        self.run(&plan).await
    }

    /// Embedded meta list: the whole set, each node with its relation.
    async fn meta_list(
        &self,
        id: &str,
        relationship_type: &str,
        target_type: &str,
        direction: Direction,
    ) -> Result<Connection<Entity>> {
        let rows = self.meta_rows(id, relationship_type, target_type, direction).await?;
        let nodes = rows
            .into_iter()
            .filter_map(|row| {
                let context = row.relation.meta();
                row.node.into_entity().map(|entity| (entity, Some(context)))
            })
            .collect();
        Ok(paginate_with_context(nodes, 0, None))
    }

    async fn load_element(&self, id: &str) -> Result<Element> {
        validate_id("element id", id)?;
        let tx = self.store.begin_tx(TxMode::ReadOnly).await?;
        let element = self.store.get_element(&tx, id).await;
        let element = finish_tx(self.store.as_ref(), tx, element).await?;
        element.ok_or_else(|| Error::NotFound(format!("element {id}")))
    }

    async fn load_core_relationship(&self, id: &str) -> Result<Relationship> {
        validate_id("relationship id", id)?;
        let tx = self.store.begin_tx(TxMode::ReadOnly).await?;
        let rel = self.store.get_relationship(&tx, id).await;
        let rel = finish_tx(self.store.as_ref(), tx, rel).await?;
        rel.filter(|r| self.registry.is_core(&r.relationship_type))
            .ok_or_else(|| Error::NotFound(format!("{ABSTRACT_STIX_CORE_RELATIONSHIP} {id}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
