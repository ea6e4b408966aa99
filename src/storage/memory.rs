//! In-memory graph store.
//!
//! This is the reference implementation of `GraphStore`. The whole graph
//! sits behind one `RwLock`, so every mutation is atomic and readers never
//! observe a half-written edge.
//!
//! ## Limitations
//!
//! - **No real transactions**: a transaction is a marker. Each mutation is
//!   applied when called; `rollback_tx()` does NOT undo it. The core never
//!   performs more than one mutation per transaction, so this is enough.
//! - **Logical deletes only**: deleted records stay in memory, flagged.
//! - **Full scans** for unanchored traversals; anchored traversals use the
//!   adjacency index.
//!
//! Use this store for:
//! - Testing the service, the planner and the paginator
//! - Embedding the core in applications that don't need persistence

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::model::*;
use crate::planner::{TraversalPlan, TraversalTarget};
use crate::tx::{Transaction, TxId, TxMode};
use crate::{Error, Result};
use super::{GraphStore, TraversalRow};

// ============================================================================
// MemoryStore
// ============================================================================

pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    graph: RwLock<MemoryGraph>,
    /// Flip to false to simulate an unreachable store.
    available: AtomicBool,
    next_tx_id: AtomicU64,
}

#[derive(Default)]
struct MemoryGraph {
    entities: HashMap<String, Entity>,
    relationships: HashMap<String, Relationship>,
    /// stix id → internal id, for entities and relationships alike
    stix_index: HashMap<String, String>,
    /// element internal id → ids of relationships touching it
    adjacency: HashMap<String, Vec<String>>,
    /// derived id → relationship produced by an inference engine
    inferred: HashMap<String, Relationship>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                graph: RwLock::new(MemoryGraph::default()),
                available: AtomicBool::new(true),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    /// Toggle simulated availability. While unavailable every call fails
    /// with `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Register a relationship reachable only through its derived id.
    pub fn insert_inferred(&self, derived_id: impl Into<String>, rel: Relationship) {
        self.inner.graph.write().inferred.insert(derived_id.into(), rel);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store is offline".into()))
        }
    }

    fn ensure_writable(&self, tx: &MemoryTx) -> Result<()> {
        self.ensure_available()?;
        if tx.is_writable() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!("{} is read-only", tx.id)))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    /// Clones share the same graph.
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

// ============================================================================
// Graph helpers (called with the lock held)
// ============================================================================

impl MemoryGraph {
    fn resolve_id<'a>(&'a self, id: &'a str) -> &'a str {
        self.stix_index.get(id).map(String::as_str).unwrap_or(id)
    }

    fn element(&self, id: &str) -> Option<Element> {
        let id = self.resolve_id(id);
        self.entities
            .get(id)
            .map(|e| Element::Entity(e.clone()))
            .or_else(|| self.relationships.get(id).map(|r| Element::Relationship(r.clone())))
            .filter(|element| !element.is_deleted())
    }

    /// The live `relationship_type` edge from `from_id` to `to_id`, if any.
    fn live_edge_between(&self, from_id: &str, to_id: &str, relationship_type: &str) -> Option<&Relationship> {
        self.adjacency
            .get(from_id)?
            .iter()
            .filter_map(|rid| self.relationships.get(rid))
            .find(|rel| {
                !rel.deleted
                    && rel.from_id == from_id
                    && rel.to_id == to_id
                    && rel.relationship_type == relationship_type
            })
    }

    fn insert_relationship(&mut self, rel: Relationship) -> Result<Relationship> {
        // The caller validated both ends; a missing end now means a
        // concurrent delete won the race.
        for end in [&rel.from_id, &rel.to_id] {
            if !self.is_live(end) {
                return Err(Error::ConflictingWrite(format!(
                    "element {end} was deleted before relationship {} could be created",
                    rel.internal_id
                )));
            }
        }
        if self.relationships.contains_key(&rel.internal_id) {
            return Err(Error::ConflictingWrite(format!("relationship {} already exists", rel.internal_id)));
        }
        self.claim_stix_id(rel.stix_id.as_deref(), &rel.internal_id)?;

        self.adjacency.entry(rel.from_id.clone()).or_default().push(rel.internal_id.clone());
        if !rel.is_self_loop() {
            self.adjacency.entry(rel.to_id.clone()).or_default().push(rel.internal_id.clone());
        }
        // Relationships are elements too: meta relations may hang off them.
        self.adjacency.entry(rel.internal_id.clone()).or_default();
        self.relationships.insert(rel.internal_id.clone(), rel.clone());
        Ok(rel)
    }

    fn is_live(&self, id: &str) -> bool {
        let id = self.resolve_id(id);
        self.entities.get(id).is_some_and(|e| !e.deleted)
            || self.relationships.get(id).is_some_and(|r| !r.deleted)
    }

    fn claim_stix_id(&mut self, stix_id: Option<&str>, internal_id: &str) -> Result<()> {
        let Some(stix_id) = stix_id else {
            return Ok(());
        };
        if self.stix_index.contains_key(stix_id) {
            return Err(Error::ConflictingWrite(format!("stix id {stix_id} is already taken")));
        }
        self.stix_index.insert(stix_id.to_string(), internal_id.to_string());
        Ok(())
    }

    /// Candidate edges for a plan: the anchor's adjacency when anchored,
    /// a role end's adjacency when one is bound, otherwise every edge.
    fn candidates(&self, plan: &TraversalPlan) -> Vec<&Relationship> {
        let pivot = plan.anchor_id().or(plan.from_id()).or(plan.to_id());
        match pivot {
            Some(id) => self
                .adjacency
                .get(self.resolve_id(id))
                .map(|ids| ids.iter().filter_map(|rid| self.relationships.get(rid)).collect())
                .unwrap_or_default(),
            None => self.relationships.values().collect(),
        }
    }

    fn execute(&self, plan: &TraversalPlan) -> Vec<TraversalRow> {
        let anchor = plan.anchor_id().map(|id| self.resolve_id(id));
        let from = plan.from_id().map(|id| self.resolve_id(id));
        let to = plan.to_id().map(|id| self.resolve_id(id));

        let mut rows = Vec::new();
        for rel in self.candidates(plan) {
            if !plan.relation_matches(rel) {
                continue;
            }
            if from.is_some_and(|f| rel.from_id != f) || to.is_some_and(|t| rel.to_id != t) {
                continue;
            }
            // Role binding: which end is the target.
            let target_id = match (anchor, plan.direction) {
                (None, _) => rel.to_id.as_str(),
                (Some(a), Direction::Outgoing) if rel.from_id == a => rel.to_id.as_str(),
                (Some(a), Direction::Incoming) if rel.to_id == a => rel.from_id.as_str(),
                (Some(a), Direction::Either) => match rel.other_end(a) {
                    Some(other) => other,
                    None => continue,
                },
                _ => continue,
            };
            // Both ends must be live; soft-deleted elements drop out.
            let source_id = rel.other_end(target_id).unwrap_or(target_id);
            if !self.is_live(source_id) {
                continue;
            }
            let Some(target) = self.element(target_id) else {
                continue;
            };
            if !plan.accepts_target_type(target.element_type()) {
                continue;
            }
            let node = match plan.returns {
                TraversalTarget::Nodes => target,
                TraversalTarget::Relationships => Element::Relationship(rel.clone()),
            };
            if !plan.search_matches(&node) {
                continue;
            }
            rows.push(TraversalRow { relation: rel.clone(), node });
        }
        plan.sort(&mut rows, |row| &row.relation);
        rows
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// In-memory transaction (a marker, no MVCC).
#[derive(Debug)]
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

// ============================================================================
// GraphStore impl
// ============================================================================

#[async_trait]
impl GraphStore for MemoryStore {
    type Tx = MemoryTx;

    async fn shutdown(&self) -> Result<()> { Ok(()) }

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        self.ensure_available()?;
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        Ok(MemoryTx { id, mode })
    }

    /// No-op: writes are applied when called.
    async fn commit_tx(&self, _tx: MemoryTx) -> Result<()> {
        self.ensure_available()
    }

    /// WARNING: No-op. A mutation applied in this transaction is NOT reverted.
    async fn rollback_tx(&self, _tx: MemoryTx) -> Result<()> { Ok(()) }

    // ========================================================================
    // Elements
    // ========================================================================

    async fn create_entity(&self, tx: &mut MemoryTx, entity: Entity) -> Result<Entity> {
        self.ensure_writable(tx)?;
        let mut graph = self.inner.graph.write();
        if graph.entities.contains_key(&entity.internal_id) {
            return Err(Error::ConflictingWrite(format!("entity {} already exists", entity.internal_id)));
        }
        graph.claim_stix_id(entity.stix_id.as_deref(), &entity.internal_id)?;
        graph.adjacency.insert(entity.internal_id.clone(), Vec::new());
        graph.entities.insert(entity.internal_id.clone(), entity.clone());
        Ok(entity)
    }

    async fn get_element(&self, _tx: &MemoryTx, id: &str) -> Result<Option<Element>> {
        self.ensure_available()?;
        Ok(self.inner.graph.read().element(id))
    }

    // ========================================================================
    // Relationship mutations
    // ========================================================================

    async fn create_relationship(&self, tx: &mut MemoryTx, rel: Relationship) -> Result<Relationship> {
        self.ensure_writable(tx)?;
        self.inner.graph.write().insert_relationship(rel)
    }

    async fn merge_relationship(&self, tx: &mut MemoryTx, rel: Relationship) -> Result<(Relationship, bool)> {
        self.ensure_writable(tx)?;
        let mut graph = self.inner.graph.write();
        if let Some(existing) = graph.live_edge_between(&rel.from_id, &rel.to_id, &rel.relationship_type) {
            return Ok((existing.clone(), false));
        }
        Ok((graph.insert_relationship(rel)?, true))
    }

    async fn update_relationship(
        &self,
        tx: &mut MemoryTx,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<Relationship> {
        self.ensure_writable(tx)?;
        let mut graph = self.inner.graph.write();
        let internal_id = graph.resolve_id(id).to_string();
        let rel = graph
            .relationships
            .get_mut(&internal_id)
            .filter(|r| !r.deleted)
            .ok_or_else(|| Error::ConflictingWrite(format!("relationship {id} was deleted before the update")))?;
        rel.apply(patch, Utc::now())?;
        Ok(rel.clone())
    }

    async fn delete_relationship(&self, tx: &mut MemoryTx, id: &str) -> Result<bool> {
        self.ensure_writable(tx)?;
        let mut graph = self.inner.graph.write();
        let internal_id = graph.resolve_id(id).to_string();
        match graph.relationships.get_mut(&internal_id) {
            Some(rel) if !rel.deleted => {
                rel.deleted = true;
                rel.modified = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_relationships_between(
        &self,
        tx: &mut MemoryTx,
        from_id: &str,
        to_id: &str,
        relationship_type: &str,
    ) -> Result<usize> {
        self.ensure_writable(tx)?;
        let mut graph = self.inner.graph.write();
        let from = graph.resolve_id(from_id).to_string();
        let to = graph.resolve_id(to_id).to_string();
        let ids = graph.adjacency.get(&from).cloned().unwrap_or_default();
        let now = Utc::now();
        let mut deleted = 0;
        for rid in ids {
            if let Some(rel) = graph.relationships.get_mut(&rid) {
                if !rel.deleted
                    && rel.from_id == from
                    && rel.to_id == to
                    && rel.relationship_type == relationship_type
                {
                    rel.deleted = true;
                    rel.modified = now;
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn get_inferred_relationship(&self, _tx: &MemoryTx, id: &str) -> Result<Option<Relationship>> {
        self.ensure_available()?;
        Ok(self.inner.graph.read().inferred.get(id).cloned())
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    async fn execute(&self, _tx: &MemoryTx, plan: &TraversalPlan) -> Result<Vec<TraversalRow>> {
        self.ensure_available()?;
        Ok(self.inner.graph.read().execute(plan))
    }

    async fn relationship_count(&self, _tx: &MemoryTx) -> Result<u64> {
        self.ensure_available()?;
        let graph = self.inner.graph.read();
        Ok(graph.relationships.values().filter(|r| !r.deleted).count() as u64)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::TraversalBuilder;
    use crate::registry::RelationTypeRegistry;

    async fn entity(db: &MemoryStore, ty: &str) -> Entity {
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        db.create_entity(&mut tx, Entity::new(ty)).await.unwrap()
    }

    async fn link(db: &MemoryStore, ty: &str, from: &Entity, to: &Entity) -> Relationship {
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let rel = Relationship::new(
            ty,
            (&from.internal_id, &from.entity_type),
            (&to.internal_id, &to.entity_type),
        );
        db.create_relationship(&mut tx, rel).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_by_either_id() {
        let db = MemoryStore::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let stix = "malware--6a4b4c40-4f0b-4e73-9f6e-7f0c1c3b2a11";
        let created = db
            .create_entity(&mut tx, Entity::new("Malware").with_stix_id(stix))
            .await
            .unwrap();

        let by_internal = db.get_entity(&tx, &created.internal_id).await.unwrap().unwrap();
        let by_stix = db.get_entity(&tx, stix).await.unwrap().unwrap();
        assert_eq!(by_internal, by_stix);
    }

    #[tokio::test]
    async fn test_duplicate_stix_id_conflicts() {
        let db = MemoryStore::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let stix = "tool--0c8a2f0e-1f3a-4b43-8a51-3d7a4f1c9e10";
        db.create_entity(&mut tx, Entity::new("Tool").with_stix_id(stix)).await.unwrap();
        let err = db
            .create_entity(&mut tx, Entity::new("Tool").with_stix_id(stix))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingWrite(_)));
    }

    #[tokio::test]
    async fn test_relationship_to_deleted_end_conflicts() {
        let db = MemoryStore::new();
        let a = entity(&db, "Campaign").await;
        let b = entity(&db, "Tool").await;
        let rel = link(&db, "uses", &a, &b).await;

        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        assert!(db.delete_relationship(&mut tx, &rel.internal_id).await.unwrap());

        // A meta edge hanging off the deleted relationship must be refused.
        let marking = entity(&db, "Marking-Definition").await;
        let meta = Relationship::new(
            "object-marking",
            (&rel.internal_id, "uses"),
            (&marking.internal_id, "Marking-Definition"),
        );
        let err = db.create_relationship(&mut tx, meta).await.unwrap_err();
        assert!(matches!(err, Error::ConflictingWrite(_)));
    }

    #[tokio::test]
    async fn test_logical_delete_hides_relationship() {
        let db = MemoryStore::new();
        let a = entity(&db, "Campaign").await;
        let b = entity(&db, "Tool").await;
        let rel = link(&db, "uses", &a, &b).await;

        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        assert!(db.delete_relationship(&mut tx, &rel.internal_id).await.unwrap());
        assert!(!db.delete_relationship(&mut tx, &rel.internal_id).await.unwrap());
        assert!(db.get_relationship(&tx, &rel.internal_id).await.unwrap().is_none());
        assert_eq!(db.relationship_count(&tx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_anchored_traversal_directions() {
        let registry = RelationTypeRegistry::standard();
        let db = MemoryStore::new();
        let actor = entity(&db, "Threat-Actor").await;
        let tool = entity(&db, "Tool").await;
        let malware = entity(&db, "Malware").await;
        link(&db, "uses", &actor, &tool).await;
        link(&db, "uses", &actor, &malware).await;
        link(&db, "uses", &malware, &tool).await;

        let tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        let outgoing = TraversalBuilder::new(&registry)
            .anchor(actor.internal_id.clone(), Direction::Outgoing)
            .build()
            .unwrap();
        assert_eq!(db.execute(&tx, &outgoing).await.unwrap().len(), 2);

        let incoming = TraversalBuilder::new(&registry)
            .anchor(tool.internal_id.clone(), Direction::Incoming)
            .build()
            .unwrap();
        assert_eq!(db.execute(&tx, &incoming).await.unwrap().len(), 2);

        let either = TraversalBuilder::new(&registry)
            .anchor(malware.internal_id.clone(), Direction::Either)
            .build()
            .unwrap();
        assert_eq!(db.execute(&tx, &either).await.unwrap().len(), 2);

        let typed = TraversalBuilder::new(&registry)
            .anchor(actor.internal_id.clone(), Direction::Outgoing)
            .target_types(["Malware"])
            .build()
            .unwrap();
        let rows = db.execute(&tx, &typed).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].node.internal_id(), malware.internal_id);
    }

    #[tokio::test]
    async fn test_delete_between_only_matching_type() {
        let db = MemoryStore::new();
        let report = entity(&db, "Report").await;
        let label = entity(&db, "Label").await;
        link(&db, "object-label", &report, &label).await;
        link(&db, "object-label", &report, &label).await;

        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let removed = db
            .delete_relationships_between(&mut tx, &report.internal_id, &label.internal_id, "object-marking")
            .await
            .unwrap();
        assert_eq!(removed, 0);
        let removed = db
            .delete_relationships_between(&mut tx, &report.internal_id, &label.internal_id, "object-label")
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn test_merge_returns_live_edge() {
        let db = MemoryStore::new();
        let report = entity(&db, "Report").await;
        let marking = entity(&db, "Marking-Definition").await;
        let edge = || {
            Relationship::new(
                "object-marking",
                (&report.internal_id, &report.entity_type),
                (&marking.internal_id, &marking.entity_type),
            )
        };

        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let (first, created) = db.merge_relationship(&mut tx, edge()).await.unwrap();
        assert!(created);
        let (again, created) = db.merge_relationship(&mut tx, edge()).await.unwrap();
        assert!(!created);
        assert_eq!(again.internal_id, first.internal_id);
        assert_eq!(db.relationship_count(&tx).await.unwrap(), 1);

        // A deleted edge does not count; merging creates a fresh one.
        db.delete_relationship(&mut tx, &first.internal_id).await.unwrap();
        let (fresh, created) = db.merge_relationship(&mut tx, edge()).await.unwrap();
        assert!(created);
        assert_ne!(fresh.internal_id, first.internal_id);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let db = MemoryStore::new();
        db.set_available(false);
        let err = db.begin_tx(TxMode::ReadOnly).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(err.is_retryable());
        db.set_available(true);
        assert!(db.begin_tx(TxMode::ReadOnly).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_only_tx_rejects_writes() {
        let db = MemoryStore::new();
        let mut tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        let err = db.create_entity(&mut tx, Entity::new("Tool")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
