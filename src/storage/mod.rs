//! # Graph Store Trait
//!
//! The contract between the relationship core and any graph store. The
//! core never builds query text. It hands the store [`TraversalPlan`]s and
//! single-record mutations, so escaping and dialect concerns live in one
//! adapter.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory reference store for tests and embedding |
//!
//! ## Error contract
//!
//! - Transient unavailability → `Error::StoreUnavailable` (the only
//!   retryable kind; retries belong to the adapter, not the core).
//! - A mutation whose target vanished between the caller's validation and
//!   the commit → `Error::ConflictingWrite`.

pub mod memory;

use async_trait::async_trait;
use tracing::warn;

use crate::model::*;
use crate::planner::TraversalPlan;
use crate::tx::{Transaction, TxMode};
use crate::Result;

pub use memory::MemoryStore;

/// One traversal match.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalRow {
    /// The matched edge.
    pub relation: Relationship,
    /// What the plan returns: the far-side element for node traversals,
    /// the edge itself for relationship listings.
    pub node: Element,
}

// ============================================================================
// GraphStore Trait
// ============================================================================

#[async_trait]
pub trait GraphStore: Send + Sync + 'static {
    /// The transaction type for this store.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    async fn shutdown(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    async fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Elements
    // ========================================================================

    /// Persist an entity. Entities are created by domain operations
    /// outside the core; this is their entry point into the store.
    async fn create_entity(&self, tx: &mut Self::Tx, entity: Entity) -> Result<Entity>;

    /// Resolve a live element by internal id or stix id.
    async fn get_element(&self, tx: &Self::Tx, id: &str) -> Result<Option<Element>>;

    async fn get_entity(&self, tx: &Self::Tx, id: &str) -> Result<Option<Entity>> {
        Ok(self.get_element(tx, id).await?.and_then(Element::into_entity))
    }

    async fn get_relationship(&self, tx: &Self::Tx, id: &str) -> Result<Option<Relationship>> {
        Ok(self.get_element(tx, id).await?.and_then(Element::into_relationship))
    }

    // ========================================================================
    // Relationship mutations (one record each, atomic)
    // ========================================================================

    /// Persist a relationship whose ends the caller has already resolved to
    /// internal ids.
    async fn create_relationship(&self, tx: &mut Self::Tx, rel: Relationship) -> Result<Relationship>;

    /// Return the live edge of the same type between the same two ends, or
    /// persist `rel` when there is none. The flag is true when `rel` was
    /// created. Check and insert happen as one atomic step.
    async fn merge_relationship(&self, tx: &mut Self::Tx, rel: Relationship) -> Result<(Relationship, bool)>;

    /// Apply a patch and return the updated record.
    async fn update_relationship(
        &self,
        tx: &mut Self::Tx,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<Relationship>;

    /// Logically delete. Returns true if a live record was deleted.
    async fn delete_relationship(&self, tx: &mut Self::Tx, id: &str) -> Result<bool>;

    /// Logically delete every live `relationship_type` edge from `from_id`
    /// to `to_id`. Returns how many were deleted.
    async fn delete_relationships_between(
        &self,
        tx: &mut Self::Tx,
        from_id: &str,
        to_id: &str,
        relationship_type: &str,
    ) -> Result<usize>;

    /// Lookup path for derived identifiers produced by an inference engine.
    ///
    /// Default: stores without inference know no such relationships.
    async fn get_inferred_relationship(&self, _tx: &Self::Tx, _id: &str) -> Result<Option<Relationship>> {
        Ok(None)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Execute a plan, returning every match in plan order.
    async fn execute(&self, tx: &Self::Tx, plan: &TraversalPlan) -> Result<Vec<TraversalRow>>;

    /// Count a plan's matches.
    ///
    /// Default executes the plan; stores backed by a count index override.
    async fn count(&self, tx: &Self::Tx, plan: &TraversalPlan) -> Result<usize> {
        Ok(self.execute(tx, plan).await?.len())
    }

    /// Live relationships of every type.
    async fn relationship_count(&self, tx: &Self::Tx) -> Result<u64>;
}

/// Commit on success, roll back on failure. The operation's own error wins
/// over a rollback failure, which is only logged.
pub async fn finish_tx<S: GraphStore + ?Sized, T>(store: &S, tx: S::Tx, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            store.commit_tx(tx).await?;
            Ok(value)
        }
        Err(err) => {
            let tx_id = tx.id();
            if let Err(rollback) = store.rollback_tx(tx).await {
                warn!(%tx_id, error = %rollback, "rollback failed after {err}");
            }
            Err(err)
        }
    }
}
