//! # stixgraph: Relationship & Traversal Core for a Typed Knowledge Graph
//!
//! Typed entities joined by typed relationships, where every relationship
//! type is either **meta** (labels, markings, authorship, references) or
//! **core** (domain relations such as "uses" or "targets").
//!
//! ## Design Principles
//!
//! 1. **One taxonomy**: `RelationTypeRegistry` answers every class and
//!    direction question; meta relations go through attach/detach, core
//!    relations through CRUD, and crossing over is an error
//! 2. **Parameterized traversals**: the planner emits `TraversalPlan`s with
//!    named parameters, never query text with caller values spliced in
//! 3. **Commit, then publish**: one store mutation per write, announced on
//!    the bus only after it commits
//! 4. **Store-agnostic**: `GraphStore` is the contract; `MemoryStore` is the
//!    reference implementation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stixgraph::{Actor, Entity, KnowledgeGraph, RelationshipFilter, RelationshipInput};
//!
//! # async fn example() -> stixgraph::Result<()> {
//! let graph = KnowledgeGraph::open_memory().await?;
//! let analyst = Actor::new("user-1", "analyst");
//!
//! let apt = graph.create_entity(Entity::new("Intrusion-Set").with_attribute("name", "APT28")).await?;
//! let tool = graph.create_entity(Entity::new("Tool").with_attribute("name", "Mimikatz")).await?;
//!
//! graph.relationships()
//!     .create(&analyst, RelationshipInput::new("uses", &apt.internal_id, &tool.internal_id))
//!     .await?;
//!
//! let uses = graph.relationships().find_all(&RelationshipFilter::of_type("uses")).await?;
//! assert_eq!(uses.page_info.global_count, 1);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod registry;
pub mod planner;
pub mod pagination;
pub mod storage;
pub mod tx;
pub mod bus;
pub mod context;
pub mod service;
pub mod config;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{
    Actor, Direction, Element, Entity, FieldPatch, PropertyMap, RelationMeta, Relationship, Value,
};
pub use registry::{RelationClass, RelationTypeRegistry, TaxonomyDefinition};
pub use planner::{OrderBy, OrderMode, RelationFilter, TraversalBuilder, TraversalPlan, TraversalTarget};
pub use pagination::{Connection, Edge, PageInfo, PageRequest};
pub use storage::{GraphStore, MemoryStore, TraversalRow};
pub use tx::{Transaction, TxId, TxMode};
pub use bus::{Event, EventKind, EventPayload, NotificationBus, Subscription, TopicClass, TopicRegistry};
pub use context::{EditContext, EditContextStore, EditContextTracker, MemoryContextStore};
pub use service::{Counts, MetaInput, RelationshipFilter, RelationshipInput, RelationshipService, ScopeArgs};
pub use config::CoreConfig;

// ============================================================================
// Top-level KnowledgeGraph handle
// ============================================================================

/// The primary entry point. Wires one store, one taxonomy, one topic
/// registry and one bus into the relationship service and the edit-context
/// tracker, all sharing the same `Arc`s.
pub struct KnowledgeGraph<B: GraphStore, C: EditContextStore = MemoryContextStore> {
    store: Arc<B>,
    registry: Arc<RelationTypeRegistry>,
    bus: Arc<NotificationBus>,
    config: Arc<CoreConfig>,
    relationships: RelationshipService<B>,
    contexts: EditContextTracker<B, C>,
}

impl<B: GraphStore, C: EditContextStore> KnowledgeGraph<B, C> {
    pub fn with_store(store: B, contexts: C, registry: RelationTypeRegistry, config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(store);
        let registry = Arc::new(registry);
        let topics = Arc::new(TopicRegistry::new());
        let bus = Arc::new(NotificationBus::new(topics.clone(), config.bus_capacity));
        let tracker = EditContextTracker::new(
            store.clone(),
            Arc::new(contexts),
            topics.clone(),
            bus.clone(),
            &config,
        );
        let config = Arc::new(config);
        let relationships = RelationshipService::new(
            store.clone(),
            registry.clone(),
            topics,
            bus.clone(),
            config.clone(),
        );
        Ok(Self { store, registry, bus, config, relationships, contexts: tracker })
    }

    pub fn relationships(&self) -> &RelationshipService<B> {
        &self.relationships
    }

    pub fn contexts(&self) -> &EditContextTracker<B, C> {
        &self.contexts
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn registry(&self) -> &RelationTypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Access the underlying store (for advanced use).
    pub fn store(&self) -> &B {
        &self.store
    }

    /// Persist an entity of a declared entity type. Entity creation proper
    /// belongs to domain code; this is the seam it uses.
    pub async fn create_entity(&self, entity: Entity) -> Result<Entity> {
        if !self.registry.is_entity_type(&entity.entity_type) {
            return Err(Error::InvalidInput(format!("unknown entity type '{}'", entity.entity_type)));
        }
        if !self.registry.is_leaf_entity_type(&entity.entity_type) {
            return Err(Error::InvalidInput(format!(
                "'{}' is an abstract entity type, use one of its subtypes",
                entity.entity_type
            )));
        }
        if let Some(stix_id) = entity.stix_id.as_deref() {
            if !model::ids::is_stix_id(stix_id) {
                return Err(Error::InvalidInput(format!("malformed stix id '{stix_id}'")));
            }
        }
        let mut tx = self.store.begin_tx(TxMode::ReadWrite).await?;
        let outcome = self.store.create_entity(&mut tx, entity).await;
        let created = storage::finish_tx(self.store.as_ref(), tx, outcome).await?;
        info!(internal_id = %created.internal_id, entity_type = %created.entity_type, "entity created");
        Ok(created)
    }

    /// Close the bus, then the store.
    pub async fn shutdown(&self) -> Result<()> {
        self.bus.shutdown();
        self.store.shutdown().await
    }
}

/// In-memory graph for testing and embedding.
impl KnowledgeGraph<MemoryStore> {
    pub async fn open_memory() -> Result<Self> {
        Self::open_memory_with(CoreConfig::default()).await
    }

    pub async fn open_memory_with(config: CoreConfig) -> Result<Self> {
        Self::with_store(
            MemoryStore::new(),
            MemoryContextStore::new(),
            RelationTypeRegistry::standard(),
            config,
        )
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid relation type: {0}")]
    InvalidRelationType(String),

    #[error("Illegal direction: '{relationship_type}' cannot join {from_type} to {to_type}")]
    IllegalDirection {
        relationship_type: String,
        from_type: String,
        to_type: String,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Conflicting write: {0}")]
    ConflictingWrite(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Notification bus is closed")]
    BusClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable error kind for transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidRelationType,
    IllegalDirection,
    StoreUnavailable,
    ConflictingWrite,
    InvalidInput,
    BusClosed,
    Config,
    Serialization,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidRelationType(_) => ErrorKind::InvalidRelationType,
            Error::IllegalDirection { .. } => ErrorKind::IllegalDirection,
            Error::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Error::ConflictingWrite(_) => ErrorKind::ConflictingWrite,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::BusClosed => ErrorKind::BusClosed,
            Error::Config(_) => ErrorKind::Config,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Only transient store failures are worth retrying, and only at the
    /// store adapter.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        let err = Error::IllegalDirection {
            relationship_type: "uses".into(),
            from_type: "Tool".into(),
            to_type: "Malware".into(),
        };
        assert_eq!(err.kind(), ErrorKind::IllegalDirection);
        assert!(!err.is_retryable());
        assert_eq!(serde_json::to_string(&err.kind()).unwrap(), "\"ILLEGAL_DIRECTION\"");
        assert!(Error::StoreUnavailable("down".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_create_entity_rejects_unknown_and_relation_types() {
        let graph = KnowledgeGraph::open_memory().await.unwrap();
        let err = graph.create_entity(Entity::new("Spaceship")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = graph.create_entity(Entity::new("uses")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = graph
            .create_entity(Entity::new("Malware").with_stix_id("not a stix id"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        graph.create_entity(Entity::new("Malware")).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_entity_rejects_abstract_types() {
        let graph = KnowledgeGraph::open_memory().await.unwrap();
        for abstract_type in ["Stix-Core-Object", "Container", "Identity", "Location"] {
            let err = graph.create_entity(Entity::new(abstract_type)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{abstract_type} was instantiated");
        }
        graph.create_entity(Entity::new("Report")).await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CoreConfig { bus_capacity: 0, ..CoreConfig::default() };
        let err = KnowledgeGraph::with_store(
            MemoryStore::new(),
            MemoryContextStore::new(),
            RelationTypeRegistry::standard(),
            config,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
