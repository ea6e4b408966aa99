//! # Edit Context Tracker
//!
//! Soft per-element focus marker for collaborative editing:
//!
//! ```text
//! Idle ──set_context──▶ Focused(user, field) ──clear_context / ttl──▶ Idle
//! ```
//!
//! The slot is last-writer-wins with no locking. It informs other editors
//! through the bus and never gates attribute writes. Expiry belongs to the
//! [`EditContextStore`]; the tracker only hands it the configured TTL.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::bus::{topic_class_of, EventKind, NotificationBus, TopicRegistry};
use crate::config::CoreConfig;
use crate::model::{Actor, Element};
use crate::planner::validate_id;
use crate::storage::GraphStore;
use crate::tx::TxMode;
use crate::{Error, Result};
pub use memory::MemoryContextStore;

/// Who is editing which field of an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditContext {
    pub entity_id: String,
    pub user_id: String,
    pub focused_field: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Transient store holding one context slot per element.
#[async_trait]
pub trait EditContextStore: Send + Sync + 'static {
    /// Overwrite the slot. The store forgets it after `ttl` without refresh.
    async fn put(&self, context: EditContext, ttl: Duration) -> Result<()>;

    /// The live context, if any. Expired contexts are invisible.
    async fn get(&self, entity_id: &str) -> Result<Option<EditContext>>;

    /// Empty the slot, returning what it held.
    async fn remove(&self, entity_id: &str) -> Result<Option<EditContext>>;
}

pub struct EditContextTracker<B: GraphStore, C: EditContextStore> {
    store: Arc<B>,
    contexts: Arc<C>,
    topics: Arc<TopicRegistry>,
    bus: Arc<NotificationBus>,
    ttl: Duration,
}

impl<B: GraphStore, C: EditContextStore> EditContextTracker<B, C> {
    pub fn new(
        store: Arc<B>,
        contexts: Arc<C>,
        topics: Arc<TopicRegistry>,
        bus: Arc<NotificationBus>,
        config: &CoreConfig,
    ) -> Self {
        Self { store, contexts, topics, bus, ttl: config.edit_context_ttl() }
    }

    /// Focus `field` of an element for `actor`, replacing any prior holder.
    /// Publishes the new context on the element's context topic.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn set_context(&self, actor: &Actor, entity_id: &str, field: Option<&str>) -> Result<EditContext> {
        let element = self.load(entity_id).await?;
        let context = EditContext {
            entity_id: element.internal_id().to_string(),
            user_id: actor.id.clone(),
            focused_field: field.map(str::to_string),
            updated_at: Utc::now(),
        };
        self.contexts.put(context.clone(), self.ttl).await?;
        debug!(entity_id = %context.entity_id, field = ?context.focused_field, "context set");

        let topic = &self.topics.topics(topic_class_of(&element)).context;
        if let Err(err) = self.bus.publish(topic, EventKind::Edited, context.clone(), actor) {
            warn!(topic = %topic, error = %err, "context notification dropped");
        }
        Ok(context)
    }

    /// Return the slot to idle and publish the element's current state so
    /// clients refresh without a separate fetch.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn clear_context(&self, actor: &Actor, entity_id: &str) -> Result<Element> {
        let element = self.load(entity_id).await?;
        let cleared = self.contexts.remove(element.internal_id()).await?;
        debug!(entity_id = element.internal_id(), held = cleared.is_some(), "context cleared");

        let topic = &self.topics.topics(topic_class_of(&element)).context;
        if let Err(err) = self.bus.publish(topic, EventKind::Edited, element.clone(), actor) {
            warn!(topic = %topic, error = %err, "context notification dropped");
        }
        Ok(element)
    }

    /// The live context of an element, if one is focused.
    pub async fn current(&self, entity_id: &str) -> Result<Option<EditContext>> {
        let element = self.load(entity_id).await?;
        self.contexts.get(element.internal_id()).await
    }

    async fn load(&self, id: &str) -> Result<Element> {
        validate_id("element id", id)?;
        let tx = self.store.begin_tx(TxMode::ReadOnly).await?;
        let element = self.store.get_element(&tx, id).await;
        let element = crate::storage::finish_tx(self.store.as_ref(), tx, element).await?;
        element.ok_or_else(|| Error::NotFound(format!("element {id}")))
    }
}
