//! # Notification Bus
//!
//! Live pub/sub for mutation and focus events, built on a
//! `tokio::sync::broadcast` channel.
//!
//! Delivery is best-effort and at-most-once per subscriber. Events are
//! not persisted: a subscriber only sees what is published after it
//! subscribed. A subscriber that falls more than `bus_capacity` events
//! behind drops the ones it missed and carries on. Ordering holds within
//! one topic for one publisher; there is no cross-topic ordering.

pub mod topic;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::context::EditContext;
use crate::model::{Actor, Element, Entity, Relationship};
use crate::{Error, Result};
pub use topic::{TopicClass, TopicPattern, TopicRegistry, TopicSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Edited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Relationship(Relationship),
    Entity(Entity),
    EditContext(EditContext),
}

impl From<Element> for EventPayload {
    fn from(element: Element) -> Self {
        match element {
            Element::Entity(e) => EventPayload::Entity(e),
            Element::Relationship(r) => EventPayload::Relationship(r),
        }
    }
}

impl From<Relationship> for EventPayload {
    fn from(rel: Relationship) -> Self {
        EventPayload::Relationship(rel)
    }
}

impl From<EditContext> for EventPayload {
    fn from(ctx: EditContext) -> Self {
        EventPayload::EditContext(ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub kind: EventKind,
    pub payload: EventPayload,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Topic class of an element: relationships publish on
/// `core-relationship.*`, entities on `core-object.*`.
pub fn topic_class_of(element: &Element) -> TopicClass {
    if element.is_relationship() {
        TopicClass::CoreRelationship
    } else {
        TopicClass::CoreObject
    }
}

// ============================================================================
// Bus
// ============================================================================

pub struct NotificationBus {
    topics: Arc<TopicRegistry>,
    /// `None` once shut down.
    sender: RwLock<Option<broadcast::Sender<Event>>>,
}

impl NotificationBus {
    pub fn new(topics: Arc<TopicRegistry>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { topics, sender: RwLock::new(Some(sender)) }
    }

    pub fn topics(&self) -> &Arc<TopicRegistry> {
        &self.topics
    }

    /// Publish one event. Having no subscribers is not an error.
    pub fn publish(
        &self,
        topic: &str,
        kind: EventKind,
        payload: impl Into<EventPayload>,
        actor: &Actor,
    ) -> Result<Event> {
        if !self.topics.contains(topic) {
            return Err(Error::InvalidInput(format!("unknown topic '{topic}'")));
        }
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(Error::BusClosed)?;
        let event = Event {
            topic: topic.to_string(),
            kind,
            payload: payload.into(),
            actor_id: actor.id.clone(),
            timestamp: Utc::now(),
        };
        match sender.send(event.clone()) {
            Ok(receivers) => debug!(topic, receivers, "published"),
            Err(_) => debug!(topic, "published with no subscribers"),
        }
        Ok(event)
    }

    pub fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        let pattern = self.topics.pattern(pattern)?;
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(Error::BusClosed)?;
        Ok(Subscription { pattern, receiver: sender.subscribe() })
    }

    /// Close the bus. Subscribers drain what was already sent, then end;
    /// later publishes fail with `BusClosed`.
    pub fn shutdown(&self) {
        self.sender.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.read().as_ref().map_or(0, broadcast::Sender::receiver_count)
    }
}

// ============================================================================
// Subscription
// ============================================================================

pub struct Subscription {
    pattern: TopicPattern,
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    /// Next matching event, or `None` once the bus is shut down and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.pattern.matches(&event.topic) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.pattern.matches(&event.topic) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + Unpin {
        let pattern = self.pattern;
        BroadcastStream::new(self.receiver).filter_map(move |next| match next {
            Ok(event) if pattern.matches(&event.topic) => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!(missed, "subscriber lagged, events dropped");
                None
            }
        })
    }
}
