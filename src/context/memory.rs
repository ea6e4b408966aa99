//! In-process edit-context store with lazy expiry.
//!
//! Expired slots are dropped on the next read of that slot. The clock is
//! `tokio::time`, so tests can pause and advance it.

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{EditContext, EditContextStore};
use crate::Result;

#[derive(Default)]
pub struct MemoryContextStore {
    slots: Mutex<HashMap<String, (EditContext, Instant)>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live slots, expired ones excluded.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.lock().values().filter(|(_, expires)| *expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EditContextStore for MemoryContextStore {
    async fn put(&self, context: EditContext, ttl: Duration) -> Result<()> {
        let expires = Instant::now() + ttl;
        self.slots.lock().insert(context.entity_id.clone(), (context, expires));
        Ok(())
    }

    async fn get(&self, entity_id: &str) -> Result<Option<EditContext>> {
        let mut slots = self.slots.lock();
        match slots.get(entity_id) {
            Some((_, expires)) if *expires <= Instant::now() => {
                slots.remove(entity_id);
                Ok(None)
            }
            Some((context, _)) => Ok(Some(context.clone())),
            None => Ok(None),
        }
    }

    async fn remove(&self, entity_id: &str) -> Result<Option<EditContext>> {
        let now = Instant::now();
        Ok(self
            .slots
            .lock()
            .remove(entity_id)
            .filter(|(_, expires)| *expires > now)
            .map(|(context, _)| context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn context(entity_id: &str, user_id: &str) -> EditContext {
        EditContext {
            entity_id: entity_id.into(),
            user_id: user_id.into(),
            focused_field: Some("name".into()),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_expires_after_ttl() {
        let store = MemoryContextStore::new();
        store.put(context("e1", "u1"), Duration::from_secs(60)).await.unwrap();
        assert!(store.get("e1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.get("e1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_refreshes_ttl() {
        let store = MemoryContextStore::new();
        store.put(context("e1", "u1"), Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        store.put(context("e1", "u2"), Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;

        let live = store.get("e1").await.unwrap().unwrap();
        assert_eq!(live.user_id, "u2");
    }

    #[tokio::test]
    async fn test_remove_returns_holder() {
        let store = MemoryContextStore::new();
        store.put(context("e1", "u1"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.remove("e1").await.unwrap().unwrap().user_id, "u1");
        assert!(store.remove("e1").await.unwrap().is_none());
    }
}
