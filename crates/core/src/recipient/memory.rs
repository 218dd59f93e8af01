//! In-memory recipient directory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DeliveryError, Recipients};
use crate::job::Delivery;

/// Recipients held in memory, each with an append-only inbox.
///
/// Cheap to clone; clones share the same inboxes.
#[derive(Debug, Clone, Default)]
pub struct MemoryInbox {
    inboxes: Arc<RwLock<HashMap<String, Vec<Delivery>>>>,
}

impl MemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory with the given recipients registered.
    pub fn with_recipients<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inboxes = ids.into_iter().map(|id| (id.into(), Vec::new())).collect();
        Self {
            inboxes: Arc::new(RwLock::new(inboxes)),
        }
    }

    /// Register a recipient. Existing inboxes are left untouched.
    pub async fn add_recipient(&self, user_id: impl Into<String>) {
        self.inboxes.write().await.entry(user_id.into()).or_default();
    }

    /// Remove a recipient and drop its inbox.
    pub async fn remove_recipient(&self, user_id: &str) -> bool {
        self.inboxes.write().await.remove(user_id).is_some()
    }

    /// Deliveries received by `user_id`, oldest first.
    pub async fn inbox(&self, user_id: &str) -> Vec<Delivery> {
        self.inboxes
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Texts received by `user_id`, oldest first.
    pub async fn texts(&self, user_id: &str) -> Vec<String> {
        self.inbox(user_id)
            .await
            .into_iter()
            .map(|d| d.text)
            .collect()
    }

    /// Total deliveries across every inbox.
    pub async fn total_deliveries(&self) -> usize {
        self.inboxes.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl Recipients for MemoryInbox {
    async fn exists(&self, user_id: &str) -> bool {
        self.inboxes.read().await.contains_key(user_id)
    }

    async fn deliver(&self, user_id: &str, delivery: Delivery) -> Result<(), DeliveryError> {
        match self.inboxes.write().await.get_mut(user_id) {
            Some(inbox) => {
                inbox.push(delivery);
                Ok(())
            }
            None => Err(DeliveryError::RecipientNotFound(user_id.to_string())),
        }
    }
}
