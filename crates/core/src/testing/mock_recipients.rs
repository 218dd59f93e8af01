//! Mock recipient directory for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

use crate::job::Delivery;
use crate::recipient::{DeliveryError, MemoryInbox, Recipients};

/// Mock implementation of the Recipients trait.
///
/// Wraps a [`MemoryInbox`] and adds:
/// - A per-delivery delay, to hold a tick in flight
/// - Recipients that resolve but reject deliveries
/// - A signal raised whenever a delivery starts
///
/// # Example
///
/// ```rust,ignore
/// let recipients = MockRecipients::new(["alice"]);
/// recipients.set_delay(Duration::from_secs(5)).await;
///
/// // ... start a job, then wait until its first delivery is underway
/// recipients.wait_for_delivery_start().await;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockRecipients {
    inbox: MemoryInbox,
    delay: Arc<RwLock<Option<Duration>>>,
    rejecting: Arc<RwLock<HashSet<String>>>,
    attempts: Arc<AtomicUsize>,
    delivery_started: Arc<Notify>,
}

impl MockRecipients {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inbox: MemoryInbox::with_recipients(ids),
            ..Default::default()
        }
    }

    /// Create a directory whose deliveries each take `delay`.
    pub fn with_delay<I, S>(ids: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inbox: MemoryInbox::with_recipients(ids),
            delay: Arc::new(RwLock::new(Some(delay))),
            ..Default::default()
        }
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    /// Keep `user_id` resolvable but fail every delivery to it.
    pub async fn reject_deliveries_to(&self, user_id: impl Into<String>) {
        self.rejecting.write().await.insert(user_id.into());
    }

    /// The backing inbox, for assertions.
    pub fn inbox(&self) -> &MemoryInbox {
        &self.inbox
    }

    /// Number of deliveries attempted, including rejected ones.
    pub fn delivery_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Resolves once a delivery has started since the last call.
    pub async fn wait_for_delivery_start(&self) {
        self.delivery_started.notified().await;
    }
}

#[async_trait]
impl Recipients for MockRecipients {
    async fn exists(&self, user_id: &str) -> bool {
        self.inbox.exists(user_id).await
    }

    async fn deliver(&self, user_id: &str, delivery: Delivery) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.delivery_started.notify_one();

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.rejecting.read().await.contains(user_id) {
            return Err(DeliveryError::Unavailable(user_id.to_string()));
        }
        self.inbox.deliver(user_id, delivery).await
    }
}
