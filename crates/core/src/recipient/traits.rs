use async_trait::async_trait;
use thiserror::Error;

use crate::job::Delivery;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("Recipient unavailable: {0}")]
    Unavailable(String),
}

/// Directory of recipients able to receive delivered lines.
#[async_trait]
pub trait Recipients: Send + Sync {
    /// Whether `user_id` resolves to a live recipient.
    async fn exists(&self, user_id: &str) -> bool;

    /// Append a delivery to the recipient's inbox.
    async fn deliver(&self, user_id: &str, delivery: Delivery) -> Result<(), DeliveryError>;
}
