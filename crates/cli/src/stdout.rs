//! Recipients that print each delivery to stdout as a JSON line.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;

use linecaster_core::{Delivery, DeliveryError, Recipients};

#[derive(Serialize)]
struct DeliveryLine<'a> {
    to: &'a str,
    #[serde(flatten)]
    delivery: &'a Delivery,
}

/// Prints deliveries instead of storing them.
///
/// Either a fixed set of known recipients, or open to any ID.
#[derive(Debug, Clone)]
pub struct StdoutInbox {
    known: Option<HashSet<String>>,
}

impl StdoutInbox {
    /// Accept every recipient ID.
    pub fn open() -> Self {
        Self { known: None }
    }

    pub fn with_recipients<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            known: Some(ids.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Recipients for StdoutInbox {
    async fn exists(&self, user_id: &str) -> bool {
        match &self.known {
            Some(known) => known.contains(user_id),
            None => !user_id.is_empty(),
        }
    }

    async fn deliver(&self, user_id: &str, delivery: Delivery) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(&DeliveryLine {
            to: user_id,
            delivery: &delivery,
        })
        .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
        println!("{}", line);
        Ok(())
    }
}
