//! Recipient resolution and inbox delivery.

mod memory;
mod traits;

pub use memory::MemoryInbox;
pub use traits::{DeliveryError, Recipients};
