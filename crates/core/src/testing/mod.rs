//! Testing utilities and mock implementations.
//!
//! Mock collaborators for the distribution engine, allowing lifecycle tests
//! without a real database or recipient directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use linecaster_core::testing::{MockProgressStore, MockRecipients};
//!
//! let store = Arc::new(MockProgressStore::new());
//! let recipients = MockRecipients::new(["alice", "bob"]);
//!
//! // Make every durable write fail
//! store.set_fail_writes(true);
//!
//! let distributor = Distributor::new(config, store.clone(), Arc::new(recipients.clone()));
//! ```

mod mock_progress_store;
mod mock_recipients;

pub use mock_progress_store::MockProgressStore;
pub use mock_recipients::MockRecipients;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::job::CreateJobRequest;

    /// A request ticking every second with the given text, batch size and targets.
    pub fn request(text: &str, lines_per_tick: i64, targets: &[&str]) -> CreateJobRequest {
        CreateJobRequest {
            text: text.to_string(),
            interval_secs: 1,
            lines_per_tick,
            target_ids: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Text of `count` numbered lines: "line 1", "line 2", ...
    pub fn numbered_text(count: usize) -> String {
        (1..=count)
            .map(|n| format!("line {}", n))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
