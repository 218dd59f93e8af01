//! Distribution engine.
//!
//! A [`Distributor`] owns the live [`JobStore`], spawns one recurring timer
//! per job and mirrors progress into a [`ProgressStore`](crate::job::ProgressStore)
//! through the [`ProgressPersister`]. Each tick sends up to `lines_per_tick`
//! lines to every target in rotation order and advances the job's cursor.

mod config;
mod persister;
mod registry;
mod scheduler;
mod service;
mod types;

pub use config::{DistributorConfig, MAX_SECOND_MS};
pub use persister::ProgressPersister;
pub use registry::{CancelOutcome, JobStore};
pub use service::Distributor;
pub use types::{DistributorError, JobDetails, TickOutcome};
