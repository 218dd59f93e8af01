pub mod config;
pub mod distributor;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod recipient;
pub mod testing;

pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, Config,
    ConfigError, DatabaseConfig, LoggingConfig,
};
pub use distributor::{
    CancelOutcome, Distributor, DistributorConfig, DistributorError, JobDetails, JobStore,
    ProgressPersister, TickOutcome,
};
pub use job::{
    CreateJobRequest, Delivery, DistributionJob, JobSpec, JobStatus, LineStatus, LinesPerTick,
    PersistError, ProgressStore, QueueHistoryEntry, QueueItem, SqliteProgressStore,
    ValidationError,
};
pub use queue::{assigned_target, build_queue};
pub use recipient::{DeliveryError, MemoryInbox, Recipients};
