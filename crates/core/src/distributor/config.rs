//! Distributor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest accepted `second_ms`: one hour per interval second.
pub const MAX_SECOND_MS: u64 = 3_600_000;

/// Configuration for the distribution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Maximum number of jobs returned by a queue history listing.
    /// Unset lists every job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<i64>,

    /// Wall-clock milliseconds per interval second.
    /// 1000 in production; lower values compress schedules for demos.
    #[serde(default = "default_second_ms")]
    pub second_ms: u64,

    /// Owner identity used by the command line front end.
    #[serde(default = "default_owner")]
    pub default_owner: String,
}

fn default_second_ms() -> u64 {
    1000
}

fn default_owner() -> String {
    "admin".to_string()
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            history_limit: None,
            second_ms: default_second_ms(),
            default_owner: default_owner(),
        }
    }
}

impl DistributorConfig {
    /// Timer period for a job ticking every `interval_secs`.
    ///
    /// `second_ms` is clamped to [`MAX_SECOND_MS`].
    pub fn tick_period(&self, interval_secs: u32) -> Duration {
        let second_ms = self.second_ms.min(MAX_SECOND_MS);
        Duration::from_millis(u64::from(interval_secs).saturating_mul(second_ms))
    }

    /// Row limit for history queries.
    pub fn history_rows(&self) -> i64 {
        self.history_limit.unwrap_or(i64::MAX)
    }
}
