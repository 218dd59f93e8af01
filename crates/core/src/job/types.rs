//! Core distribution job data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest allowed tick interval, in seconds.
pub const MIN_INTERVAL_SECS: u32 = 1;

/// Longest allowed tick interval, in seconds.
pub const MAX_INTERVAL_SECS: u32 = 300;

/// Build a prefixed unique identifier (`job_<uuid>`, `msg_<uuid>`).
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4())
}

/// Split source text into lines.
///
/// `\r\n` is normalized to `\n` first. Empty lines are kept, so a trailing
/// newline produces a final empty line.
pub fn split_lines(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split('\n')
        .map(String::from)
        .collect()
}

// ============================================================================
// Validation
// ============================================================================

/// Reasons a job request is rejected before anything is persisted or scheduled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid text")]
    InvalidText,

    #[error("Invalid interval: {0} (expected 1..=300 seconds)")]
    InvalidInterval(i64),

    #[error("Invalid linesPerTick: {0} (expected one of 1, 3, 5, 7, 10, 12, 15)")]
    InvalidLinesPerTick(i64),

    #[error("No targets")]
    NoTargets,
}

/// Batch size per recipient per round, restricted to a fixed set of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct LinesPerTick(u32);

impl LinesPerTick {
    /// Every accepted batch size.
    pub const ALLOWED: [u32; 7] = [1, 3, 5, 7, 10, 12, 15];

    pub fn new(value: i64) -> Result<Self, ValidationError> {
        Self::ALLOWED
            .iter()
            .copied()
            .find(|allowed| i64::from(*allowed) == value)
            .map(Self)
            .ok_or(ValidationError::InvalidLinesPerTick(value))
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u32> for LinesPerTick {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(i64::from(value))
    }
}

impl From<LinesPerTick> for u32 {
    fn from(value: LinesPerTick) -> Self {
        value.0
    }
}

impl fmt::Display for LinesPerTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unvalidated job parameters as supplied by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    /// Source text; split into lines on line breaks.
    pub text: String,
    /// Seconds between ticks.
    pub interval_secs: i64,
    /// Lines per recipient per round.
    pub lines_per_tick: i64,
    /// Recipients in rotation order.
    pub target_ids: Vec<String>,
}

/// Job parameters that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub interval_secs: u32,
    pub lines_per_tick: LinesPerTick,
    pub targets: Vec<String>,
    pub text_lines: Vec<String>,
}

impl CreateJobRequest {
    /// Validate the request and split its text.
    ///
    /// Checks run in the order text, interval, batch size, targets; the first
    /// failure is reported.
    pub fn validate(&self) -> Result<JobSpec, ValidationError> {
        if self.text.trim().is_empty() {
            return Err(ValidationError::InvalidText);
        }

        let interval = self.interval_secs;
        if interval < i64::from(MIN_INTERVAL_SECS) || interval > i64::from(MAX_INTERVAL_SECS) {
            return Err(ValidationError::InvalidInterval(interval));
        }

        let lines_per_tick = LinesPerTick::new(self.lines_per_tick)?;

        if self.target_ids.is_empty() {
            return Err(ValidationError::NoTargets);
        }

        Ok(JobSpec {
            interval_secs: interval as u32,
            lines_per_tick,
            targets: self.target_ids.clone(),
            text_lines: split_lines(&self.text),
        })
    }
}

// ============================================================================
// Job
// ============================================================================

/// Lifecycle state of a distribution job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Cancelled,
}

impl JobStatus {
    /// Completed and cancelled jobs never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// A block of text being delivered line by line to a rotation of recipients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionJob {
    pub id: String,
    /// Admin who created the job. Visibility is scoped to this identity.
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub interval_secs: u32,
    pub lines_per_tick: LinesPerTick,
    /// Rotation order.
    pub targets: Vec<String>,
    pub text_lines: Vec<String>,
    /// Number of lines already delivered.
    pub next_index: usize,
    pub status: JobStatus,
}

impl DistributionJob {
    /// Create a running job with a fresh id and the cursor at zero.
    pub fn new(owner_id: impl Into<String>, spec: JobSpec) -> Self {
        Self {
            id: new_id("job"),
            owner_id: owner_id.into(),
            created_at: Utc::now(),
            interval_secs: spec.interval_secs,
            lines_per_tick: spec.lines_per_tick,
            targets: spec.targets,
            text_lines: spec.text_lines,
            next_index: 0,
            status: JobStatus::Running,
        }
    }

    pub fn total_lines(&self) -> usize {
        self.text_lines.len()
    }

    /// Lines delivered per full tick.
    pub fn round_size(&self) -> usize {
        crate::queue::round_size(self.targets.len(), self.lines_per_tick.get())
    }

    pub fn remaining(&self) -> usize {
        self.total_lines().saturating_sub(self.next_index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_index >= self.total_lines()
    }

    /// Fraction of lines delivered, in `0.0..=1.0`. Empty jobs report 1.0.
    pub fn progress(&self) -> f64 {
        match self.total_lines() {
            0 => 1.0,
            total => self.next_index.min(total) as f64 / total as f64,
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Durable delivery state of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    Pending,
    Sent,
    Failed,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Pending => "pending",
            LineStatus::Sent => "sent",
            LineStatus::Failed => "failed",
        }
    }
}

impl FromStr for LineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LineStatus::Pending),
            "sent" => Ok(LineStatus::Sent),
            "failed" => Ok(LineStatus::Failed),
            other => Err(format!("unknown line status: {}", other)),
        }
    }
}

/// Precomputed assignment of one source line to a recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// 1-based position in the source text.
    pub line_number: usize,
    pub line: String,
    pub user_id: String,
    pub status: LineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Delivery
// ============================================================================

/// Message appended to a recipient's inbox for one delivered line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub text: String,
    /// Owner of the job that sent the line.
    pub from_id: String,
    pub ts: DateTime<Utc>,
    pub job_id: String,
    pub line_number: usize,
}

impl Delivery {
    pub fn new(job: &DistributionJob, index: usize) -> Self {
        Self {
            id: new_id("msg"),
            text: job.text_lines[index].clone(),
            from_id: job.owner_id.clone(),
            ts: Utc::now(),
            job_id: job.id.clone(),
            line_number: index + 1,
        }
    }
}
