//! SQLite-backed progress store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::queue::build_queue;

use super::{
    DistributionJob, JobStatus, LineStatus, LinesPerTick, PersistError, ProgressStore,
    QueueHistoryEntry, QueueItem,
};

const JOB_COLUMNS: &str = "id, owner_id, created_at, interval_secs, lines_per_tick, targets, text_lines, next_index, status";

/// SQLite-backed progress store.
pub struct SqliteProgressStore {
    conn: Mutex<Connection>,
}

impl SqliteProgressStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, PersistError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, PersistError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), PersistError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                interval_secs INTEGER NOT NULL,
                lines_per_tick INTEGER NOT NULL,
                targets TEXT NOT NULL,
                text_lines TEXT NOT NULL,
                next_index INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS queue_items (
                job_id TEXT NOT NULL,
                line_number INTEGER NOT NULL,
                line TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                sent_at TEXT,
                PRIMARY KEY (job_id, line_number)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_owner_created ON jobs(owner_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistError> {
        self.conn
            .lock()
            .map_err(|_| PersistError::Database("connection lock poisoned".to_string()))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<DistributionJob> {
        let created_at: String = row.get(2)?;
        let lines_per_tick: i64 = row.get(4)?;
        let targets_json: String = row.get(5)?;
        let text_lines_json: String = row.get(6)?;
        let next_index: i64 = row.get(7)?;
        let status: String = row.get(8)?;

        Ok(DistributionJob {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            created_at: parse_time(2, &created_at)?,
            interval_secs: row.get(3)?,
            lines_per_tick: LinesPerTick::new(lines_per_tick)
                .map_err(|e| conversion_err(4, e.to_string()))?,
            targets: serde_json::from_str(&targets_json)
                .map_err(|e| conversion_err(5, e.to_string()))?,
            text_lines: serde_json::from_str(&text_lines_json)
                .map_err(|e| conversion_err(6, e.to_string()))?,
            next_index: next_index.max(0) as usize,
            status: status.parse().map_err(|e: String| conversion_err(8, e))?,
        })
    }

    fn row_to_queue_item(row: &rusqlite::Row) -> rusqlite::Result<QueueItem> {
        let line_number: i64 = row.get(0)?;
        let status: String = row.get(3)?;
        let sent_at: Option<String> = row.get(4)?;

        Ok(QueueItem {
            line_number: line_number as usize,
            line: row.get(1)?,
            user_id: row.get(2)?,
            status: status.parse().map_err(|e: String| conversion_err(3, e))?,
            sent_at: sent_at.map(|s| parse_time(4, &s)).transpose()?,
        })
    }

    fn query_queue(conn: &Connection, job_id: &str) -> rusqlite::Result<Vec<QueueItem>> {
        let mut stmt = conn.prepare(
            "SELECT line_number, line, user_id, status, sent_at FROM queue_items WHERE job_id = ? ORDER BY line_number ASC",
        )?;
        let rows = stmt.query_map(params![job_id], Self::row_to_queue_item)?;
        rows.collect()
    }

    fn insert_rows(
        conn: &Connection,
        job: &DistributionJob,
        queue: &[QueueItem],
    ) -> Result<(), PersistError> {
        let targets_json = serde_json::to_string(&job.targets)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        let text_lines_json = serde_json::to_string(&job.text_lines)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO jobs (id, owner_id, created_at, interval_secs, lines_per_tick, targets, text_lines, next_index, status, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                job.id,
                job.owner_id,
                format_time(job.created_at),
                job.interval_secs,
                job.lines_per_tick.get() as i64,
                targets_json,
                text_lines_json,
                job.next_index as i64,
                job.status.as_str(),
                format_time(Utc::now()),
            ],
        )
        .map_err(db_err)?;

        let mut stmt = conn
            .prepare(
                "INSERT INTO queue_items (job_id, line_number, line, user_id, status, sent_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .map_err(db_err)?;
        for item in queue {
            stmt.execute(params![
                job.id,
                item.line_number as i64,
                item.line,
                item.user_id,
                item.status.as_str(),
                item.sent_at.map(format_time),
            ])
            .map_err(db_err)?;
        }
        Ok(())
    }

    fn job_exists(conn: &Connection, job_id: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?)",
            params![job_id],
            |row| row.get(0),
        )
    }
}

impl ProgressStore for SqliteProgressStore {
    fn insert_job(&self, job: &DistributionJob, queue: &[QueueItem]) -> Result<(), PersistError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        Self::insert_rows(&tx, job, queue)?;
        tx.commit().map_err(db_err)
    }

    fn upsert_progress(&self, job: &DistributionJob) -> Result<(), PersistError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        if Self::job_exists(&tx, &job.id).map_err(db_err)? {
            // Terminal rows are frozen: a late write can never revive them.
            tx.execute(
                "UPDATE jobs SET next_index = ?, status = ?, updated_at = ? WHERE id = ? AND status = 'running'",
                params![
                    job.next_index as i64,
                    job.status.as_str(),
                    format_time(Utc::now()),
                    job.id,
                ],
            )
            .map_err(db_err)?;
        } else {
            // The creation write was lost; store the job with its full queue.
            let queue = build_queue(&job.targets, job.lines_per_tick, &job.text_lines);
            Self::insert_rows(&tx, job, &queue)?;
        }

        tx.commit().map_err(db_err)
    }

    fn mark_sent_through(
        &self,
        job_id: &str,
        through: usize,
        sent_at: DateTime<Utc>,
    ) -> Result<usize, PersistError> {
        let conn = self.conn()?;

        let updated = conn
            .execute(
                "UPDATE queue_items SET status = ?, sent_at = ? WHERE job_id = ? AND line_number <= ? AND status != ?",
                params![
                    LineStatus::Sent.as_str(),
                    format_time(sent_at),
                    job_id,
                    through as i64,
                    LineStatus::Sent.as_str(),
                ],
            )
            .map_err(db_err)?;

        Ok(updated)
    }

    fn load_queue(&self, job_id: &str) -> Result<Option<Vec<QueueItem>>, PersistError> {
        let conn = self.conn()?;

        if !Self::job_exists(&conn, job_id).map_err(db_err)? {
            return Ok(None);
        }

        Self::query_queue(&conn, job_id).map(Some).map_err(db_err)
    }

    fn load_job(&self, job_id: &str) -> Result<Option<DistributionJob>, PersistError> {
        let conn = self.conn()?;

        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![job_id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db_err)
    }

    fn list_history(
        &self,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<QueueHistoryEntry>, PersistError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, status, created_at FROM jobs WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
            )
            .map_err(db_err)?;

        let heads = stmt
            .query_map(params![owner_id, limit], |row| {
                let status: String = row.get(1)?;
                let created_at: String = row.get(2)?;
                Ok((
                    row.get::<_, String>(0)?,
                    status.parse::<JobStatus>().map_err(|e| conversion_err(1, e))?,
                    parse_time(2, &created_at)?,
                ))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let mut entries = Vec::with_capacity(heads.len());
        for (id, status, created_at) in heads {
            let queue = Self::query_queue(&conn, &id).map_err(db_err)?;
            entries.push(QueueHistoryEntry {
                id,
                status,
                created_at,
                queue,
            });
        }

        Ok(entries)
    }

    fn list_running(&self, limit: i64) -> Result<Vec<DistributionJob>, PersistError> {
        let conn = self.conn()?;

        let sql = format!(
            "SELECT {} FROM jobs WHERE status = ? ORDER BY created_at ASC, rowid ASC LIMIT ?",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;

        let rows = stmt
            .query_map(
                params![JobStatus::Running.as_str(), limit],
                Self::row_to_job,
            )
            .map_err(db_err)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> PersistError {
    PersistError::Database(e.to_string())
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn format_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e.to_string()))
}
