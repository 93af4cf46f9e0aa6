//! Sqlite-backed job record table.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use super::sqlite::{ensure_parent_dir, open_connection};
use crate::error::StoreError;
use crate::job::{JobRecord, JobStatus};

const JOB_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS video_downloader_job (
    job_id        TEXT PRIMARY KEY NOT NULL,
    created_at    TEXT NOT NULL,
    status        TEXT NOT NULL,
    video_url     TEXT NOT NULL,
    mirror_video  INTEGER NOT NULL,
    flip_video    INTEGER NOT NULL,
    output_hash   TEXT,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_job_dedup
    ON video_downloader_job (video_url, mirror_video, status);
";

const JOB_COLUMNS: &str =
    "job_id, created_at, status, video_url, mirror_video, flip_video, output_hash, error_message";

/// Durable table of job records. Survives worker restarts.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    /// Opens the store at `path`, creating the file and schema if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;
        let store = Self { path };
        store.connect()?.execute_batch(JOB_SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        open_connection(&self.path)
    }

    /// Inserts a new record.
    pub fn insert(&self, job: &JobRecord) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO video_downloader_job (
                job_id, created_at, status, video_url, mirror_video, flip_video,
                output_hash, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &job.job_id,
                job.created_at,
                job.status.as_str(),
                &job.video_url,
                job.mirror_video,
                job.flip_video,
                &job.output_hash,
                &job.error_message,
            ],
        )?;
        Ok(())
    }

    /// Persists the mutable fields of an existing record.
    pub fn save(&self, job: &JobRecord) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let affected = conn.execute(
            "UPDATE video_downloader_job
             SET status = ?2, output_hash = ?3, error_message = ?4
             WHERE job_id = ?1",
            params![
                &job.job_id,
                job.status.as_str(),
                &job.output_hash,
                &job.error_message,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::Corrupt(format!(
                "job {} vanished before it could be saved",
                job.job_id
            )));
        }
        Ok(())
    }

    /// Gets a job by its id.
    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM video_downloader_job WHERE job_id = ?1",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(&sql, [job_id], job_from_row)
            .optional()?;
        Ok(job)
    }

    /// Finds the newest job for `(url, mirror)` that has not failed.
    ///
    /// When `flip_video` is given the job must also match on flip.
    pub fn find_reusable(
        &self,
        video_url: &str,
        mirror_video: bool,
        flip_video: Option<bool>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM video_downloader_job
             WHERE video_url = ?1 AND mirror_video = ?2 AND status != ?3
               AND (?4 IS NULL OR flip_video = ?4)
             ORDER BY created_at DESC
             LIMIT 1",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(
                &sql,
                params![video_url, mirror_video, JobStatus::Failed.as_str(), flip_video],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Lists the most recent jobs, newest first.
    pub fn list(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM video_downloader_job ORDER BY created_at DESC LIMIT ?1",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([limit as i64], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Marks every non-terminal job as failed. Returns the jobs that changed.
    ///
    /// Called once at startup, before any pipeline runs, so every
    /// non-terminal record belongs to a process that died mid-job.
    pub fn fail_interrupted(&self, reason: &str) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {} FROM video_downloader_job WHERE status NOT IN (?1, ?2)",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let interrupted = stmt
            .query_map(
                params![JobStatus::Done.as_str(), JobStatus::Failed.as_str()],
                job_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut failed = Vec::with_capacity(interrupted.len());
        for mut job in interrupted {
            let from = job.status;
            if let Err(e) = job.fail(reason) {
                warn!(job_id = %job.job_id, error = %e, "Skipping unrecoverable job record");
                continue;
            }
            self.save(&job)?;
            info!(
                job_id = %job.job_id,
                from = %from,
                "Marking job as failed since it was unfinished during startup"
            );
            failed.push(job);
        }
        Ok(failed)
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status_raw: String = row.get(2)?;
    let status = JobStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            Box::new(StoreError::Corrupt(format!("unknown job status '{}'", status_raw))),
        )
    })?;
    let created_at: DateTime<Utc> = row.get(1)?;

    Ok(JobRecord {
        job_id: row.get(0)?,
        created_at,
        status,
        video_url: row.get(3)?,
        mirror_video: row.get(4)?,
        flip_video: row.get(5)?,
        output_hash: row.get(6)?,
        error_message: row.get(7)?,
    })
}
