//! Job record definitions and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransitionError;

/// One request to turn a source URL into a device-ready artifact.
///
/// Serialized with the camelCase field names the worker exposes over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique identifier for this job.
    pub job_id: String,

    /// Timestamp when the job was created.
    pub created_at: DateTime<Utc>,

    /// Current status of the job.
    pub status: JobStatus,

    /// Source URL handed to the downloader.
    pub video_url: String,

    /// Whether the output is split and stacked side by side.
    pub mirror_video: bool,

    /// Whether the second stacked copy is flipped horizontally.
    pub flip_video: bool,

    /// Content hash of the finished artifact. Set only once the job is done.
    pub output_hash: Option<String>,

    /// Failure reason. Set only once the job has failed.
    pub error_message: Option<String>,
}

impl JobRecord {
    /// Creates a new job in the `CREATED` state.
    pub fn new(video_url: impl Into<String>, mirror_video: bool, flip_video: bool) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            status: JobStatus::Created,
            video_url: video_url.into(),
            mirror_video,
            flip_video,
            output_hash: None,
            error_message: None,
        }
    }

    /// Returns true once the job is done or failed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the job to the next in-progress status.
    ///
    /// `DONE` and `FAILED` are reached through [`complete`](Self::complete)
    /// and [`fail`](Self::fail) so their payload fields stay consistent.
    pub fn advance(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if to.is_terminal() || !self.status.can_move_to(to, self.mirror_video) {
            return Err(self.transition_error(to));
        }
        self.status = to;
        Ok(())
    }

    /// Marks the job as done with the hash of its committed artifact.
    pub fn complete(&mut self, output_hash: impl Into<String>) -> Result<(), TransitionError> {
        if !self.status.can_move_to(JobStatus::Done, self.mirror_video) {
            return Err(self.transition_error(JobStatus::Done));
        }
        self.status = JobStatus::Done;
        self.output_hash = Some(output_hash.into());
        self.error_message = None;
        Ok(())
    }

    /// Marks the job as failed. Allowed from every non-terminal status.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(self.transition_error(JobStatus::Failed));
        }
        self.status = JobStatus::Failed;
        self.output_hash = None;
        self.error_message = Some(message.into());
        Ok(())
    }

    fn transition_error(&self, to: JobStatus) -> TransitionError {
        TransitionError {
            job_id: self.job_id.clone(),
            from: self.status,
            to,
        }
    }
}

/// Body of a job creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub url: String,
    #[serde(default)]
    pub mirror_video: bool,
    #[serde(default)]
    pub flip_video: bool,
}

impl JobRequest {
    pub fn new(url: impl Into<String>, mirror_video: bool, flip_video: bool) -> Self {
        Self {
            url: url.into(),
            mirror_video,
            flip_video,
        }
    }
}

/// Status of a transcode job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Persisted, pipeline not yet started.
    #[serde(rename = "CREATED")]
    Created,
    /// Source is being fetched.
    #[serde(rename = "DOWNLOADING")]
    Downloading,
    /// Resize encode in progress.
    #[serde(rename = "ENCODING_1")]
    Encoding1,
    /// Mirror/stack encode in progress.
    #[serde(rename = "ENCODING_2")]
    Encoding2,
    /// Terminal failure.
    #[serde(rename = "FAILED")]
    Failed,
    /// Terminal success.
    #[serde(rename = "DONE")]
    Done,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Created,
        JobStatus::Downloading,
        JobStatus::Encoding1,
        JobStatus::Encoding2,
        JobStatus::Failed,
        JobStatus::Done,
    ];

    /// Wire and database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Downloading => "DOWNLOADING",
            Self::Encoding1 => "ENCODING_1",
            Self::Encoding2 => "ENCODING_2",
            Self::Failed => "FAILED",
            Self::Done => "DONE",
        }
    }

    /// Parses the wire representation.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether the linear state machine allows `self -> to`.
    ///
    /// `ENCODING_2` exists only for mirrored jobs; unmirrored jobs go straight
    /// from `ENCODING_1` to `DONE`.
    pub fn can_move_to(&self, to: JobStatus, mirror_video: bool) -> bool {
        use JobStatus::*;

        if self.is_terminal() {
            return false;
        }
        match (self, to) {
            (_, Failed) => true,
            (Created, Downloading) => true,
            (Downloading, Encoding1) => true,
            (Encoding1, Encoding2) => mirror_video,
            (Encoding1, Done) => !mirror_video,
            (Encoding2, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
