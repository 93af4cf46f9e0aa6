//! Single-slot tracking of the job the orchestrator is waiting on.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, info, warn};

use super::cache::CacheKey;
use crate::job::{JobRecord, JobStatus};
use crate::remote::WorkerApi;

/// Result of one poll of the tracked job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing tracked, or tracking is canceled.
    Idle,
    /// Still in progress with this status.
    Pending(JobStatus),
    /// Finished. Tracking stopped.
    Done {
        job_id: String,
        hash: String,
        key: CacheKey,
        /// Ticket of the request that submitted the job.
        ticket: u64,
    },
    /// Failed on the worker. Tracking stopped.
    Failed { job_id: String, message: String },
    /// The worker does not know the job. Tracking stopped.
    NotFound { job_id: String },
    /// The worker could not be reached. Retried on the next check.
    TransportError,
}

/// What `/status` reports about the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub job: Option<JobRecord>,
    /// Last status observed, kept after tracking ends.
    pub last_status: Option<JobStatus>,
    pub canceled: bool,
}

#[derive(Debug, Clone)]
struct TrackedJob {
    job: JobRecord,
    key: CacheKey,
    ticket: u64,
}

#[derive(Debug, Default)]
struct MonitorSlot {
    tracked: Option<TrackedJob>,
    last_status: Option<JobStatus>,
    canceled: bool,
    /// Ticket of the newest request. Bumped by every request and every stop.
    generation: u64,
}

/// Tracks at most one job. Tracking a new job replaces the previous one.
///
/// Every play request takes a ticket from [`JobMonitor::begin_request`].
/// Only the holder of the newest ticket may start playback.
#[derive(Debug, Clone, Default)]
pub struct JobMonitor {
    slot: Arc<Mutex<MonitorSlot>>,
}

impl JobMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, MonitorSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts a new play request and returns its ticket. Clears a previous cancel.
    pub fn begin_request(&self) -> u64 {
        let mut slot = self.slot();
        slot.canceled = false;
        slot.generation += 1;
        slot.generation
    }

    /// True if `ticket` is the newest request and no stop arrived after it.
    pub fn is_current(&self, ticket: u64) -> bool {
        let slot = self.slot();
        !slot.canceled && slot.generation == ticket
    }

    /// Starts tracking `job` for the request holding `ticket`.
    ///
    /// Refused if a newer request or a stop arrived since the ticket was taken.
    pub fn track(&self, job: JobRecord, key: CacheKey, ticket: u64) -> bool {
        let mut slot = self.slot();
        if slot.canceled || slot.generation != ticket {
            info!(job_id = %job.job_id, "Request was superseded before the job was accepted");
            return false;
        }
        if let Some(previous) = &slot.tracked {
            if previous.job.job_id != job.job_id {
                info!(job_id = %previous.job.job_id, "Abandoning tracked job");
            }
        }
        info!(job_id = %job.job_id, status = %job.status, "Tracking job");
        slot.tracked = Some(TrackedJob { job, key, ticket });
        true
    }

    /// Stops tracking without canceling future requests.
    pub fn abandon(&self) {
        self.slot().tracked = None;
    }

    /// Stops tracking and invalidates every outstanding ticket.
    pub fn cancel(&self) {
        let mut slot = self.slot();
        slot.canceled = true;
        slot.generation += 1;
        if let Some(tracked) = slot.tracked.take() {
            info!(job_id = %tracked.job.job_id, "Stopped tracking job");
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let slot = self.slot();
        MonitorSnapshot {
            job: slot.tracked.as_ref().map(|tracked| tracked.job.clone()),
            last_status: slot.last_status,
            canceled: slot.canceled,
        }
    }

    /// Queries the worker once for the tracked job.
    ///
    /// No lock is held across the request; if tracking changed meanwhile the
    /// answer is dropped.
    pub async fn poll_once(&self, api: &dyn WorkerApi) -> PollOutcome {
        let (job_id, ticket) = {
            let slot = self.slot();
            match (&slot.tracked, slot.canceled) {
                (Some(tracked), false) => (tracked.job.job_id.clone(), tracked.ticket),
                _ => return PollOutcome::Idle,
            }
        };

        let result = api.get_job(&job_id).await;

        let mut slot = self.slot();
        let still_tracked = slot
            .tracked
            .as_ref()
            .map(|tracked| tracked.job.job_id == job_id && tracked.ticket == ticket)
            .unwrap_or(false);
        if !still_tracked {
            return PollOutcome::Idle;
        }

        let job = match result {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!(job_id = %job_id, "Job was not found on the worker");
                slot.tracked = None;
                return PollOutcome::NotFound { job_id };
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to poll job, retrying next check");
                return PollOutcome::TransportError;
            }
        };

        if slot.last_status != Some(job.status) {
            info!(
                job_id = %job_id,
                from = ?slot.last_status.map(|s| s.as_str()),
                to = %job.status,
                "Job changed status"
            );
            slot.last_status = Some(job.status);
        }

        match job.status {
            JobStatus::Done => {
                let tracked = slot.tracked.take();
                match (job.output_hash, tracked) {
                    (Some(hash), Some(tracked)) => {
                        info!(job_id = %job_id, "Job is done, downloading and starting playback");
                        PollOutcome::Done {
                            job_id,
                            hash,
                            key: tracked.key,
                            ticket,
                        }
                    }
                    _ => {
                        error!(job_id = %job_id, "Job finished without an output hash");
                        PollOutcome::Failed {
                            job_id,
                            message: "Video hash was missing after success".to_string(),
                        }
                    }
                }
            }
            JobStatus::Failed => {
                let message = job.error_message.unwrap_or_default();
                error!(job_id = %job_id, error = %message, "Job failed");
                slot.tracked = None;
                PollOutcome::Failed { job_id, message }
            }
            status => {
                if let Some(tracked) = slot.tracked.as_mut() {
                    tracked.job = job;
                }
                PollOutcome::Pending(status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::job::JobRequest;
    use async_trait::async_trait;
    use std::path::Path;

    /// Answers `get_job` from a fixed script.
    struct ScriptedWorker {
        answers: Mutex<Vec<Result<Option<JobRecord>, ClientError>>>,
    }

    impl ScriptedWorker {
        fn new(mut answers: Vec<Result<Option<JobRecord>, ClientError>>) -> Self {
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
            }
        }
    }

    #[async_trait]
    impl WorkerApi for ScriptedWorker {
        async fn create_job(&self, _request: &JobRequest) -> Result<JobRecord, ClientError> {
            unreachable!("monitor never creates jobs")
        }

        async fn get_job(&self, _job_id: &str) -> Result<Option<JobRecord>, ClientError> {
            self.answers.lock().unwrap().pop().unwrap_or(Ok(None))
        }

        async fn download(&self, _hash: &str, _destination: &Path) -> Result<(), ClientError> {
            unreachable!("monitor never downloads")
        }
    }

    fn job_with(job: &JobRecord, status: JobStatus) -> JobRecord {
        let mut next = job.clone();
        next.status = status;
        if status == JobStatus::Done {
            next.output_hash = Some("ab".repeat(32));
        }
        next
    }

    #[tokio::test]
    async fn follows_job_until_done() {
        let job = JobRecord::new("https://example.com/v", false, false);
        let key = CacheKey::new(&job.video_url, false, false);
        let worker = ScriptedWorker::new(vec![
            Ok(Some(job_with(&job, JobStatus::Downloading))),
            Err(ClientError::InvalidUrl("down".into())),
            Ok(Some(job_with(&job, JobStatus::Done))),
        ]);
        let monitor = JobMonitor::new();
        let ticket = monitor.begin_request();
        assert!(monitor.track(job.clone(), key.clone(), ticket));

        assert_eq!(
            monitor.poll_once(&worker).await,
            PollOutcome::Pending(JobStatus::Downloading)
        );
        assert_eq!(monitor.poll_once(&worker).await, PollOutcome::TransportError);
        assert_eq!(
            monitor.poll_once(&worker).await,
            PollOutcome::Done {
                job_id: job.job_id.clone(),
                hash: "ab".repeat(32),
                key,
                ticket,
            }
        );
        let snapshot = monitor.snapshot();
        assert!(snapshot.job.is_none());
        assert_eq!(snapshot.last_status, Some(JobStatus::Done));
        assert_eq!(monitor.poll_once(&worker).await, PollOutcome::Idle);
    }

    #[tokio::test]
    async fn not_found_stops_tracking() {
        let job = JobRecord::new("https://example.com/v", false, false);
        let worker = ScriptedWorker::new(vec![Ok(None)]);
        let monitor = JobMonitor::new();
        let ticket = monitor.begin_request();
        monitor.track(job.clone(), CacheKey::new(&job.video_url, false, false), ticket);

        assert_eq!(
            monitor.poll_once(&worker).await,
            PollOutcome::NotFound {
                job_id: job.job_id.clone()
            }
        );
        assert!(monitor.snapshot().job.is_none());
    }

    #[tokio::test]
    async fn canceled_monitor_neither_polls_nor_tracks() {
        let job = JobRecord::new("https://example.com/v", false, false);
        let key = CacheKey::new(&job.video_url, false, false);
        let worker = ScriptedWorker::new(vec![Ok(Some(job_with(&job, JobStatus::Done)))]);
        let monitor = JobMonitor::new();
        let ticket = monitor.begin_request();
        monitor.track(job.clone(), key.clone(), ticket);
        monitor.cancel();

        assert!(monitor.snapshot().job.is_none());
        assert!(monitor.snapshot().canceled);
        assert!(!monitor.is_current(ticket));
        assert_eq!(monitor.poll_once(&worker).await, PollOutcome::Idle);
        assert!(!monitor.track(job.clone(), key.clone(), ticket));

        let next = monitor.begin_request();
        assert!(monitor.is_current(next));
        assert!(monitor.track(job, key, next));
    }

    #[test]
    fn newer_request_supersedes_older_ticket() {
        let monitor = JobMonitor::new();
        let older = monitor.begin_request();
        let newer = monitor.begin_request();

        assert!(!monitor.is_current(older));
        assert!(monitor.is_current(newer));

        let job = JobRecord::new("https://example.com/v", false, false);
        let key = CacheKey::new(&job.video_url, false, false);
        assert!(!monitor.track(job.clone(), key.clone(), older));
        assert!(monitor.snapshot().job.is_none());
        assert!(monitor.track(job, key, newer));
    }

    #[tokio::test]
    async fn failed_job_reports_its_message() {
        let job = JobRecord::new("https://example.com/v", true, false);
        let mut failed = job_with(&job, JobStatus::Failed);
        failed.error_message = Some("FFMPEG (Stage 2) exited with non 0 exit code 1".into());
        let worker = ScriptedWorker::new(vec![Ok(Some(failed))]);
        let monitor = JobMonitor::new();
        let ticket = monitor.begin_request();
        monitor.track(job.clone(), CacheKey::new(&job.video_url, true, false), ticket);

        match monitor.poll_once(&worker).await {
            PollOutcome::Failed { message, .. } => assert!(message.contains("Stage 2")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
