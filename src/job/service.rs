//! Worker-side job orchestration: dedup, background pipelines, recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{JobRecord, JobRequest};
use crate::error::{PipelineError, StoreError};
use crate::metrics::Metrics;
use crate::store::{run_blocking, ContentStore, JobStore};
use crate::transcode::TranscodePipeline;

/// Error message given to jobs found unfinished at startup.
pub const INTERRUPTED_MESSAGE: &str = "Worker restarted while the job was in progress";

/// Creates jobs and drives each one through the pipeline in the background.
///
/// Cloning is cheap; clones share the same task registry.
#[derive(Clone)]
pub struct JobService {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: JobStore,
    pipeline: TranscodePipeline,
    metrics: Option<Arc<Metrics>>,
    dedup_on_flip: bool,
    /// Serializes the find-or-insert in `create_job`.
    create_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Collects optional settings before the service is shared.
pub struct JobServiceBuilder {
    jobs: JobStore,
    pipeline: TranscodePipeline,
    metrics: Option<Arc<Metrics>>,
    dedup_on_flip: bool,
}

impl JobServiceBuilder {
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Also requires equal `flipVideo` when reusing a job.
    pub fn dedup_on_flip(mut self, enabled: bool) -> Self {
        self.dedup_on_flip = enabled;
        self
    }

    pub fn build(self) -> JobService {
        JobService {
            inner: Arc::new(Inner {
                jobs: self.jobs,
                pipeline: self.pipeline,
                metrics: self.metrics,
                dedup_on_flip: self.dedup_on_flip,
                create_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl JobService {
    pub fn builder(jobs: JobStore, pipeline: TranscodePipeline) -> JobServiceBuilder {
        JobServiceBuilder {
            jobs,
            pipeline,
            metrics: None,
            dedup_on_flip: false,
        }
    }

    /// A service without metrics that dedups on `(url, mirror)`.
    pub fn new(jobs: JobStore, pipeline: TranscodePipeline) -> Self {
        Self::builder(jobs, pipeline).build()
    }

    pub fn jobs(&self) -> &JobStore {
        &self.inner.jobs
    }

    pub fn content(&self) -> &ContentStore {
        self.inner.pipeline.store()
    }

    /// Fails every job left unfinished by a previous process. Call before serving.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let failed = self.inner.jobs.fail_interrupted(INTERRUPTED_MESSAGE)?;
        if let Some(metrics) = &self.inner.metrics {
            metrics.jobs_recovered.inc_by(failed.len() as u64);
        }
        if !failed.is_empty() {
            warn!(count = failed.len(), "Failed interrupted jobs from previous run");
        }
        Ok(failed.len())
    }

    /// Returns the reusable job for this request, or persists a new one and starts it.
    pub async fn create_job(&self, request: &JobRequest) -> Result<JobRecord, StoreError> {
        let _guard = self.inner.create_lock.lock().await;

        let flip = self.inner.dedup_on_flip.then_some(request.flip_video);
        let jobs = self.inner.jobs.clone();
        let url = request.url.clone();
        let mirror = request.mirror_video;
        let existing = run_blocking(move || jobs.find_reusable(&url, mirror, flip)).await?;
        if let Some(existing) = existing {
            info!(
                job_id = %existing.job_id,
                status = %existing.status,
                "Reusing existing job for url"
            );
            if let Some(metrics) = &self.inner.metrics {
                metrics.jobs_reused.inc();
            }
            return Ok(existing);
        }

        let job = JobRecord::new(&request.url, request.mirror_video, request.flip_video);
        let jobs = self.inner.jobs.clone();
        let record = job.clone();
        run_blocking(move || jobs.insert(&record)).await?;
        info!(
            job_id = %job.job_id,
            url = %job.video_url,
            mirror = job.mirror_video,
            flip = job.flip_video,
            "Job created"
        );
        if let Some(metrics) = &self.inner.metrics {
            metrics.jobs_created.inc();
        }

        self.spawn_pipeline(job.clone());
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let jobs = self.inner.jobs.clone();
        let job_id = job_id.to_string();
        run_blocking(move || jobs.get(&job_id)).await
    }

    /// Number of pipelines currently running.
    pub fn in_flight(&self) -> usize {
        self.tasks().len()
    }

    /// Waits for the pipeline of `job_id` if one is running.
    pub async fn join(&self, job_id: &str) {
        let handle = self.tasks().remove(job_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(job_id, error = %e, "Pipeline supervisor ended abnormally");
            }
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_pipeline(&self, job: JobRecord) {
        let job_id = job.job_id.clone();
        let service = self.clone();

        let mut tasks = self.tasks();
        let handle = tokio::spawn(async move { service.supervise(job).await });
        tasks.insert(job_id, handle);
        self.update_gauge(tasks.len());
    }

    /// Runs the pipeline in its own task so a panic still ends in a terminal status.
    async fn supervise(self, job: JobRecord) {
        let started = Instant::now();
        let job_id = job.job_id.clone();

        let inner = self.inner.clone();
        let run = tokio::spawn(async move {
            let mut job = job;
            let result = inner.pipeline.run(&mut job, &inner.jobs).await;
            (job, result)
        });

        let outcome = match run.await {
            Ok(outcome) => Some(outcome),
            Err(e) => match self.get_job(&job_id).await {
                Ok(Some(job)) => Some((job, Err(PipelineError::Aborted(e.to_string())))),
                Ok(None) => {
                    error!(job_id = %job_id, "Aborted job vanished from the store");
                    None
                }
                Err(store_err) => {
                    error!(job_id = %job_id, error = %store_err, "Failed to reload aborted job");
                    None
                }
            },
        };

        if let Some((mut job, result)) = outcome {
            self.finish(&mut job, result).await;
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_finished(job.status, started.elapsed().as_secs_f64());
            }
        }

        let mut tasks = self.tasks();
        tasks.remove(&job_id);
        self.update_gauge(tasks.len());
    }

    async fn finish(&self, job: &mut JobRecord, result: Result<String, PipelineError>) {
        let transition = match result {
            Ok(hash) => job.complete(hash),
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "Job failed");
                job.fail(e.to_string())
            }
        };
        if let Err(e) = transition {
            error!(job_id = %job.job_id, error = %e, "Job could not reach a terminal status");
            if job.fail(e.to_string()).is_err() {
                return;
            }
        }

        let jobs = self.inner.jobs.clone();
        let record = job.clone();
        match run_blocking(move || jobs.save(&record)).await {
            Ok(()) => info!(job_id = %job.job_id, status = %job.status, "Job status changed"),
            Err(e) => error!(job_id = %job.job_id, error = %e, "Failed to persist job result"),
        }
    }

    fn update_gauge(&self, count: usize) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_jobs_in_progress(count);
        }
    }
}
