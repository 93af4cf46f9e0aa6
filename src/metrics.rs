//! Prometheus metrics for the worker.

use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry};

use crate::error::MetricsError;
use crate::job::JobStatus;

/// Job lifecycle metrics exposed on the worker's `/metrics` route.
pub struct Metrics {
    registry: Registry,
    /// Jobs newly created by a request.
    pub jobs_created: IntCounter,
    /// Requests answered with an existing job.
    pub jobs_reused: IntCounter,
    /// Jobs that reached a terminal status, by status.
    pub jobs_finished: CounterVec,
    /// Jobs failed by startup recovery.
    pub jobs_recovered: IntCounter,
    /// Pipelines currently running.
    pub jobs_in_progress: Gauge,
    /// Wall time of a pipeline run in seconds.
    pub pipeline_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let jobs_created = IntCounter::new(
            "video_jobs_created_total",
            "Number of jobs created by requests",
        )?;
        let jobs_reused = IntCounter::new(
            "video_jobs_reused_total",
            "Number of requests answered with an existing job",
        )?;
        let jobs_finished = CounterVec::new(
            Opts::new("video_jobs_finished_total", "Jobs that reached a terminal status"),
            &["status"],
        )?;
        let jobs_recovered = IntCounter::new(
            "video_jobs_recovered_total",
            "Jobs failed at startup because they were interrupted",
        )?;
        let jobs_in_progress = Gauge::new(
            "video_jobs_in_progress",
            "Number of pipelines currently running",
        )?;
        let pipeline_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "video_pipeline_duration_seconds",
                "Time from pipeline start to terminal status in seconds",
            )
            .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        )?;

        registry.register(Box::new(jobs_created.clone()))?;
        registry.register(Box::new(jobs_reused.clone()))?;
        registry.register(Box::new(jobs_finished.clone()))?;
        registry.register(Box::new(jobs_recovered.clone()))?;
        registry.register(Box::new(jobs_in_progress.clone()))?;
        registry.register(Box::new(pipeline_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            jobs_created,
            jobs_reused,
            jobs_finished,
            jobs_recovered,
            jobs_in_progress,
            pipeline_duration_seconds,
        })
    }

    /// Records a job reaching `status` after `duration_secs` of pipeline time.
    pub fn record_finished(&self, status: JobStatus, duration_secs: f64) {
        self.jobs_finished
            .with_label_values(&[status.as_str()])
            .inc();
        self.pipeline_duration_seconds.observe(duration_secs);
    }

    pub fn set_jobs_in_progress(&self, count: usize) {
        self.jobs_in_progress.set(count as f64);
    }

    /// Returns the metrics in Prometheus text format.
    pub fn gather(&self) -> Result<String, MetricsError> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
