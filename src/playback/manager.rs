//! Playback manager: cached play requests, job polling, download, playback.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::cache::{CacheKey, LocalCache};
use super::monitor::{JobMonitor, PollOutcome};
use super::supervisor::{PlaybackSupervisor, PlayerState};
use crate::config::PollConfig;
use crate::error::{ClientError, PlaybackError};
use crate::job::{JobRecord, JobRequest, JobStatus};
use crate::remote::WorkerApi;
use crate::store::{normalize_hash, run_blocking, ContentStore};

/// How a play request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PlayOutcome {
    /// Local cache hit. No job was submitted.
    Cache { hash: String },
    /// A job was submitted or reused and is now tracked.
    Job { job: JobRecord },
}

/// Orchestrator status for the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub has_download_job: bool,
    pub download_job_status: Option<JobStatus>,
    pub is_playing: bool,
    pub player_state: PlayerState,
}

/// Ties the worker client, local cache, job monitor and supervisor together.
#[derive(Clone)]
pub struct PlaybackManager {
    api: Arc<dyn WorkerApi>,
    cache: LocalCache,
    mirror: ContentStore,
    monitor: JobMonitor,
    supervisor: PlaybackSupervisor,
    poll: PollConfig,
    sweep_interval: Duration,
    wake: Arc<Notify>,
}

impl PlaybackManager {
    pub fn new(
        api: Arc<dyn WorkerApi>,
        cache: LocalCache,
        mirror: ContentStore,
        supervisor: PlaybackSupervisor,
        poll: PollConfig,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            mirror,
            monitor: JobMonitor::new(),
            supervisor,
            poll,
            sweep_interval,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn monitor(&self) -> &JobMonitor {
        &self.monitor
    }

    pub fn supervisor(&self) -> &PlaybackSupervisor {
        &self.supervisor
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn mirror(&self) -> &ContentStore {
        &self.mirror
    }

    /// Plays from the local cache when possible, otherwise submits a job.
    pub async fn play_video_cached(&self, request: &JobRequest) -> Result<PlayOutcome, PlaybackError> {
        let key = CacheKey::new(&request.url, request.mirror_video, request.flip_video);

        let cache = self.cache.clone();
        let lookup_key = key.clone();
        if let Some(entry) = run_blocking(move || cache.lookup(&lookup_key)).await? {
            info!(url = %request.url, hash = %entry.hash, "Local cache hit");
            let ticket = self.monitor.begin_request();
            self.monitor.abandon();

            match self.download_and_play(&entry.hash, ticket).await {
                Ok(()) => return Ok(PlayOutcome::Cache { hash: entry.hash }),
                Err(PlaybackError::Client(ClientError::ArtifactNotFound(hash))) => {
                    warn!(hash = %hash, "Cached artifact is gone locally and on the worker");
                    let cache = self.cache.clone();
                    run_blocking(move || cache.remove(entry.id)).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let job = self.play_video(request).await?;
        Ok(PlayOutcome::Job { job })
    }

    /// Submits a job and tracks it. Playback starts once it is done.
    pub async fn play_video(&self, request: &JobRequest) -> Result<JobRecord, PlaybackError> {
        let ticket = self.monitor.begin_request();
        info!(
            url = %request.url,
            mirror = request.mirror_video,
            flip = request.flip_video,
            "Requesting job for video"
        );

        let job = self.api.create_job(request).await?;
        info!(job_id = %job.job_id, status = %job.status, "Worker returned job");

        let key = CacheKey::new(&request.url, request.mirror_video, request.flip_video);
        if self.monitor.track(job.clone(), key, ticket) {
            self.wake.notify_one();
        }
        Ok(job)
    }

    /// Submits a job so the worker has the artifact ready later. Not tracked.
    pub async fn prefetch(&self, request: &JobRequest) -> Result<JobRecord, PlaybackError> {
        let job = self.api.create_job(request).await?;
        info!(job_id = %job.job_id, url = %request.url, "Prefetch job submitted");
        Ok(job)
    }

    /// Plays `url` directly, bypassing jobs and caches.
    pub async fn stream_video(&self, url: &str) -> Result<(), PlaybackError> {
        let ticket = self.monitor.begin_request();
        self.monitor.abandon();
        info!(url = %url, "Streaming video");
        self.play_if_current(url, ticket).await.map(|_| ())
    }

    /// Drops the tracked job, voids pending requests and signals the player.
    /// Returns whether a player was running.
    pub fn stop(&self) -> bool {
        self.monitor.cancel();
        self.supervisor.kill()
    }

    /// Deletes every mirrored artifact, then drops the cache entries that pointed at them.
    pub async fn clear_cache(&self) -> Result<usize, PlaybackError> {
        let mirror = self.mirror.clone();
        let deleted = run_blocking(move || mirror.clear()).await?;
        self.sweep_cache().await?;
        Ok(deleted)
    }

    /// Removes cache entries whose file is no longer in the mirror.
    pub async fn sweep_cache(&self) -> Result<usize, PlaybackError> {
        let cache = self.cache.clone();
        let mirror = self.mirror.clone();
        Ok(run_blocking(move || cache.sweep(|entry| mirror.contains(&entry.hash))).await?)
    }

    pub fn status(&self) -> PlaybackStatus {
        let snapshot = self.monitor.snapshot();
        PlaybackStatus {
            has_download_job: snapshot.job.is_some(),
            download_job_status: snapshot.last_status,
            is_playing: self.supervisor.is_playing(),
            player_state: self.supervisor.state(),
        }
    }

    /// Polls the tracked job once and acts on a terminal answer.
    pub async fn check_job(&self) {
        let outcome = self.monitor.poll_once(self.api.as_ref()).await;
        let PollOutcome::Done {
            job_id,
            hash,
            key,
            ticket,
        } = outcome
        else {
            return;
        };

        let path = match self.ensure_local(&hash).await {
            Ok(path) => path,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "An error occured while downloading video");
                return;
            }
        };

        let cache = self.cache.clone();
        let (entry_hash, entry_job) = (hash.clone(), job_id.clone());
        if let Err(e) = run_blocking(move || cache.insert(&key, &entry_hash, &entry_job)).await {
            warn!(job_id = %job_id, error = %e, "Failed to record cache entry");
        }

        if let Err(e) = self.play_if_current(&path.to_string_lossy(), ticket).await {
            error!(job_id = %job_id, error = %e, "Failed to start playback");
        }
    }

    /// Ticks the monitor and sweeps the cache until the task is dropped.
    pub async fn run(&self) {
        let mut tick = tokio::time::interval(self.poll.tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_check: u32 = 0;

        info!(
            check_interval_ms = self.poll.check_interval().as_millis() as u64,
            "Playback manager started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if next_check == 0 {
                        next_check = self.poll.ticks_per_check;
                        self.check_job().await;
                    } else {
                        next_check -= 1;
                    }
                }
                _ = self.wake.notified() => {
                    next_check = 0;
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep_cache().await {
                        warn!(error = %e, "Cache sweep failed");
                    }
                }
            }
        }
    }

    async fn download_and_play(&self, hash: &str, ticket: u64) -> Result<(), PlaybackError> {
        let path = self.ensure_local(hash).await?;
        self.play_if_current(&path.to_string_lossy(), ticket).await.map(|_| ())
    }

    /// Starts `source` unless a newer request or a stop has replaced `ticket`.
    async fn play_if_current(&self, source: &str, ticket: u64) -> Result<bool, PlaybackError> {
        let monitor = &self.monitor;
        let started = self
            .supervisor
            .start_playback_if(source, || monitor.is_current(ticket))
            .await?;
        if !started {
            info!(source = %source, ticket, "Request was superseded, not starting playback");
        }
        Ok(started)
    }

    /// Returns the mirror path for `hash`, downloading it first if absent.
    async fn ensure_local(&self, hash: &str) -> Result<PathBuf, PlaybackError> {
        let hash = normalize_hash(hash)
            .ok_or_else(|| PlaybackError::MissingArtifact(hash.to_string()))?;
        let path = absolute(self.mirror.path_for(&hash));
        if path.is_file() {
            info!(hash = %hash, "Video already in cache. Skipping download");
        } else {
            self.api.download(&hash, &path).await?;
        }
        Ok(path)
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .map(|dir| dir.join(&path))
        .unwrap_or(path)
}
