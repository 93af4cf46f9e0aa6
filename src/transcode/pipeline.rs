//! Download, resize, optional mirror, commit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::commands::TranscodeSettings;
use super::tools::ToolRunner;
use crate::error::PipelineError;
use crate::job::{JobRecord, JobStatus};
use crate::store::content::remove_file_if_exists;
use crate::store::{run_blocking, ContentStore, JobStore};

/// Runs one job from source URL to committed artifact.
///
/// The pipeline only moves the job through its in-progress statuses. The
/// caller marks it `DONE` or `FAILED` from the returned result.
#[derive(Clone)]
pub struct TranscodePipeline {
    runner: Arc<dyn ToolRunner>,
    settings: TranscodeSettings,
    temp_dir: PathBuf,
    store: ContentStore,
}

impl TranscodePipeline {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        settings: TranscodeSettings,
        temp_dir: impl Into<PathBuf>,
        store: ContentStore,
    ) -> Self {
        Self {
            runner,
            settings,
            temp_dir: temp_dir.into(),
            store,
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Deletes and recreates the scratch directory. Only safe before any job runs.
    pub fn reset_temp_dir(&self) -> Result<(), PipelineError> {
        let io_error = |source| PipelineError::Io {
            path: self.temp_dir.clone(),
            source,
        };
        match std::fs::remove_dir_all(&self.temp_dir) {
            Ok(()) => debug!(path = ?self.temp_dir, "Removed leftover scratch files"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(e)),
        }
        std::fs::create_dir_all(&self.temp_dir).map_err(io_error)
    }

    /// Runs every stage for `job`, persisting each status change. Returns the artifact hash.
    pub async fn run(&self, job: &mut JobRecord, jobs: &JobStore) -> Result<String, PipelineError> {
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|source| PipelineError::Io {
                path: self.temp_dir.clone(),
                source,
            })?;

        set_status(job, jobs, JobStatus::Downloading).await?;
        let fetch = self
            .settings
            .fetch_command(&job.video_url, &self.temp_dir, &job.job_id);
        let code = self.runner.run(&fetch).await?;
        if code != 0 {
            // Some downloaders exit non-zero on warnings; the output file decides.
            debug!(job_id = %job.job_id, code, "Downloader exited with non-zero code");
        }
        let source = self
            .find_download(&job.job_id)
            .ok_or(PipelineError::NoDownloadOutput)?;
        debug!(job_id = %job.job_id, path = ?source, "Download complete");

        set_status(job, jobs, JobStatus::Encoding1).await?;
        let stage1 = self.stage_path(&job.job_id, 1);
        let resize = self
            .settings
            .resize_command(&source, &stage1, job.mirror_video);
        let code = self.runner.run(&resize).await?;
        if code != 0 {
            remove_file_if_exists(&stage1).await;
            remove_file_if_exists(&source).await;
            return Err(PipelineError::EncoderFailed { stage: 1, code });
        }
        remove_file_if_exists(&source).await;

        let output = if job.mirror_video {
            set_status(job, jobs, JobStatus::Encoding2).await?;
            let stage2 = self.stage_path(&job.job_id, 2);
            let stack = self.settings.stack_command(&stage1, &stage2, job.flip_video);
            let code = self.runner.run(&stack).await?;
            if code != 0 {
                remove_file_if_exists(&stage2).await;
                remove_file_if_exists(&stage1).await;
                return Err(PipelineError::EncoderFailed { stage: 2, code });
            }
            remove_file_if_exists(&stage1).await;
            stage2
        } else {
            stage1
        };

        if !output.is_file() {
            warn!(job_id = %job.job_id, path = ?output, "Encoder reported success but wrote no file");
            return Err(PipelineError::Io {
                path: output,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let hash = self.store.commit(&output).await?;
        info!(job_id = %job.job_id, hash = %hash, "Pipeline finished");
        Ok(hash)
    }

    fn stage_path(&self, job_id: &str, stage: u8) -> PathBuf {
        self.temp_dir
            .join(format!("{}_stage{}.{}", job_id, stage, self.settings.extension))
    }

    /// Locates the file the downloader wrote for `job_id`, ignoring its partial files.
    fn find_download(&self, job_id: &str) -> Option<PathBuf> {
        let pattern = format!(
            "{}/{}.*",
            glob::Pattern::escape(&self.temp_dir.to_string_lossy()),
            glob::Pattern::escape(job_id)
        );
        let entries = glob::glob(&pattern).ok()?;
        entries.filter_map(|entry| entry.ok()).find(|path| {
            let partial = path
                .extension()
                .map(|ext| ext == "part" || ext == "ytdl")
                .unwrap_or(false);
            path.is_file() && !partial
        })
    }
}

async fn set_status(
    job: &mut JobRecord,
    jobs: &JobStore,
    status: JobStatus,
) -> Result<(), PipelineError> {
    job.advance(status)?;
    let jobs = jobs.clone();
    let record = job.clone();
    run_blocking(move || jobs.save(&record)).await?;
    info!(job_id = %job.job_id, status = %status, "Job status changed");
    Ok(())
}
