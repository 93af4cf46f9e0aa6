//! HTTP client for the worker API.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ClientError;
use crate::job::{JobRecord, JobRequest};
use crate::store::content::remove_file_if_exists;

/// Operations the orchestrator needs from a worker.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    /// Submits a job. The worker may answer with an existing job for the same source.
    async fn create_job(&self, request: &JobRequest) -> Result<JobRecord, ClientError>;

    /// Fetches a job. `Ok(None)` means the worker definitively does not know the id.
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, ClientError>;

    /// Downloads the artifact `hash` to `destination`, verifying its content hash.
    async fn download(&self, hash: &str, destination: &Path) -> Result<(), ClientError>;
}

/// [`WorkerApi`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    base: Url,
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base =
            Url::parse(base_url).map_err(|_| ClientError::InvalidUrl(base_url.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { base, http })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|_| ClientError::InvalidUrl(format!("{}{}", self.base, path)))
    }
}

#[async_trait]
impl WorkerApi for WorkerClient {
    async fn create_job(&self, request: &JobRequest) -> Result<JobRecord, ClientError> {
        let job = self
            .http
            .post(self.endpoint("job")?)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json::<JobRecord>()
            .await?;
        debug!(job_id = %job.job_id, status = %job.status, "Worker accepted job");
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, ClientError> {
        let response = self
            .http
            .get(self.endpoint(&format!("job/{}", job_id))?)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let job = response.error_for_status()?.json::<JobRecord>().await?;
        Ok(Some(job))
    }

    async fn download(&self, hash: &str, destination: &Path) -> Result<(), ClientError> {
        let response = self
            .http
            .get(self.endpoint(&format!("download/{}", hash))?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::ArtifactNotFound(hash.to_string()));
        }
        let response = response.error_for_status()?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ClientError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let partial = partial_path(destination);
        let actual = match write_stream(response, &partial).await {
            Ok(actual) => actual,
            Err(e) => {
                remove_file_if_exists(&partial).await;
                return Err(e);
            }
        };
        if actual != hash {
            warn!(expected = %hash, actual = %actual, "Downloaded artifact failed verification");
            remove_file_if_exists(&partial).await;
            return Err(ClientError::HashMismatch {
                expected: hash.to_string(),
                actual,
            });
        }

        tokio::fs::rename(&partial, destination)
            .await
            .map_err(|source| ClientError::Io {
                path: destination.to_path_buf(),
                source,
            })?;
        info!(hash = %hash, path = ?destination, "Artifact downloaded");
        Ok(())
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Streams the body to `path` and returns the hex SHA-256 of what was written.
async fn write_stream(response: reqwest::Response, path: &Path) -> Result<String, ClientError> {
    let io_error = |source| ClientError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let data = chunk?;
        hasher.update(&data);
        file.write_all(&data).await.map_err(io_error)?;
    }
    file.flush().await.map_err(io_error)?;

    Ok(hex::encode(hasher.finalize()))
}
