//! Worker HTTP API: job creation, job lookup, artifact download, metrics.

use std::sync::Arc;

use futures_util::TryStreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Frame};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};
use uuid::Uuid;

use super::{error_response, full, json_response, not_found, read_json, validate_video_url, ResponseBody};
use crate::error::ApiError;
use crate::job::{JobRequest, JobService};
use crate::metrics::Metrics;
use crate::store::normalize_hash;

/// Shared state for worker routes.
#[derive(Clone)]
pub struct WorkerState {
    pub service: JobService,
    pub metrics: Option<Arc<Metrics>>,
    pub max_url_length: usize,
}

/// Routes one request.
pub async fn handle<B>(state: WorkerState, req: Request<B>) -> Response<ResponseBody>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let result = match (&method, segments.as_slice()) {
        (&Method::POST, ["job"]) => create_job(&state, req).await,
        (&Method::GET, ["job", job_id]) => get_job(&state, job_id).await,
        (&Method::GET, ["download", hash]) => download(&state, hash).await,
        (&Method::GET, ["metrics"]) => metrics(&state),
        _ => Ok(not_found()),
    };

    result.unwrap_or_else(|e| {
        if matches!(e, ApiError::Internal(_)) {
            error!(method = %method, path = %path, error = %e, "Request failed");
        } else {
            debug!(method = %method, path = %path, error = %e, "Request rejected");
        }
        error_response(&e)
    })
}

async fn create_job<B>(state: &WorkerState, req: Request<B>) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request: JobRequest = read_json(req).await?;
    validate_video_url(&request.url, state.max_url_length)?;

    let job = state.service.create_job(&request).await?;
    Ok(json_response(StatusCode::OK, &job))
}

async fn get_job(state: &WorkerState, job_id: &str) -> Result<Response<ResponseBody>, ApiError> {
    if Uuid::parse_str(job_id).is_err() {
        return Err(ApiError::BadRequest("Job id is not valid".to_string()));
    }

    match state.service.get_job(job_id).await? {
        Some(job) => Ok(json_response(StatusCode::OK, &job)),
        None => Err(ApiError::NotFound(format!("Job with id {} not found", job_id))),
    }
}

async fn download(state: &WorkerState, raw_hash: &str) -> Result<Response<ResponseBody>, ApiError> {
    let hash = normalize_hash(raw_hash)
        .ok_or_else(|| ApiError::BadRequest("Hash is not valid".to_string()))?;
    let path = state.service.content().path_for(&hash);

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("Video file not found".to_string()))
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };
    let length = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .len();

    let stream = ReaderStream::new(file).map_ok(Frame::data);
    let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    Ok(response)
}

fn metrics(state: &WorkerState) -> Result<Response<ResponseBody>, ApiError> {
    let Some(metrics) = &state.metrics else {
        return Ok(not_found());
    };
    let body = metrics
        .gather()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut response = Response::new(full(body));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::store::{ContentStore, JobStore};
    use crate::transcode::tools::MockToolRunner;
    use crate::transcode::{TranscodePipeline, TranscodeSettings};
    use http_body_util::Full;
    use hyper::body::Bytes;
    use tempfile::TempDir;

    fn state(dir: &TempDir) -> WorkerState {
        let jobs = JobStore::open(dir.path().join("db.sqlite")).unwrap();
        let pipeline = TranscodePipeline::new(
            Arc::new(MockToolRunner::new()),
            TranscodeSettings::from_config(&WorkerConfig::default()),
            dir.path().join("temp"),
            ContentStore::new(dir.path().join("storage"), "mp4"),
        );
        WorkerState {
            service: JobService::new(jobs, pipeline),
            metrics: Some(Arc::new(Metrics::new().unwrap())),
            max_url_length: 1024,
        }
    }

    fn request(method: Method, uri: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_json(response: Response<ResponseBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn download_validates_hash_before_lookup() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let response = handle(state.clone(), request(Method::GET, "/download/xyz", "")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Hash is not valid");

        let missing = format!("/download/{}", "a".repeat(64));
        let response = handle(state, request(Method::GET, &missing, "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["message"], "Video file not found");
    }

    #[tokio::test]
    async fn download_streams_stored_artifact() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let scratch = dir.path().join("artifact.mp4");
        std::fs::write(&scratch, b"frames").unwrap();
        let hash = state.service.content().commit(&scratch).await.unwrap();

        let uri = format!("/download/{}.MP4", hash.to_uppercase());
        let response = handle(state, request(Method::GET, &uri, "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "6");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"frames");
    }

    #[tokio::test]
    async fn job_lookup_distinguishes_bad_and_unknown_ids() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let response = handle(state.clone(), request(Method::GET, "/job/42", "")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let id = Uuid::new_v4();
        let response = handle(state, request(Method::GET, &format!("/job/{}", id), "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await["message"],
            format!("Job with id {} not found", id)
        );
    }

    #[tokio::test]
    async fn invalid_job_requests_create_nothing() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        for body in [r#"{"url":"ftp://example.com/v"}"#, r#"{"mirrorVideo":true}"#, "nope"] {
            let response = handle(state.clone(), request(Method::POST, "/job", body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert!(state.service.jobs().list(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn metrics_and_unknown_routes() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let response = handle(state.clone(), request(Method::GET, "/metrics", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = handle(state, request(Method::DELETE, "/job", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
