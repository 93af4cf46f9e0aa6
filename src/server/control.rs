//! Orchestrator control API.

use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use super::{error_response, json_response, not_found, read_json, validate_video_url, ResponseBody};
use crate::error::ApiError;
use crate::job::JobRequest;
use crate::playback::PlaybackManager;

/// Shared state for control routes.
#[derive(Clone)]
pub struct ControlState {
    pub manager: PlaybackManager,
    pub max_url_length: usize,
}

#[derive(Debug, Deserialize)]
struct StreamRequest {
    url: String,
}

/// Routes one request.
pub async fn handle<B>(state: ControlState, req: Request<B>) -> Response<ResponseBody>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = match (&method, path.trim_end_matches('/')) {
        (&Method::GET, "/status") => Ok(json_response(StatusCode::OK, &state.manager.status())),
        (&Method::POST, "/play") => play(&state, req).await,
        (&Method::POST, "/prefetch") => prefetch(&state, req).await,
        (&Method::POST, "/stream") => stream(&state, req).await,
        (&Method::POST, "/stop") => {
            let did_stop = state.manager.stop();
            Ok(json_response(StatusCode::OK, &json!({ "didStop": did_stop })))
        }
        (&Method::DELETE, "/cache") => clear_cache(&state).await,
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

async fn read_job_request<B>(state: &ControlState, req: Request<B>) -> Result<JobRequest, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request: JobRequest = read_json(req).await?;
    validate_video_url(&request.url, state.max_url_length)?;
    Ok(request)
}

async fn play<B>(state: &ControlState, req: Request<B>) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request = read_job_request(state, req).await?;
    let outcome = state.manager.play_video_cached(&request).await?;
    Ok(json_response(StatusCode::OK, &outcome))
}

async fn prefetch<B>(state: &ControlState, req: Request<B>) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request = read_job_request(state, req).await?;
    let job = state.manager.prefetch(&request).await?;
    Ok(json_response(StatusCode::OK, &job))
}

async fn stream<B>(state: &ControlState, req: Request<B>) -> Result<Response<ResponseBody>, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request: StreamRequest = read_json(req).await?;
    validate_video_url(&request.url, state.max_url_length)?;
    state.manager.stream_video(&request.url).await?;
    Ok(json_response(StatusCode::OK, &json!({})))
}

async fn clear_cache(state: &ControlState) -> Result<Response<ResponseBody>, ApiError> {
    let deleted = state.manager.clear_cache().await?;
    Ok(json_response(
        StatusCode::OK,
        &json!({ "deletedCount": deleted }),
    ))
}
