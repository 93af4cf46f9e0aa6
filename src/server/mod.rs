//! HTTP plumbing shared by the worker API and the orchestrator control surface.

pub mod control;
pub mod worker;

use std::convert::Infallible;
use std::future::Future;

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info};
use url::Url;

use crate::error::ApiError;

/// Response body type for every route. Boxed so small JSON and streamed files share one type.
pub type ResponseBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// Largest request body accepted.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Accepts connections on `listener` forever, answering each request with `handler`.
pub async fn serve<H, F>(listener: TcpListener, handler: H) -> std::io::Result<()>
where
    H: Fn(Request<Incoming>) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = Response<ResponseBody>> + Send + 'static,
{
    info!(addr = ?listener.local_addr()?, "HTTP server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = handler(req);
                async move { Ok::<_, Infallible>(response.await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(peer = %peer, error = %e, "Error serving connection");
            }
        });
    }
}

/// Wraps bytes in a response body.
pub fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Serializes `value` as a JSON response.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(full(body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => error_response(&ApiError::Internal(e.to_string())),
    }
}

/// JSON `{"message": ...}` response for an error.
pub fn error_response(error: &ApiError) -> Response<ResponseBody> {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({ "message": error.to_string() });
    let mut response = Response::new(full(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn not_found() -> Response<ResponseBody> {
    error_response(&ApiError::NotFound("Not Found".to_string()))
}

/// Reads and parses a JSON request body.
pub async fn read_json<B, T>(req: Request<B>) -> Result<T, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    T: DeserializeOwned,
{
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

/// Checks a user supplied source URL: at most `max_length` characters, http or https.
pub fn validate_video_url(raw: &str, max_length: usize) -> Result<Url, ApiError> {
    if raw.is_empty() {
        return Err(ApiError::BadRequest("Url is required".to_string()));
    }
    if raw.chars().count() > max_length {
        return Err(ApiError::BadRequest(format!(
            "Url is longer than {} characters",
            max_length
        )));
    }
    let url = Url::parse(raw).map_err(|e| ApiError::BadRequest(format!("Url is not valid: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::BadRequest(format!(
            "Url scheme '{}' is not supported",
            other
        ))),
    }
}
