//! S3 request dispatch
//!
//! Every request enters through [`dispatch`]: the path is parsed and checked
//! for traversal, the SigV4 signature is verified, and the request is routed
//! by method and by whether a bucket and key were given.
//!
//! Split into submodules by domain:
//! - `object`: GET, HEAD, PUT, DELETE for individual objects
//! - `bucket`: bucket create/delete and listings

mod bucket;
mod object;

use super::auth::{Authenticator, CanonicalInput};
use super::aws_chunked::ChunkLimits;
use super::errors::{S3Error, REQUEST_ID_HEADER};
use crate::config::Config;
use crate::storage::{FilesystemBackend, StorageBackend, StorageError};
use crate::types::{decode_path, RequestTarget};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Application state shared across handlers
pub struct AppState {
    pub storage: Arc<dyn StorageBackend>,
    pub authenticator: Authenticator,
    /// Upper bound for bodies buffered to compute their SHA-256.
    pub max_object_size: usize,
    pub chunk_limits: ChunkLimits,
}

impl AppState {
    /// Open the filesystem backend and wire up the authenticator.
    ///
    /// Staging files left behind by an earlier crash are removed here.
    pub async fn from_config(config: &Config) -> Result<Self, StorageError> {
        let backend = FilesystemBackend::new(config.storage_root.clone()).await?;
        let purged = backend.purge_staging().await?;
        if purged > 0 {
            info!("Removed {} stale staging file(s)", purged);
        }

        Ok(Self {
            storage: Arc::new(backend),
            authenticator: Authenticator::new(
                config.access_key_id.clone(),
                config.secret_access_key.clone(),
                config.signing_region.clone(),
            ),
            max_object_size: usize::try_from(config.max_object_size).unwrap_or(usize::MAX),
            chunk_limits: ChunkLimits {
                max_header_line: config.max_chunk_header_bytes,
            },
        })
    }
}

/// Build the service: one fallback handler behind tracing and panic capture.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Request body after authentication.
enum RequestBody {
    /// Read in full because its hash was needed for the signature.
    Buffered(Bytes),
    /// Not read yet.
    Streaming(Body),
}

/// Single entry point for every S3 request.
pub async fn dispatch(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "s3_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    );

    async move {
        let mut response = match handle(&state, request).await {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    S3Error::InternalError(detail) => error!("Request failed: {}", detail),
                    other => debug!("Request rejected: {} ({})", other.code(), other),
                }
                err.to_response(&request_id)
            }
        };
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

async fn handle(state: &AppState, request: Request) -> Result<Response, S3Error> {
    let (parts, body) = request.into_parts();

    // Traversal checks come before anything else, signature included
    let path =
        decode_path(parts.uri.path()).map_err(|e| S3Error::InvalidRequest(e.to_string()))?;
    let target = RequestTarget::parse(&path).map_err(|e| S3Error::InvalidRequest(e.to_string()))?;

    let input = CanonicalInput {
        method: parts.method.as_str(),
        path: &path,
        query: parts.uri.query().unwrap_or(""),
        headers: &parts.headers,
        authority: parts.uri.authority().map(|a| a.as_str()),
    };

    let body = if Authenticator::needs_body(&parts.headers) {
        let bytes = axum::body::to_bytes(body, state.max_object_size)
            .await
            .map_err(|e| {
                S3Error::InvalidRequest(format!(
                    "Request body could not be read within {} bytes: {}",
                    state.max_object_size, e
                ))
            })?;
        state.authenticator.authenticate(&input, Some(&bytes))?;
        RequestBody::Buffered(bytes)
    } else {
        state.authenticator.authenticate(&input, None)?;
        RequestBody::Streaming(body)
    };

    match parts.method {
        Method::GET if !target.has_bucket() => bucket::list_buckets(state).await,
        Method::GET if !target.has_key() => {
            bucket::list_objects(state, &target.bucket, &parts.uri).await
        }
        Method::GET => object::get_object(state, &target).await,
        Method::PUT | Method::HEAD | Method::DELETE if !target.has_bucket() => Err(
            S3Error::InvalidRequest("A bucket name is required".to_string()),
        ),
        Method::PUT if !target.has_key() => bucket::create_bucket(state, &target.bucket).await,
        Method::PUT => object::put_object(state, &target, &parts.headers, body).await,
        Method::HEAD if !target.has_key() => Err(S3Error::InvalidRequest(
            "HEAD requires an object key".to_string(),
        )),
        Method::HEAD => object::head_object(state, &target).await,
        Method::DELETE if !target.has_key() => bucket::delete_bucket(state, &target.bucket).await,
        Method::DELETE => object::delete_object(state, &target).await,
        other => Err(S3Error::MethodNotAllowed(other.to_string())),
    }
}

/// Render a handler panic as an opaque `InternalError`.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {}", detail);
    S3Error::InternalError(detail).into_response()
}

/// Build an XML response with correct Content-Type header.
fn xml_response(status: StatusCode, xml: impl Into<String>) -> Response {
    (status, [("Content-Type", "application/xml")], xml.into()).into_response()
}
