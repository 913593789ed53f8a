//! Object-level S3 handlers: GET, HEAD, PUT, DELETE.

use super::{xml_response, AppState, RequestBody, S3Error};
use crate::api::auth::canonical::declared_payload_hash;
use crate::api::aws_chunked::{decode_stream, is_aws_chunked, unsupported_streaming_mode};
use crate::api::xml::PUT_OBJECT_RESULT;
use crate::storage::{ByteStream, StorageError};
use crate::types::RequestTarget;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use tokio_util::io::StreamReader;
use tracing::{debug, info, instrument, warn};

/// PUT object handler
///
/// The body reaches the backend as a stream: the buffered bytes when they
/// were needed for the signature, the decoded chunks for AWS streaming
/// uploads, or the raw body otherwise.
#[instrument(skip(state, headers, body))]
pub(super) async fn put_object(
    state: &AppState,
    target: &RequestTarget,
    headers: &HeaderMap,
    body: RequestBody,
) -> Result<Response, S3Error> {
    let source: ByteStream = match body {
        RequestBody::Buffered(bytes) => {
            info!("PUT {} ({} bytes)", target, bytes.len());
            stream::once(async move { Ok::<Bytes, StorageError>(bytes) }).boxed()
        }
        RequestBody::Streaming(body) if is_aws_chunked(headers) => {
            info!("PUT {} (aws-chunked)", target);
            let reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
            decode_stream(reader, state.chunk_limits)
                .map_err(StorageError::from)
                .boxed()
        }
        RequestBody::Streaming(body) => {
            info!("PUT {} (streaming)", target);
            if let Some(mode) = unsupported_streaming_mode(headers) {
                warn!(
                    "PUT {}: payload mode {} is not decoded, storing the body as sent",
                    target, mode
                );
            }
            let raw = raw_body_stream(body);
            match declared_payload_hash(headers).filter(|h| is_sha256_hex(h)) {
                Some(expected) => verify_sha256(raw, expected.to_ascii_lowercase()),
                None => raw,
            }
        }
    };

    let outcome = state
        .storage
        .put_object(&target.bucket, &target.key, source)
        .await?;
    debug!("Stored {} ({} bytes, md5 {})", target, outcome.size, outcome.md5);

    let mut response = xml_response(StatusCode::OK, PUT_OBJECT_RESULT);
    if let Ok(etag) = HeaderValue::from_str(&outcome.etag()) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    Ok(response)
}

/// GET object handler
#[instrument(skip(state))]
pub(super) async fn get_object(state: &AppState, target: &RequestTarget) -> Result<Response, S3Error> {
    info!("GET {}", target);
    let reader = state
        .storage
        .get_object(&target.bucket, &target.key)
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, reader.size.to_string()),
        ],
        Body::from_stream(reader.stream),
    )
        .into_response())
}

/// HEAD object handler
#[instrument(skip(state))]
pub(super) async fn head_object(state: &AppState, target: &RequestTarget) -> Result<Response, S3Error> {
    info!("HEAD {}", target);
    let size = state
        .storage
        .head_object(&target.bucket, &target.key)
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
    )
        .into_response())
}

/// DELETE object handler
#[instrument(skip(state))]
pub(super) async fn delete_object(state: &AppState, target: &RequestTarget) -> Result<Response, S3Error> {
    info!("DELETE {}", target);
    state
        .storage
        .delete_object(&target.bucket, &target.key)
        .await?;
    debug!("Deleted {}", target);
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn raw_body_stream(body: Body) -> ByteStream {
    body.into_data_stream()
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))
        .boxed()
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

struct Verifier {
    inner: ByteStream,
    hasher: Sha256,
    expected: String,
}

/// Pass `inner` through, failing at the end if its SHA-256 differs from
/// `expected`.
fn verify_sha256(inner: ByteStream, expected: String) -> ByteStream {
    let state = Verifier {
        inner,
        hasher: Sha256::new(),
        expected,
    };

    stream::try_unfold(state, |mut state| async move {
        match state.inner.try_next().await? {
            Some(chunk) => {
                state.hasher.update(&chunk);
                Ok(Some((chunk, state)))
            }
            None => {
                let actual = hex::encode(state.hasher.finalize());
                if actual != state.expected {
                    return Err(StorageError::MalformedBody(
                        "x-amz-content-sha256 does not match the payload".to_string(),
                    ));
                }
                Ok(None)
            }
        }
    })
    .boxed()
}
