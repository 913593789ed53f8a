//! Bucket-level S3 handlers: CREATE, DELETE, LIST, and ListBuckets.

use super::{xml_response, AppState, S3Error};
use crate::api::auth::canonical::uri_encode;
use crate::api::xml::{create_bucket_result, ListBucketResult, ListBucketsResult};
use axum::extract::Query;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::{info, instrument};

/// Query parameters for ListObjects (v1 and v2 share one response shape)
#[derive(Debug, serde::Deserialize, Default)]
pub struct ListQuery {
    pub prefix: Option<String>,
    #[serde(rename = "list-type")]
    pub list_type: Option<u8>,
}

/// CREATE bucket handler
#[instrument(skip(state))]
pub(super) async fn create_bucket(state: &AppState, bucket: &str) -> Result<Response, S3Error> {
    info!("CREATE bucket {}", bucket);
    state.storage.create_bucket(bucket).await?;

    let mut response = xml_response(StatusCode::OK, create_bucket_result(bucket));
    if let Ok(location) = format!("/{}", uri_encode(bucket, true)).parse::<HeaderValue>() {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// DELETE bucket handler, removing everything stored in it
#[instrument(skip(state))]
pub(super) async fn delete_bucket(state: &AppState, bucket: &str) -> Result<Response, S3Error> {
    info!("DELETE bucket {}", bucket);
    state.storage.delete_bucket(bucket).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// LIST objects handler
#[instrument(skip(state, uri))]
pub(super) async fn list_objects(
    state: &AppState,
    bucket: &str,
    uri: &Uri,
) -> Result<Response, S3Error> {
    let Query(query) = Query::<ListQuery>::try_from_uri(uri)
        .map_err(|e| S3Error::InvalidRequest(format!("Invalid list parameters: {}", e)))?;
    let prefix = query.prefix.unwrap_or_default();

    info!(
        "LIST {}/{} (list-type={})",
        bucket,
        prefix,
        query.list_type.unwrap_or(1)
    );

    let contents = state.storage.list_objects(bucket, &prefix).await?;
    let result = ListBucketResult {
        name: bucket.to_string(),
        prefix,
        contents,
    };
    Ok(xml_response(StatusCode::OK, result.to_xml()))
}

/// ListBuckets handler (`GET /`)
#[instrument(skip(state))]
pub(super) async fn list_buckets(state: &AppState) -> Result<Response, S3Error> {
    info!("LIST buckets");
    let buckets = state.storage.list_buckets().await?;
    let result = ListBucketsResult {
        owner_id: state.authenticator.access_key_id().to_string(),
        buckets,
    };
    Ok(xml_response(StatusCode::OK, result.to_xml()))
}
