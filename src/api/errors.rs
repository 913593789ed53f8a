//! S3 error types and XML responses

use super::xml::escape_xml;
use crate::storage::StorageError;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Response header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

/// S3 API errors
///
/// The `Display` text is the `<Message>` of the XML body and never carries
/// internal detail.
#[derive(Debug, Error)]
pub enum S3Error {
    #[error("Access Denied")]
    AccessDenied,

    #[error("The request signature we calculated does not match the signature you provided.")]
    SignatureDoesNotMatch,

    #[error("AWS authentication requires a valid x-amz-date header.")]
    MissingDate,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("The specified bucket does not exist.")]
    NoSuchBucket(String),

    #[error("The specified key does not exist.")]
    NoSuchKey(String),

    #[error("The requested bucket name is not available.")]
    BucketAlreadyExists(String),

    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed(String),

    /// The payload is logged, never rendered.
    #[error("We encountered an internal error. Please try again.")]
    InternalError(String),
}

impl S3Error {
    /// Get the S3 error code
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::AccessDenied | S3Error::MissingDate => "AccessDenied",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::InvalidRequest(_) => "InvalidRequest",
            S3Error::NoSuchBucket(_) => "NoSuchBucket",
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::BucketAlreadyExists(_) => "BucketAlreadyExists",
            S3Error::MethodNotAllowed(_) => "MethodNotAllowed",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::AccessDenied | S3Error::SignatureDoesNotMatch | S3Error::MissingDate => {
                StatusCode::FORBIDDEN
            }
            S3Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            S3Error::NoSuchBucket(_) | S3Error::NoSuchKey(_) => StatusCode::NOT_FOUND,
            S3Error::BucketAlreadyExists(_) => StatusCode::CONFLICT,
            S3Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Generate XML error response
    pub fn to_xml(&self, request_id: &str) -> String {
        let resource = match self {
            S3Error::NoSuchKey(resource)
            | S3Error::NoSuchBucket(resource)
            | S3Error::BucketAlreadyExists(resource) => escape_xml(resource),
            _ => String::new(),
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <Resource>{}</Resource>
    <RequestId>{}</RequestId>
</Error>"#,
            self.code(),
            escape_xml(&self.to_string()),
            resource,
            escape_xml(request_id)
        )
    }

    /// Render the error for a request with a known id.
    pub fn to_response(&self, request_id: &str) -> Response {
        let mut response = (
            self.status_code(),
            [("Content-Type", "application/xml")],
            self.to_xml(request_id),
        )
            .into_response();
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        self.to_response(&uuid::Uuid::new_v4().to_string())
    }
}

impl From<StorageError> for S3Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => S3Error::NoSuchKey(key),
            StorageError::BucketNotFound(b) => S3Error::NoSuchBucket(b),
            StorageError::AlreadyExists(b) => S3Error::BucketAlreadyExists(b),
            StorageError::MalformedBody(msg) => S3Error::InvalidRequest(msg),
            other => S3Error::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_table() {
        let cases = [
            (S3Error::AccessDenied, 403, "AccessDenied"),
            (S3Error::SignatureDoesNotMatch, 403, "SignatureDoesNotMatch"),
            (S3Error::MissingDate, 403, "AccessDenied"),
            (S3Error::InvalidRequest("x".into()), 400, "InvalidRequest"),
            (S3Error::NoSuchBucket("b".into()), 404, "NoSuchBucket"),
            (S3Error::NoSuchKey("k".into()), 404, "NoSuchKey"),
            (S3Error::BucketAlreadyExists("b".into()), 409, "BucketAlreadyExists"),
            (S3Error::MethodNotAllowed("PATCH".into()), 405, "MethodNotAllowed"),
            (S3Error::InternalError("boom".into()), 500, "InternalError"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{:?}", err);
            assert_eq!(err.code(), code, "{:?}", err);
        }
    }

    #[test]
    fn test_internal_detail_is_not_rendered() {
        let err = S3Error::InternalError("/var/lib/secret/path: permission denied".into());
        let xml = err.to_xml("req-1");
        assert!(xml.contains("<Code>InternalError</Code>"));
        assert!(!xml.contains("/var/lib/secret"));
        assert!(xml.contains("<RequestId>req-1</RequestId>"));
    }

    #[test]
    fn test_xml_is_escaped() {
        let xml = S3Error::NoSuchKey("a<b>&\"c\"".into()).to_xml("id");
        assert!(xml.contains("<Resource>a&lt;b&gt;&amp;&quot;c&quot;</Resource>"));

        let xml = S3Error::InvalidRequest("bad <input>".into()).to_xml("id");
        assert!(xml.contains("<Message>bad &lt;input&gt;</Message>"));
    }

    #[test]
    fn test_response_carries_request_id() {
        let response = S3Error::NoSuchBucket("b".into()).to_response("abc-123");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-123");
        assert_eq!(response.headers()["content-type"], "application/xml");
    }

    #[test]
    fn test_from_storage_error() {
        assert!(matches!(
            S3Error::from(StorageError::NotFound("k".into())),
            S3Error::NoSuchKey(k) if k == "k"
        ));
        assert!(matches!(
            S3Error::from(StorageError::BucketNotFound("b".into())),
            S3Error::NoSuchBucket(_)
        ));
        assert!(matches!(
            S3Error::from(StorageError::AlreadyExists("b".into())),
            S3Error::BucketAlreadyExists(_)
        ));
        assert!(matches!(
            S3Error::from(StorageError::MalformedBody("bad chunk".into())),
            S3Error::InvalidRequest(_)
        ));
        assert!(matches!(
            S3Error::from(StorageError::Io(std::io::Error::other("disk"))),
            S3Error::InternalError(_)
        ));
    }
}
