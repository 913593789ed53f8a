//! Request target types: the `(bucket, key)` pair addressed by an S3 path

use std::borrow::Cow;
use std::fmt;

/// Errors that can occur when validating user-provided bucket/key inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidationError(String);

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for KeyValidationError {}

/// Bucket and key parsed from a request path.
///
/// `bucket` is the first path segment and `key` everything after it, so
/// `/photos/2024/a.jpg` addresses key `2024/a.jpg` in bucket `photos`. Either
/// may be empty. A successfully parsed target never resolves outside the
/// storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestTarget {
    pub bucket: String,
    pub key: String,
}

/// Percent-decode a raw URI path exactly once.
pub fn decode_path(raw: &str) -> Result<Cow<'_, str>, KeyValidationError> {
    urlencoding::decode(raw).map_err(|_| KeyValidationError("Path is not valid UTF-8".to_string()))
}

impl RequestTarget {
    /// Parse an already percent-decoded path.
    pub fn parse(path: &str) -> Result<Self, KeyValidationError> {
        let trimmed = path.trim_matches('/');
        let (bucket, key) = trimmed.split_once('/').unwrap_or((trimmed, ""));

        validate_bucket(bucket)?;
        validate_key(key)?;

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn has_bucket(&self) -> bool {
        !self.bucket.is_empty()
    }

    pub fn has_key(&self) -> bool {
        !self.key.is_empty()
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Bucket names map to a single directory under the root. Names starting
/// with '.' are reserved for the staging area.
fn validate_bucket(bucket: &str) -> Result<(), KeyValidationError> {
    check_forbidden_chars(bucket)?;
    if bucket.contains('/') {
        return Err(KeyValidationError(
            "Bucket name must not contain '/'".to_string(),
        ));
    }
    if bucket.starts_with('.') {
        return Err(KeyValidationError(
            "Bucket name must not start with '.'".to_string(),
        ));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), KeyValidationError> {
    if key.is_empty() {
        return Ok(());
    }
    check_forbidden_chars(key)?;

    for segment in key.split('/') {
        match segment {
            "" => {
                return Err(KeyValidationError(
                    "Key must not contain empty path segments".to_string(),
                ))
            }
            "." | ".." => {
                return Err(KeyValidationError(
                    "Key must not contain '.' or '..' path segments".to_string(),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_forbidden_chars(value: &str) -> Result<(), KeyValidationError> {
    if value.contains('\0') {
        return Err(KeyValidationError(
            "Path must not contain NUL bytes".to_string(),
        ));
    }
    if value.contains('\\') {
        return Err(KeyValidationError(
            "Path must not contain backslashes".to_string(),
        ));
    }
    Ok(())
}
