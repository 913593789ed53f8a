//! AWS Signature Version 4 (SigV4) request verification
//!
//! Every request must carry `Authorization: AWS4-HMAC-SHA256 ...` signed with
//! the single configured credential pair. The authenticator rebuilds the
//! canonical request, derives the signing key from the configured secret, and
//! compares the expected signature with the provided one in constant time.
//!
//! The payload hash is taken verbatim from `x-amz-content-sha256` when present
//! (streaming uploads send a sentinel there); otherwise the caller supplies the
//! buffered body and its SHA-256 is used.

pub mod canonical;
pub mod signer;

use super::S3Error;
use axum::http::HeaderMap;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

pub use canonical::CanonicalInput;
use signer::CredentialScope;

/// Service name used for every signing key.
const SERVICE: &str = "s3";

static CREDENTIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Credential=([^,\s]*)").expect("valid regex"));
static SIGNED_HEADERS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SignedHeaders=([^,\s]*)").expect("valid regex"));
static SIGNATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Signature=([^,\s]*)").expect("valid regex"));

/// Why a request was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthRejection {
    #[error("missing or unsupported Authorization header")]
    MissingAuthorization,

    #[error("unknown access key")]
    AccessDenied,

    #[error("missing x-amz-date header")]
    MissingDate,

    /// Both values are for diagnostics only.
    #[error("signature mismatch")]
    SignatureMismatch { expected: String, provided: String },
}

impl From<AuthRejection> for S3Error {
    fn from(rejection: AuthRejection) -> Self {
        match rejection {
            AuthRejection::MissingAuthorization | AuthRejection::SignatureMismatch { .. } => {
                S3Error::SignatureDoesNotMatch
            }
            AuthRejection::AccessDenied => S3Error::AccessDenied,
            AuthRejection::MissingDate => S3Error::MissingDate,
        }
    }
}

/// Parsed components of an AWS SigV4 Authorization header.
///
/// Fields the header does not carry are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAuthHeader {
    pub access_key: String,
    pub date: String,
    pub region: String,
    pub service: String,
    /// Names in the order the client listed them.
    pub signed_headers: Vec<String>,
    pub signature: String,
}

/// Parse the Authorization header value.
///
/// Format: `AWS4-HMAC-SHA256 Credential=AKID/20260101/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=abcdef...`
///
/// Returns `None` only when the scheme is not `AWS4-HMAC-SHA256`.
pub fn parse_auth_header(header: &str) -> Option<ParsedAuthHeader> {
    let parts = header.trim().strip_prefix(signer::ALGORITHM)?;

    let capture = |re: &Regex| {
        re.captures(parts)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    let credential = capture(&CREDENTIAL_RE);
    let mut scope = credential.split('/');
    let mut next = || scope.next().unwrap_or("").to_string();
    let access_key = next();
    let date = next();
    let region = next();
    let service = next();

    let signed_headers = capture(&SIGNED_HEADERS_RE)
        .split(';')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    Some(ParsedAuthHeader {
        access_key,
        date,
        region,
        service,
        signed_headers,
        signature: capture(&SIGNATURE_RE),
    })
}

/// First eight characters, for logs.
fn prefix(value: &str) -> &str {
    value.get(..8).unwrap_or(value)
}

/// Verifies SigV4 signatures against a single credential pair.
#[derive(Clone)]
pub struct Authenticator {
    access_key_id: String,
    secret_access_key: Zeroizing<String>,
    /// Fixed region for the string to sign; the credential's region if unset.
    signing_region: Option<String>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("signing_region", &self.signing_region)
            .finish()
    }
}

impl Authenticator {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: Zeroizing<String>,
        signing_region: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key,
            signing_region,
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Whether verifying this request needs the buffered body.
    pub fn needs_body(headers: &HeaderMap) -> bool {
        canonical::declared_payload_hash(headers).is_none()
    }

    /// Accept or reject a request.
    ///
    /// `body` is only consulted when the request carries no
    /// `x-amz-content-sha256` header; `None` then stands for an empty body.
    pub fn authenticate(
        &self,
        input: &CanonicalInput<'_>,
        body: Option<&[u8]>,
    ) -> Result<(), AuthRejection> {
        let Some(auth_header) = input.headers.get("authorization") else {
            debug!("SigV4: no Authorization header, rejecting");
            return Err(AuthRejection::MissingAuthorization);
        };
        let Ok(auth_header) = auth_header.to_str() else {
            warn!("SigV4: invalid Authorization header encoding");
            return Err(AuthRejection::MissingAuthorization);
        };
        let Some(parsed) = parse_auth_header(auth_header) else {
            warn!("SigV4: unsupported Authorization scheme");
            return Err(AuthRejection::MissingAuthorization);
        };

        let key_matches: bool = parsed
            .access_key
            .as_bytes()
            .ct_eq(self.access_key_id.as_bytes())
            .into();
        if !key_matches {
            debug!("SigV4: access key mismatch");
            return Err(AuthRejection::AccessDenied);
        }

        let payload_hash = match canonical::declared_payload_hash(input.headers) {
            Some(declared) => declared.to_string(),
            None => canonical::hash_payload(body.unwrap_or_default()),
        };

        let signed_headers: Vec<&str> = parsed.signed_headers.iter().map(String::as_str).collect();
        let canonical_request = canonical::canonical_request(input, &signed_headers, &payload_hash);
        debug!("SigV4 canonical request:\n{}", canonical_request);

        let amz_date = input
            .headers
            .get("x-amz-date")
            .and_then(|v| v.to_str().ok());

        let scope = CredentialScope {
            date: &parsed.date,
            region: self.signing_region.as_deref().unwrap_or(&parsed.region),
            service: SERVICE,
        };
        let string_to_sign = signer::string_to_sign(amz_date.unwrap_or(""), &scope, &canonical_request);
        debug!("SigV4 string to sign:\n{}", string_to_sign);

        if amz_date.is_none() {
            debug!("SigV4: no x-amz-date header, rejecting");
            return Err(AuthRejection::MissingDate);
        }

        let signing_key = signer::signing_key(
            &self.secret_access_key,
            &parsed.date,
            &parsed.region,
            SERVICE,
        );
        let expected = signer::sign(&signing_key, &string_to_sign);

        let signature_matches: bool = expected
            .as_bytes()
            .ct_eq(parsed.signature.as_bytes())
            .into();
        if !signature_matches {
            warn!(
                "SigV4: signature mismatch (computed={}, provided={})",
                prefix(&expected),
                prefix(&parsed.signature)
            );
            return Err(AuthRejection::SignatureMismatch {
                expected,
                provided: parsed.signature,
            });
        }

        debug!("SigV4: signature verified successfully");
        Ok(())
    }
}
