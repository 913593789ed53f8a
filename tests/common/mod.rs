//! Shared test infrastructure for integration tests
//!
//! Provides an independent SigV4 request signer, `TestApp` (router driven in
//! process through `tower::ServiceExt::oneshot`) and `TestServer` (the real
//! binary, for SDK interop).

#![allow(dead_code)]

use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use localbucket::api::handlers::{router, AppState};
use localbucket::config::Config;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use tower::ServiceExt;
use zeroize::Zeroizing;

pub const ACCESS_KEY: &str = "FAKEACCESS";
pub const SECRET_KEY: &str = "FAKESECRET";
pub const AMZ_DATE: &str = "20250101T000000Z";
pub const REGION: &str = "us-east-1";
pub const HOST: &str = "localhost:9000";
pub const STREAMING_TRAILER: &str = "STREAMING-UNSIGNED-PAYLOAD-TRAILER";

// ── Independent SigV4 signer ──

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// What the request sends as `x-amz-content-sha256`.
#[derive(Debug, Clone)]
pub enum PayloadHash {
    /// SHA-256 of the body.
    Computed,
    /// `UNSIGNED-PAYLOAD`.
    Unsigned,
    /// Any literal value, e.g. the streaming sentinel.
    Literal(String),
    /// No header; the server hashes the body itself.
    Omitted,
}

/// A request description that can be signed and turned into an HTTP request.
#[derive(Debug, Clone)]
pub struct S3Request {
    pub method: Method,
    /// Path exactly as sent (already percent-encoded).
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub payload: PayloadHash,
    pub access_key: String,
    pub secret: String,
    pub region: String,
    /// Signed-header order; sorted names when unset.
    pub header_order: Option<Vec<String>>,
}

impl S3Request {
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = path_and_query
            .split_once('?')
            .unwrap_or((path_and_query, ""));
        Self {
            method,
            path: path.to_string(),
            query: query.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            payload: PayloadHash::Computed,
            access_key: ACCESS_KEY.to_string(),
            secret: SECRET_KEY.to_string(),
            region: REGION.to_string(),
            header_order: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn put(path: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Method::PUT, path).body(body)
    }

    pub fn head(path: &str) -> Self {
        Self::new(Method::HEAD, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn payload(mut self, payload: PayloadHash) -> Self {
        self.payload = payload;
        self
    }

    pub fn access_key(mut self, key: &str) -> Self {
        self.access_key = key.to_string();
        self
    }

    pub fn secret(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    pub fn region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    pub fn header_order(mut self, order: &[&str]) -> Self {
        self.header_order = Some(order.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Every header the request carries, authorization excluded.
    fn all_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("host".to_string(), HOST.to_string()),
            ("x-amz-date".to_string(), AMZ_DATE.to_string()),
        ];
        let hash = match &self.payload {
            PayloadHash::Computed => Some(sha256_hex(&self.body)),
            PayloadHash::Unsigned => Some("UNSIGNED-PAYLOAD".to_string()),
            PayloadHash::Literal(value) => Some(value.clone()),
            PayloadHash::Omitted => None,
        };
        if let Some(hash) = hash {
            headers.push(("x-amz-content-sha256".to_string(), hash));
        }
        headers.extend(self.headers.iter().cloned());
        headers
    }

    /// The `Authorization` header value for this request.
    pub fn authorization(&self) -> String {
        let headers = self.all_headers();
        let names: Vec<String> = match &self.header_order {
            Some(order) => order.clone(),
            None => {
                let mut names: Vec<String> = headers.iter().map(|(k, _)| k.clone()).collect();
                names.sort();
                names
            }
        };

        let canonical_headers: String = names
            .iter()
            .map(|name| {
                let value = headers
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.trim().to_string())
                    .unwrap_or_default();
                format!("{}:{}\n", name, value)
            })
            .collect();

        let mut pairs: Vec<&str> = self.query.split('&').filter(|p| !p.is_empty()).collect();
        pairs.sort();
        let canonical_query = pairs
            .iter()
            .map(|p| if p.contains('=') { p.to_string() } else { format!("{}=", p) })
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = headers
            .iter()
            .find(|(k, _)| k == "x-amz-content-sha256")
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| sha256_hex(&self.body));

        let signed_headers = names.join(";");
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method, self.path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let date = &AMZ_DATE[..8];
        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            AMZ_DATE,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let k_date = hmac(format!("AWS4{}", self.secret).as_bytes(), date.as_bytes());
        let k_region = hmac(&k_date, self.region.as_bytes());
        let k_service = hmac(&k_region, b"s3");
        let k_signing = hmac(&k_service, b"aws4_request");
        let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        )
    }

    /// Build the HTTP request with a given (or no) `Authorization` header.
    pub fn build_with_authorization(&self, authorization: Option<String>) -> Request<Body> {
        let uri = if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        };
        let mut builder = Request::builder().method(self.method.clone()).uri(uri);
        for (name, value) in self.all_headers() {
            builder = builder.header(name, value);
        }
        if let Some(authorization) = authorization {
            builder = builder.header("authorization", authorization);
        }
        builder.body(Body::from(self.body.clone())).unwrap()
    }

    /// Build the correctly signed HTTP request.
    pub fn build(&self) -> Request<Body> {
        self.build_with_authorization(Some(self.authorization()))
    }
}

/// Frame `chunks` in the aws-chunked format, ending with an optional trailer.
pub fn aws_chunked(chunks: &[&[u8]], trailer: Option<&str>) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n");
    if let Some(trailer) = trailer {
        out.extend_from_slice(trailer.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// A chunked PUT as SDKs send it.
pub fn chunked_put(path: &str, framed: Vec<u8>, decoded_len: usize) -> S3Request {
    S3Request::put(path, framed)
        .payload(PayloadHash::Literal(STREAMING_TRAILER.to_string()))
        .header("content-encoding", "aws-chunked")
        .header("x-amz-decoded-content-length", &decoded_len.to_string())
}

// ── In-process app ──

/// Collected response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// `<Code>` of an XML error body.
    pub fn error_code(&self) -> Option<String> {
        let text = self.text();
        let start = text.find("<Code>")? + "<Code>".len();
        let end = text[start..].find("</Code>")? + start;
        Some(text[start..end].to_string())
    }

    /// Every `<Key>` of a listing, in order.
    pub fn keys(&self) -> Vec<String> {
        let text = self.text();
        text.split("<Key>")
            .skip(1)
            .filter_map(|part| part.split_once("</Key>").map(|(key, _)| key.to_string()))
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The router over a fresh storage root.
pub struct TestApp {
    pub router: Router,
    data_dir: TempDir,
}

pub fn test_config(root: &Path) -> Config {
    Config {
        storage_root: root.to_path_buf(),
        access_key_id: ACCESS_KEY.to_string(),
        secret_access_key: Zeroizing::new(SECRET_KEY.to_string()),
        ..Config::default()
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let data_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = test_config(data_dir.path());
        customize(&mut config);
        let state = AppState::from_config(&config)
            .await
            .expect("Failed to open storage");
        Self {
            router: router(Arc::new(state)),
            data_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.data_dir.path()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn request(&self, request: S3Request) -> TestResponse {
        self.send(request.build()).await
    }

    pub async fn create_bucket(&self, bucket: &str) {
        let resp = self.request(S3Request::put(&format!("/{}", bucket), "")).await;
        assert_eq!(resp.status, StatusCode::OK, "create bucket: {}", resp.text());
    }

    pub async fn put(&self, path: &str, data: impl Into<Vec<u8>>) -> TestResponse {
        let resp = self.request(S3Request::put(path, data)).await;
        assert_eq!(resp.status, StatusCode::OK, "PUT {}: {}", path, resp.text());
        resp
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(S3Request::get(path)).await
    }
}

// ── Real binary ──

/// Test server wrapper that spawns the real localbucket binary
pub struct TestServer {
    process: Child,
    port: u16,
    _data_dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        let data_dir = TempDir::new().expect("Failed to create temp dir");
        let port = free_port();
        let config = format!(
            concat!(
                "listen_addr = \"127.0.0.1:{}\"\n",
                "storage_root = \"{}\"\n",
                "access_key_id = \"{}\"\n",
                "secret_access_key = \"{}\"\n",
            ),
            port,
            data_dir.path().join("data").display(),
            ACCESS_KEY,
            SECRET_KEY,
        );
        let config_path = data_dir.path().join("test.toml");
        std::fs::write(&config_path, config).expect("Failed to write test config");

        let process = Command::new(env!("CARGO_BIN_EXE_localbucket"))
            .env("LB_CONFIG", &config_path)
            .env("RUST_LOG", "localbucket=warn")
            .spawn()
            .expect("Failed to start server");

        let mut server = Self {
            process,
            port,
            _data_dir: data_dir,
        };
        server.wait_ready().await;
        server
    }

    async fn wait_ready(&mut self) {
        let addr = format!("127.0.0.1:{}", self.port);
        for _ in 0..150 {
            if std::net::TcpStream::connect(&addr).is_ok() {
                return;
            }

            if let Ok(Some(status)) = self.process.try_wait() {
                panic!("Server exited before becoming ready: {}", status);
            }

            sleep(Duration::from_millis(100)).await;
        }

        let _ = self.process.kill();
        panic!("Timed out waiting for server on {}", addr);
    }

    /// Create an S3 client configured for this test server
    pub fn s3_client(&self) -> Client {
        self.s3_client_with_secret(SECRET_KEY)
    }

    pub fn s3_client_with_secret(&self, secret: &str) -> Client {
        let credentials = Credentials::new(ACCESS_KEY, secret, None, None, "test");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(REGION))
            .endpoint_url(self.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Client::from_conf(config)
    }

    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("Failed to find a free port")
}
