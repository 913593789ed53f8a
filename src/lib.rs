//! localbucket - minimal S3-compatible object storage on a local filesystem
//!
//! Requests are verified with AWS Signature Version 4 and mapped onto one
//! directory per bucket and one file per object.

pub mod api;
pub mod config;
pub mod storage;
pub mod types;
