//! S3 API implementation

pub mod auth;
pub mod aws_chunked;
mod errors;
pub mod handlers;
mod xml;

pub use errors::{S3Error, REQUEST_ID_HEADER};
