//! AWS streaming chunked upload decoder
//!
//! When an SDK sends `x-amz-content-sha256: STREAMING-UNSIGNED-PAYLOAD-TRAILER`
//! the body is framed as:
//!
//! ```text
//! <hex-chunk-size>[;<extension>]\r\n
//! <chunk-data>\r\n
//! ...
//! 0\r\n
//! <trailer-name>:<trailer-value>\r\n
//! \r\n
//! ```
//!
//! The decoder is incremental: it reads from an `AsyncBufRead` and yields the
//! payload in bounded pieces, so an upload is never held in memory. Trailers
//! (typically `x-amz-checksum-*`) are read and discarded.

use crate::storage::StorageError;
use axum::http::HeaderMap;
use bytes::Bytes;
use futures::stream::{self, Stream};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// `x-amz-content-sha256` value announcing a chunked body.
pub const STREAMING_UNSIGNED_PAYLOAD_TRAILER: &str = "STREAMING-UNSIGNED-PAYLOAD-TRAILER";

/// Default limit for a single size or trailer line.
pub const DEFAULT_MAX_HEADER_LINE: usize = 4096;

const MAX_TRAILER_LINES: usize = 64;

/// 16 hex digits already cover the whole u64 range.
const MAX_SIZE_DIGITS: usize = 16;

/// Largest piece yielded downstream in one item.
const MAX_PIECE: usize = 64 * 1024;

/// Check if the request body uses AWS chunked encoding
pub fn is_aws_chunked(headers: &HeaderMap) -> bool {
    headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == STREAMING_UNSIGNED_PAYLOAD_TRAILER)
        .unwrap_or(false)
}

/// The `STREAMING-*` mode a client announced when it is not one this decoder
/// handles, such as signed chunks (`STREAMING-AWS4-HMAC-SHA256-PAYLOAD`).
/// Such bodies are stored as sent, framing included.
pub fn unsupported_streaming_mode(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with("STREAMING-") && *v != STREAMING_UNSIGNED_PAYLOAD_TRAILER)
}

/// Bounds applied while decoding.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLimits {
    /// Maximum bytes in a size line or trailer line, terminator included.
    pub max_header_line: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_header_line: DEFAULT_MAX_HEADER_LINE,
        }
    }
}

/// Chunk framing errors
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunk size line '{0}'")]
    InvalidSize(String),

    #[error("chunk header line exceeds {0} bytes")]
    HeaderTooLong(usize),

    #[error("chunk data is not followed by CRLF")]
    MissingTerminator,

    #[error("more than {0} trailer lines")]
    TooManyTrailers(usize),

    #[error("body ended before the final chunk")]
    UnexpectedEof,

    #[error("I/O error while reading body: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChunkError> for StorageError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Io(e) => StorageError::Io(e),
            framing => StorageError::MalformedBody(framing.to_string()),
        }
    }
}

struct DecoderState<R> {
    reader: R,
    /// Bytes left in the current chunk; 0 means a size line comes next.
    remaining: u64,
    decoded: u64,
    limits: ChunkLimits,
}

/// Decode an AWS chunked body into a stream of payload pieces.
///
/// The stream ends after the zero-size chunk and its trailers. The first
/// framing error is yielded as the last item; pieces yielded before it are
/// valid payload.
pub fn decode_stream<R>(
    reader: R,
    limits: ChunkLimits,
) -> impl Stream<Item = Result<Bytes, ChunkError>> + Send + 'static
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let state = DecoderState {
        reader,
        remaining: 0,
        decoded: 0,
        limits,
    };

    stream::try_unfold(state, |mut state| async move {
        if state.remaining == 0 {
            let line = read_line(&mut state.reader, state.limits.max_header_line)
                .await?
                .ok_or(ChunkError::UnexpectedEof)?;
            let size = parse_chunk_size(&line)?;
            debug!("AWS chunked: chunk header '{}', size={}", preview(&line), size);

            if size == 0 {
                skip_trailers(&mut state.reader, state.limits.max_header_line).await?;
                debug!("AWS chunked: decoded {} bytes", state.decoded);
                return Ok(None);
            }
            state.remaining = size;
        }

        let piece = read_piece(&mut state.reader, state.remaining).await?;
        state.remaining -= piece.len() as u64;
        state.decoded += piece.len() as u64;

        if state.remaining == 0 {
            expect_crlf(&mut state.reader).await?;
        }
        Ok(Some((piece, state)))
    })
}

/// Parse `<hex>[;extension]` into a chunk size.
fn parse_chunk_size(line: &[u8]) -> Result<u64, ChunkError> {
    let invalid = || ChunkError::InvalidSize(preview(line));
    let text = std::str::from_utf8(line).map_err(|_| invalid())?;
    let digits = text.split(';').next().unwrap_or("").trim();

    if digits.is_empty()
        || digits.len() > MAX_SIZE_DIGITS
        || !digits.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(invalid());
    }
    u64::from_str_radix(digits, 16).map_err(|_| invalid())
}

/// Read one line, without its `\n` or `\r\n` terminator.
///
/// Returns `None` on a clean EOF before any byte of the line.
async fn read_line<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, ChunkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return if line.is_empty() {
                Ok(None)
            } else {
                Err(ChunkError::UnexpectedEof)
            };
        }

        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if line.len() + pos + 1 > max {
                    return Err(ChunkError::HeaderTooLong(max));
                }
                line.extend_from_slice(&buf[..pos]);
                reader.consume(pos + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            None => {
                let n = buf.len();
                if line.len() + n > max {
                    return Err(ChunkError::HeaderTooLong(max));
                }
                line.extend_from_slice(buf);
                reader.consume(n);
            }
        }
    }
}

async fn skip_trailers<R>(reader: &mut R, max: usize) -> Result<(), ChunkError>
where
    R: AsyncBufRead + Unpin,
{
    for _ in 0..MAX_TRAILER_LINES {
        match read_line(reader, max).await? {
            None => return Ok(()),
            Some(line) if line.is_empty() => return Ok(()),
            Some(line) => debug!("AWS chunked: discarding trailer '{}'", preview(&line)),
        }
    }
    Err(ChunkError::TooManyTrailers(MAX_TRAILER_LINES))
}

async fn read_piece<R>(reader: &mut R, remaining: u64) -> Result<Bytes, ChunkError>
where
    R: AsyncBufRead + Unpin,
{
    let buf = reader.fill_buf().await?;
    if buf.is_empty() {
        return Err(ChunkError::UnexpectedEof);
    }
    let wanted = usize::try_from(remaining).unwrap_or(usize::MAX);
    let n = buf.len().min(wanted).min(MAX_PIECE);
    let piece = Bytes::copy_from_slice(&buf[..n]);
    reader.consume(n);
    Ok(piece)
}

async fn expect_crlf<R>(reader: &mut R) -> Result<(), ChunkError>
where
    R: AsyncBufRead + Unpin,
{
    match next_byte(reader).await? {
        Some(b'\n') => Ok(()),
        Some(b'\r') => match next_byte(reader).await? {
            Some(b'\n') => Ok(()),
            Some(_) => Err(ChunkError::MissingTerminator),
            None => Err(ChunkError::UnexpectedEof),
        },
        Some(_) => Err(ChunkError::MissingTerminator),
        None => Err(ChunkError::UnexpectedEof),
    }
}

async fn next_byte<R>(reader: &mut R) -> Result<Option<u8>, ChunkError>
where
    R: AsyncBufRead + Unpin,
{
    let buf = reader.fill_buf().await?;
    let Some(&byte) = buf.first() else {
        return Ok(None);
    };
    reader.consume(1);
    Ok(Some(byte))
}

/// Short printable rendering of a header line for logs and errors.
fn preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    text.chars().take(32).collect()
}
