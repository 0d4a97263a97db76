//! `Content-Length` framing for JSON-RPC over stdio.
//!
//! Every message is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! Other headers (`Content-Type`) are accepted and ignored.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest body we are willing to buffer.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error on the client connection: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed in the middle of a header block")]
    TruncatedHeaders,
    #[error("header block has no Content-Length")]
    MissingContentLength,
    #[error("invalid Content-Length value {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pull the length out of a `Content-Length` header line, if it is one.
fn content_length(line: &str) -> Result<Option<usize>, CodecError> {
    let Some((key, value)) = line.split_once(':') else {
        return Ok(None);
    };
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse()
        .map(Some)
        .map_err(|_| CodecError::InvalidContentLength(value.to_string()))
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next message. `Ok(None)` means the peer closed the stream
    /// between messages.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let Some(len) = self.read_header_block().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            return Err(CodecError::Oversized(len));
        }

        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_header_block(&mut self) -> Result<Option<usize>, CodecError> {
        let mut len = None;
        let mut started = false;

        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return if started {
                    Err(CodecError::TruncatedHeaders)
                } else {
                    Ok(None)
                };
            }
            started = true;

            let line = self.line.trim();
            if line.is_empty() {
                return len.map(Some).ok_or(CodecError::MissingContentLength);
            }
            if let Some(value) = content_length(line)? {
                len = Some(value);
            }
        }
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(msg)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
