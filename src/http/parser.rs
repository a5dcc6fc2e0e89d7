//! Request parsing from a byte stream.
//!
//! # Responsibilities
//! - Read from the connection into a bounded header buffer, tolerating
//!   partial reads
//! - Detect the end of the header block by the blank line that terminates it
//! - Tokenize the request line, split header fields, read a sized body
//! - Enforce target, header and body limits with typed errors
//!
//! # Design Decisions
//! - The header buffer never grows past `max_header_bytes`; a header block
//!   that does not fit is a 431, whatever the total input length, unless
//!   its request target alone is already over the target limit (414)
//! - Bare `\n` line endings are accepted alongside `\r\n`
//! - Transfer codings are not supported; only `Content-Length` bodies
//! - Each read is bounded by the idle timeout, so a stalled peer cannot hold
//!   the connection forever

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::LimitsConfig;
use crate::http::request::{is_tchar, Headers, Method, Request, Version};
use crate::http::status::StatusCode;

/// Size of a single read from the socket.
const READ_CHUNK: usize = 1024;

/// A request that can be answered, but only with an error status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRequest {
    #[error("invalid request line")]
    InvalidRequestLine,

    #[error("invalid method {0:?}")]
    InvalidMethod(String),

    #[error("invalid protocol version {0:?}")]
    InvalidVersion(String),

    #[error("unsupported protocol version {0:?}")]
    UnsupportedVersion(String),

    #[error("request target of {length} bytes exceeds {max}")]
    UriTooLong { length: usize, max: usize },

    #[error("header block exceeds {max} bytes")]
    HeaderBlockTooLarge { max: usize },

    #[error("header field of {length} bytes exceeds {max}")]
    HeaderFieldTooLarge { length: usize, max: usize },

    #[error("more than {max} header fields")]
    TooManyHeaders { max: usize },

    #[error("invalid header field {0:?}")]
    InvalidHeader(String),

    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),

    #[error("body of {length} bytes exceeds {max}")]
    PayloadTooLarge { length: usize, max: usize },

    #[error("transfer coding {0:?} is not supported")]
    UnsupportedTransferCoding(String),
}

impl MalformedRequest {
    /// The status the error response should carry.
    pub fn status(&self) -> StatusCode {
        match self {
            MalformedRequest::InvalidRequestLine
            | MalformedRequest::InvalidMethod(_)
            | MalformedRequest::InvalidVersion(_)
            | MalformedRequest::InvalidHeader(_)
            | MalformedRequest::InvalidContentLength(_) => StatusCode::BAD_REQUEST,
            MalformedRequest::UnsupportedVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            MalformedRequest::UriTooLong { .. } => StatusCode::URI_TOO_LONG,
            MalformedRequest::HeaderBlockTooLarge { .. }
            | MalformedRequest::HeaderFieldTooLarge { .. }
            | MalformedRequest::TooManyHeaders { .. } => {
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
            }
            MalformedRequest::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MalformedRequest::UnsupportedTransferCoding(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

/// Why no request could be produced.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Protocol-level failure; the peer gets an error response.
    #[error("malformed request: {0}")]
    Malformed(#[from] MalformedRequest),

    /// The peer closed the stream before a full request arrived.
    #[error("connection closed after {received} bytes, request incomplete")]
    Incomplete { received: usize },

    /// No bytes arrived within the idle timeout.
    #[error("read timed out after {received} bytes")]
    Timeout { received: usize },

    /// The underlying read failed.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Reads one request from a stream.
#[derive(Debug, Clone)]
pub struct RequestParser {
    limits: LimitsConfig,
    idle_timeout: Option<Duration>,
}

impl RequestParser {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            idle_timeout: None,
        }
    }

    /// Bound every read by `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Read and parse a single request from `reader`.
    pub async fn read_request<R>(&self, reader: &mut R) -> Result<Request, ParseError>
    where
        R: AsyncRead + Unpin,
    {
        let max = self.limits.max_header_bytes;
        let mut buf: Vec<u8> = Vec::with_capacity(max.min(READ_CHUNK * 4));
        let mut chunk = [0u8; READ_CHUNK];

        let (head_len, body_start) = loop {
            let room = max.saturating_sub(buf.len());
            if room == 0 {
                return Err(self.overflow(&buf).into());
            }
            let want = room.min(chunk.len());
            let n = self.read_some(reader, &mut chunk[..want], buf.len()).await?;
            if n == 0 {
                return Err(ParseError::Incomplete { received: buf.len() });
            }
            let scan_from = buf.len().saturating_sub(3);
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = find_head_end(&buf, scan_from) {
                break end;
            }
        };

        let head = self.parse_head(&buf[..head_len])?;
        let body_len = self.body_length(&head.headers)?;

        let mut body = buf.split_off(body_start);
        body.truncate(body_len);
        while body.len() < body_len {
            let want = (body_len - body.len()).min(chunk.len());
            let received = body_start + body.len();
            let n = self.read_some(reader, &mut chunk[..want], received).await?;
            if n == 0 {
                return Err(ParseError::Incomplete { received });
            }
            body.extend_from_slice(&chunk[..n]);
        }

        Ok(Request::new(head.method, head.target, head.version)
            .with_headers(head.headers)
            .with_body(body))
    }

    async fn read_some<R>(
        &self,
        reader: &mut R,
        buf: &mut [u8],
        received: usize,
    ) -> Result<usize, ParseError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let result = match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, reader.read(buf))
                    .await
                    .map_err(|_| ParseError::Timeout { received })?,
                None => reader.read(buf).await,
            };
            match result {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ParseError::Transport(e)),
            }
        }
    }

    /// Error for a header buffer that filled up before the blank line.
    ///
    /// A request line whose target already runs past `max_target_len` is a
    /// 414 even when it never completed; anything else is a 431.
    fn overflow(&self, buf: &[u8]) -> MalformedRequest {
        let line = match buf.iter().position(|&b| b == b'\n') {
            Some(end) => &buf[..end],
            None => buf,
        };
        let mut parts = line.splitn(2, |&b| b == b' ');
        let method = parts.next().unwrap_or_default();
        if !method.is_empty() && method.iter().copied().all(is_tchar) {
            let rest = parts.next().unwrap_or_default();
            let rest = &rest[rest.iter().take_while(|&&b| b == b' ').count()..];
            let length = rest.iter().take_while(|&&b| b != b' ').count();
            if length > self.limits.max_target_len {
                return MalformedRequest::UriTooLong {
                    length,
                    max: self.limits.max_target_len,
                };
            }
        }
        MalformedRequest::HeaderBlockTooLarge {
            max: self.limits.max_header_bytes,
        }
    }

    /// Parse a complete header block (without the terminating blank line).
    pub fn parse_head(&self, head: &[u8]) -> Result<Head, MalformedRequest> {
        let mut lines = head.split(|&b| b == b'\n').map(strip_cr);

        let request_line = lines.next().ok_or(MalformedRequest::InvalidRequestLine)?;
        let (method, target, version) = self.parse_request_line(request_line)?;

        let mut headers = Headers::new();
        for line in lines {
            if line.len() > self.limits.max_header_field_len {
                return Err(MalformedRequest::HeaderFieldTooLarge {
                    length: line.len(),
                    max: self.limits.max_header_field_len,
                });
            }
            if headers.len() == self.limits.max_header_count {
                return Err(MalformedRequest::TooManyHeaders {
                    max: self.limits.max_header_count,
                });
            }
            let (name, value) = parse_field(line)?;
            headers.push(name, value);
        }

        Ok(Head {
            method,
            target,
            version,
            headers,
        })
    }

    fn parse_request_line(&self, line: &[u8]) -> Result<(Method, String, Version), MalformedRequest> {
        let line = std::str::from_utf8(line).map_err(|_| MalformedRequest::InvalidRequestLine)?;
        let mut parts = line.split(' ').filter(|part| !part.is_empty());
        let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v), None) => (m, t, v),
            _ => return Err(MalformedRequest::InvalidRequestLine),
        };

        let method = Method::parse(method)
            .ok_or_else(|| MalformedRequest::InvalidMethod(method.to_string()))?;

        if target.len() > self.limits.max_target_len {
            return Err(MalformedRequest::UriTooLong {
                length: target.len(),
                max: self.limits.max_target_len,
            });
        }
        if target.bytes().any(|b| b.is_ascii_control()) {
            return Err(MalformedRequest::InvalidRequestLine);
        }

        let version = parse_version(version)?;
        Ok((method, target.to_string(), version))
    }

    fn body_length(&self, headers: &Headers) -> Result<usize, MalformedRequest> {
        if let Some(coding) = headers.get("Transfer-Encoding") {
            return Err(MalformedRequest::UnsupportedTransferCoding(coding.to_string()));
        }

        let mut length: Option<usize> = None;
        for value in headers.get_all("Content-Length") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| MalformedRequest::InvalidContentLength(value.to_string()))?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(MalformedRequest::InvalidContentLength(value.to_string()));
                }
                _ => length = Some(parsed),
            }
        }

        let length = length.unwrap_or(0);
        if length > self.limits.max_body_bytes {
            return Err(MalformedRequest::PayloadTooLarge {
                length,
                max: self.limits.max_body_bytes,
            });
        }
        Ok(length)
    }
}

/// Request line and headers, before the body is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
}

/// Locate the blank line ending the header block.
///
/// Returns `(head_len, body_start)`: the head excludes the final line break
/// of the last header, the body starts right after the blank line. Only
/// positions from `from` onwards are examined.
fn find_head_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match &buf[i + 1..] {
                [b'\n', ..] => return Some((i, i + 2)),
                [b'\r', b'\n', ..] => return Some((i, i + 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_version(token: &str) -> Result<Version, MalformedRequest> {
    let invalid = || MalformedRequest::InvalidVersion(token.to_string());
    let numbers = token.strip_prefix("HTTP/").ok_or_else(invalid)?;
    let (major, minor) = numbers.split_once('.').ok_or_else(invalid)?;
    let is_digit = |s: &str| s.len() == 1 && s.as_bytes()[0].is_ascii_digit();
    if !is_digit(major) || !is_digit(minor) {
        return Err(invalid());
    }
    match (major, minor) {
        ("1", "0") => Ok(Version::Http10),
        ("1", _) => Ok(Version::Http11),
        _ => Err(MalformedRequest::UnsupportedVersion(token.to_string())),
    }
}

fn parse_field(line: &[u8]) -> Result<(String, String), MalformedRequest> {
    let invalid = || MalformedRequest::InvalidHeader(String::from_utf8_lossy(line).into_owned());

    // obs-fold continuation lines are not supported
    if matches!(line.first(), Some(b' ' | b'\t')) {
        return Err(invalid());
    }

    let colon = line.iter().position(|&b| b == b':').ok_or_else(invalid)?;
    let (name, rest) = (&line[..colon], &line[colon + 1..]);
    if name.is_empty() || !name.iter().copied().all(is_tchar) {
        return Err(invalid());
    }

    let value = std::str::from_utf8(rest).map_err(|_| invalid())?;
    let value = value.trim_matches(|c| c == ' ' || c == '\t');

    // from_utf8 above guarantees the name is ASCII
    let name = String::from_utf8_lossy(name).into_owned();
    Ok((name, value.to_string()))
}
