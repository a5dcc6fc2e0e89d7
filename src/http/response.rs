//! Response model and builder.
//!
//! # Responsibilities
//! - Resolve the reason phrase for a status through the status table
//! - Assemble headers in a stable order and compute `Content-Length`
//! - Serialize the status line, headers and body to wire bytes
//!
//! # Design Decisions
//! - `build` is pure: the clock is an argument, content is resolved by the
//!   caller, so identical inputs give byte-identical responses
//! - Every response closes the connection (`Connection: close`)
//! - HEAD responses keep the GET headers, including `Content-Length`, and
//!   drop the body

use std::io;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::date::format_http_date;
use crate::http::request::{Headers, Method, Request, Version};
use crate::http::status::StatusCode;

/// Value of the `Server` header.
pub const SERVER_NAME: &str = concat!("wsfs/", env!("CARGO_PKG_VERSION"));

/// What a response carries besides its status: body, media type and any
/// extra headers (e.g. `Allow`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    content_type: Option<String>,
    bytes: Vec<u8>,
    extra_headers: Vec<(String, String)>,
}

impl Payload {
    /// No body, no content type.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            bytes,
            extra_headers: Vec::new(),
        }
    }

    /// Short `text/plain` body naming the status, e.g. `404 Not Found\n`.
    pub fn status_text(status: StatusCode) -> Self {
        Self::new("text/plain; charset=utf-8", format!("{}\n", status).into_bytes())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A fully built response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    version: Version,
    status: StatusCode,
    reason: &'static str,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Status line, headers, blank line and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("{} {} {}\r\n", self.version, self.status.as_u16(), self.reason);
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    /// Write the serialized response to `writer` and flush it.
    pub async fn write_to<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await
    }
}

/// Build the response to `request`.
pub fn build(request: &Request, status: StatusCode, payload: Payload, now: DateTime<Utc>) -> Response {
    let head_only = *request.method() == Method::Head;
    assemble(request.version(), status, payload, head_only, now)
}

/// Build an error response when no usable request exists (parse failures).
pub fn build_error(version: Version, status: StatusCode, now: DateTime<Utc>) -> Response {
    assemble(version, status, Payload::status_text(status), false, now)
}

fn assemble(
    version: Version,
    status: StatusCode,
    payload: Payload,
    head_only: bool,
    now: DateTime<Utc>,
) -> Response {
    let Payload {
        content_type,
        bytes,
        extra_headers,
    } = payload;

    let mut headers = Headers::new();
    headers.push("Date", format_http_date(now));
    headers.push("Server", SERVER_NAME);

    let body = if status.allows_body() {
        if let Some(content_type) = content_type {
            headers.push("Content-Type", content_type);
        }
        headers.push("Content-Length", bytes.len().to_string());
        if head_only {
            Vec::new()
        } else {
            bytes
        }
    } else {
        Vec::new()
    };

    for (name, value) in extra_headers {
        headers.push(name, value);
    }
    headers.push("Connection", "close");

    Response {
        version,
        status,
        reason: status.reason(),
        headers,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn serializes_status_line_headers_and_body() {
        let request = Request::new(Method::Get, "/", Version::Http11);
        let response = build(&request, StatusCode::OK, Payload::new("text/html", b"<p>hi</p>".to_vec()), now());

        let expected = format!(
            "HTTP/1.1 200 OK\r\n\
             Date: Tue, 02 Jan 2024 03:04:05 GMT\r\n\
             Server: {}\r\n\
             Content-Type: text/html\r\n\
             Content-Length: 9\r\n\
             Connection: close\r\n\
             \r\n\
             <p>hi</p>",
            SERVER_NAME
        );
        assert_eq!(String::from_utf8(response.to_bytes()).unwrap(), expected);
    }

    #[test]
    fn answers_in_request_version() {
        let request = Request::new(Method::Get, "/", Version::Http10);
        let response = build(&request, StatusCode::NOT_FOUND, Payload::status_text(StatusCode::NOT_FOUND), now());
        assert!(response.to_bytes().starts_with(b"HTTP/1.0 404 Not Found\r\n"));
        assert_eq!(response.body(), b"404 Not Found\n");
    }

    #[test]
    fn head_keeps_length_but_drops_body() {
        let request = Request::new(Method::Head, "/", Version::Http11);
        let response = build(&request, StatusCode::OK, Payload::new("text/plain", b"12345".to_vec()), now());
        assert_eq!(response.header("Content-Length"), Some("5"));
        assert!(response.body().is_empty());
        assert!(response.to_bytes().ends_with(b"Connection: close\r\n\r\n"));
    }

    #[test]
    fn bodiless_statuses_carry_no_length() {
        let request = Request::new(Method::Get, "/", Version::Http11);
        let response = build(&request, StatusCode::NO_CONTENT, Payload::new("text/plain", b"x".to_vec()), now());
        assert_eq!(response.header("Content-Length"), None);
        assert_eq!(response.header("Content-Type"), None);
        assert!(response.body().is_empty());
    }

    #[test]
    fn extra_headers_precede_connection() {
        let request = Request::new(Method::Post, "/", Version::Http11);
        let payload = Payload::status_text(StatusCode::METHOD_NOT_ALLOWED).with_header("Allow", "GET, HEAD");
        let response = build(&request, StatusCode::METHOD_NOT_ALLOWED, payload, now());

        let names: Vec<_> = response.headers().iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["Date", "Server", "Content-Type", "Content-Length", "Allow", "Connection"]
        );
    }

    #[test]
    fn unregistered_code_gets_generic_reason() {
        let status = StatusCode::from_u16(299).unwrap();
        let response = build_error(Version::Http11, status, now());
        assert!(response.to_bytes().starts_with(b"HTTP/1.1 299 Success\r\n"));
    }

    #[test]
    fn build_is_deterministic() {
        let request = Request::new(Method::Get, "/a", Version::Http11).with_header("Accept", "text/html");
        let a = build(&request, StatusCode::OK, Payload::new("text/plain", b"a".to_vec()), now());
        let b = build(&request, StatusCode::OK, Payload::new("text/plain", b"a".to_vec()), now());
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[tokio::test]
    async fn write_to_sends_wire_bytes() {
        let response = build_error(Version::Http11, StatusCode::BAD_REQUEST, now());
        let mut out = Vec::new();
        response.write_to(&mut out).await.unwrap();
        assert_eq!(out, response.to_bytes());
    }
}
