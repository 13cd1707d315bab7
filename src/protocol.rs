//! Request-line and header parsing, plus response encoding.
//!
//! Only the slice of HTTP/1.x this server needs:
//! - Request: `METHOD PATH ...\n`, then `Name: value` lines, then a blank line
//! - Response: `HTTP/1.1 <code> <reason>\r\n`, optional `Content-Type`, blank
//!   line, body
//!
//! Header names are kept exactly as the client sent them. Lines without the
//! `": "` separator are dropped without error.

use bytes::BytesMut;
use std::collections::HashMap;
use tracing::trace;

/// Protocol version written on every status line
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Separator between a header name and its value
const HEADER_SEPARATOR: &str = ": ";

/// Header carrying the request body size
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Method and path from a request line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub path: &'a str,
}

/// Parse a request line such as `POST /data HTTP/1.1`.
///
/// Returns `None` when the line has fewer than two whitespace-separated
/// tokens. Anything after the path is ignored.
pub fn parse_request_line(line: &str) -> Option<RequestLine<'_>> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    Some(RequestLine { method, path })
}

/// Split a header line once on the first `": "`.
pub fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    line.split_once(HEADER_SEPARATOR)
}

/// Request headers, keyed case-sensitively as received.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Headers {
    fields: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one already-trimmed header line. Returns false if the line was
    /// dropped for lacking a separator.
    pub fn insert_line(&mut self, line: &str) -> bool {
        match parse_header_line(line) {
            Some((name, value)) => {
                self.fields.insert(name.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    /// Look up a header by its exact name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Declared body length. Absent or non-numeric values count as zero.
    pub fn content_length(&self) -> usize {
        self.get(CONTENT_LENGTH)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Collect headers from `lines`, stopping at the first blank line.
pub fn parse_headers<'a, I>(lines: I) -> Headers
where
    I: IntoIterator<Item = &'a str>,
{
    let mut headers = Headers::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if !headers.insert_line(line) {
            trace!(line, "Dropping header line without separator");
        }
    }
    headers
}

/// Operation selected by a request's method and path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `GET /data`
    FetchAll,
    /// `POST /data`
    Append,
    /// Anything else
    NotFound,
}

impl Route {
    /// Exact, case-sensitive match on method and path.
    pub fn resolve(method: &str, path: &str) -> Self {
        match (method, path) {
            ("GET", "/data") => Route::FetchAll,
            ("POST", "/data") => Route::Append,
            _ => Route::NotFound,
        }
    }
}

/// Response status codes the server emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Created,
    BadRequest,
    NotFound,
    InternalServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Created => "Created",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Response generator
pub struct Response;

impl Response {
    /// Status line followed by an empty header block and no body.
    pub fn status(status: Status) -> BytesMut {
        let mut buf = BytesMut::with_capacity(48);
        Self::status_line(&mut buf, status);
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Status line, JSON content type and body.
    pub fn json(status: Status, body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(80 + body.len());
        Self::status_line(&mut buf, status);
        buf.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
        buf.extend_from_slice(body);
        buf
    }

    fn status_line(buf: &mut BytesMut, status: Status) {
        buf.extend_from_slice(format!("{HTTP_VERSION} {status}\r\n").as_bytes());
    }
}
