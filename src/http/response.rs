//! HTTP/1.1 response builder.
//!
//! Builds responses fluently and serializes them to a byte buffer for the
//! connection writer. JSON bodies are either passed through verbatim
//! ([`Response::json_bytes`], used for cached upstream payloads) or
//! serialized from a value ([`Response::json`], used for error bodies).

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::{Headers, StatusCode};

const JSON_CONTENT_TYPE: &str = "application/json";

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use coingate::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok).json_bytes(&b"[1,2]"[..]);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Type: application/json\r\n"));
/// assert!(text.ends_with("\r\n\r\n[1,2]"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
    head_only: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
            head_only: false,
        }
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in place, for middleware decorating a downstream response.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a plain-text body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets an already-encoded JSON body without copying or re-encoding it.
    #[must_use]
    pub fn json_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.headers.set("Content-Type", JSON_CONTENT_TYPE);
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON body.
    ///
    /// Serialization of the gateway's own error bodies cannot fail; should a
    /// caller pass a value that does, an empty object is sent instead.
    #[must_use]
    pub fn json<T: Serialize>(self, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        self.json_bytes(body)
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Marks the response as an answer to `HEAD`: headers (including the real
    /// `Content-Length`) are written, the body is not.
    #[must_use]
    pub fn head_only(mut self, head_only: bool) -> Self {
        self.head_only = head_only;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body bytes.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Serializes the response into HTTP/1.1 wire format.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` when a body is present
    /// without a content type, plus `Connection` and `Content-Length`.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);

        if !self.head_only {
            buf.put(self.body);
        }

        buf
    }
}
