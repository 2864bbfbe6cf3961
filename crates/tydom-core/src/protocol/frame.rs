//! Text frame codec for the gateway's HTTP-over-WebSocket protocol.
//!
//! Wire format of a request frame:
//! ```text
//! <METHOD> <path> HTTP/1.1\r\n
//! Content-Length: <n>\r\n
//! Content-Type: application/json; charset=UTF-8\r\n
//! Transac-Id: <id>\r\n
//! User-Agent: <client-id>\r\n
//! \r\n
//! <body>
//! ```
//!
//! Inbound frames use the same layout, but the first line may be a status
//! line (`HTTP/1.1 200 OK`) and the body is usually sent with chunked
//! transfer encoding: size and payload lines alternate, so the payload is
//! rebuilt from the odd-indexed lines.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::request::{Method, Request};
use super::transaction::TransactionId;

/// Content type attached to every request frame.
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";

/// Header carrying the correlation key.
pub const TRANSAC_ID_HEADER: &str = "Transac-Id";

const HEADER_TERMINATOR: &str = "\r\n\r\n";

/// Errors that can occur while decoding an inbound frame.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// The frame contained no text at all.
    #[error("empty frame")]
    Empty,

    /// The frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The `Transac-Id` header value is not an unsigned integer.
    #[error("invalid Transac-Id header value: {0:?}")]
    InvalidTransactionId(String),

    /// The request line names a verb the protocol does not use.
    #[error("unknown request method: {0:?}")]
    UnknownMethod(String),

    /// The body looked like JSON but could not be parsed.
    #[error("malformed JSON body: {0}")]
    InvalidJson(String),
}

/// Decoded frame body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// No payload (or only whitespace).
    Empty,
    /// A payload containing `{`, parsed as JSON.
    Json(Value),
    /// Any other payload, kept as opaque text.
    Text(String),
}

impl Body {
    /// Classifies reassembled body text.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidJson`] when the text contains `{` but is
    /// not valid JSON.
    pub fn from_text(text: &str) -> Result<Self, ParseError> {
        if text.trim().is_empty() {
            return Ok(Body::Empty);
        }
        if text.contains('{') {
            return serde_json::from_str(text)
                .map(Body::Json)
                .map_err(|e| ParseError::InvalidJson(e.to_string()));
        }
        Ok(Body::Text(text.to_string()))
    }

    /// Returns the JSON value, if the body is JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// First line of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StartLine {
    /// `PUT /devices/data HTTP/1.1` – requests and server pushes.
    Request { method: Method, path: String },
    /// `HTTP/1.1 200 OK` – responses.
    Status { code: u16, reason: String },
    /// Anything else; kept for logging.
    Other(String),
}

impl StartLine {
    /// Parses a start line.  Never fails: unknown shapes become [`StartLine::Other`].
    pub fn parse(line: &str) -> Self {
        let mut parts = line.splitn(3, ' ');
        let first = parts.next().unwrap_or_default();
        let second = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();

        if first.starts_with("HTTP/") {
            if let Ok(code) = second.parse::<u16>() {
                return StartLine::Status {
                    code,
                    reason: rest.to_string(),
                };
            }
        } else if rest.starts_with("HTTP/") {
            if let Ok(method) = first.parse::<Method>() {
                return StartLine::Request {
                    method,
                    path: second.to_string(),
                };
            }
        }
        StartLine::Other(line.to_string())
    }
}

/// An inbound frame split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub start_line: StartLine,
    /// Header map keyed by lower-cased header name.
    pub headers: HashMap<String, String>,
    pub transaction_id: Option<TransactionId>,
    pub body: Body,
}

impl ParsedFrame {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Resource path the frame refers to: the request path, or the
    /// `Uri-Origin` header the gateway adds to responses.
    pub fn path(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { path, .. } => Some(path.as_str()),
            _ => self.header("Uri-Origin"),
        }
    }

    /// Status code of a response frame.
    pub fn status(&self) -> Option<u16> {
        match self.start_line {
            StartLine::Status { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Keeps what a waiting caller needs: the status and the body.
    pub fn into_response(self) -> Response {
        Response {
            status: self.status(),
            body: self.body,
        }
    }
}

/// A correlated reply handed to the caller that sent the request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status of the reply, `None` when the frame had no status line.
    pub status: Option<u16>,
    pub body: Body,
}

impl Response {
    /// `true` for a 2xx status line.
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a request into the frame bytes sent over the socket.
///
/// # Examples
///
/// ```rust
/// use tydom_core::{decode_frame, encode_request, Request, TransactionId};
///
/// let bytes = encode_request(&Request::info(), TransactionId(1_700_000_000_000_000), "test/1.0");
/// let frame = decode_frame(&bytes).unwrap();
/// assert_eq!(frame.path(), Some("/info"));
/// assert_eq!(frame.transaction_id, Some(TransactionId(1_700_000_000_000_000)));
/// ```
pub fn encode_request(request: &Request, transaction_id: TransactionId, user_agent: &str) -> Vec<u8> {
    let body = request.body_text();
    let mut frame = String::with_capacity(160 + body.len());

    // `write!` into a String cannot fail, so the results are ignored.
    let _ = write!(frame, "{} {} HTTP/1.1\r\n", request.method, request.path);
    let _ = write!(frame, "Content-Length: {}\r\n", body.len());
    let _ = write!(frame, "Content-Type: {CONTENT_TYPE_JSON}\r\n");
    let _ = write!(frame, "{TRANSAC_ID_HEADER}: {transaction_id}\r\n");
    let _ = write!(frame, "User-Agent: {user_agent}\r\n\r\n");
    frame.push_str(&body);

    frame.into_bytes()
}

/// Decodes one inbound frame.
///
/// # Errors
///
/// Returns [`ParseError`] when the bytes are not UTF-8, the frame is empty,
/// the `Transac-Id` header is not numeric, or a JSON-looking body fails to
/// parse.  Callers log and drop such frames.
pub fn decode_frame(bytes: &[u8]) -> Result<ParsedFrame, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let (head, raw_body) = match text.find(HEADER_TERMINATOR) {
        Some(idx) => (&text[..idx], &text[idx + HEADER_TERMINATOR.len()..]),
        None => (text, ""),
    };

    let mut lines = head.split("\r\n");
    let start_line = StartLine::parse(lines.next().unwrap_or_default());

    let mut headers = HashMap::new();
    for line in lines.filter(|l| !l.is_empty()) {
        match line.split_once(':') {
            Some((name, value)) => {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
            None => debug!("skipping malformed header line {line:?}"),
        }
    }

    let transaction_id = match headers.get(&TRANSAC_ID_HEADER.to_ascii_lowercase()) {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map(TransactionId)
                .map_err(|_| ParseError::InvalidTransactionId(raw.clone()))?,
        ),
        None => None,
    };

    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    let body_text = if chunked || looks_chunked(raw_body) {
        reassemble_chunked(raw_body)
    } else {
        raw_body.to_string()
    };
    let body = Body::from_text(&body_text)?;

    Ok(ParsedFrame {
        start_line,
        headers,
        transaction_id,
        body,
    })
}

/// Rebuilds a chunked body by keeping only the odd-indexed (0-based) lines.
///
/// ```rust
/// use tydom_core::protocol::frame::reassemble_chunked;
///
/// assert_eq!(reassemble_chunked("5\r\nhello\r\n0\r\n\r\n"), "hello");
/// ```
pub fn reassemble_chunked(raw: &str) -> String {
    raw.split("\r\n")
        .enumerate()
        .filter(|(index, _)| index % 2 == 1)
        .map(|(_, line)| line)
        .collect()
}

/// A body without a `Transfer-Encoding` header is still treated as chunked
/// when its first line is a hexadecimal size equal to the byte length of
/// the line that follows it.
fn looks_chunked(raw: &str) -> bool {
    let mut lines = raw.split("\r\n");
    let (Some(size), Some(chunk)) = (lines.next(), lines.next()) else {
        return false;
    };
    !size.is_empty()
        && size.len() <= 8
        && size.chars().all(|c| c.is_ascii_hexdigit())
        && usize::from_str_radix(size, 16).is_ok_and(|len| len == chunk.len())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
