//! RTSP message data types (RFC 2326 §6, §7).

use crate::protocol::VERSION;

/// Header fields of one RTSP message.
///
/// Names are stored as received; lookups are case-insensitive per
/// RFC 2326 §4.2. Setting a name that is already present overwrites the
/// previous value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Insert or overwrite a header field.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An RTSP request: method, URI, version, headers, and optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    /// RTSP method (SETUP, PLAY, TEARDOWN, ...).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:554/media.ts`).
    pub uri: String,
    /// Protocol version without the `RTSP/` prefix (e.g. `1.0`).
    pub version: String,
    pub headers: Headers,
    /// Body bytes, exactly `Content-Length` long on a decoded message.
    pub body: Vec<u8>,
}

impl RtspRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: VERSION.to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }
}

/// An RTSP status (response) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspStatus {
    /// Protocol version without the `RTSP/` prefix.
    pub version: String,
    /// Three-digit status code.
    pub code: u16,
    /// Reason phrase as received, or looked up from the standard table
    /// when the status is built locally.
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl RtspStatus {
    /// Build a status with the standard reason phrase for `code`.
    pub fn new(code: u16) -> Self {
        RtspStatus {
            version: VERSION.to_string(),
            code,
            reason: reason_phrase(code).to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Status code rounded down to the nearest hundred (2xx → 200, ...).
    pub fn status_category(&self) -> u16 {
        self.code / 100 * 100
    }
}

/// A decoded RTSP message, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(RtspRequest),
    Status(RtspStatus),
}

impl Message {
    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(request) => &request.headers,
            Message::Status(status) => &status.headers,
        }
    }
}

/// Standard reason phrase for an RTSP status code (RFC 2326 §7.1.1).
///
/// Covers the full assigned range 100–551; unlisted codes map to
/// `"Unknown"`.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        250 => "Low on Storage Space",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Time-out",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Large",
        415 => "Unsupported Media Type",
        451 => "Parameter Not Understood",
        452 => "Conference Not Found",
        453 => "Not Enough Bandwidth",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        456 => "Header Field Not Valid for Resource",
        457 => "Invalid Range",
        458 => "Parameter Is Read-Only",
        459 => "Aggregate operation not allowed",
        460 => "Only aggregate operation allowed",
        461 => "Unsupported transport",
        462 => "Destination unreachable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Time-out",
        505 => "RTSP Version not supported",
        551 => "Option not supported",
        _ => "Unknown",
    }
}
