//! Error types for the RTSP emulation library.

use std::fmt;

/// Errors that can occur in the RTSP emulation library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Codec**: [`Decode`](Self::Decode) — malformed RTSP wire data.
///   Decode failures are fatal for the connection they occur on.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode an RTSP message or header value.
    #[error("RTSP decode error: {kind}")]
    Decode { kind: DecodeErrorKind },
}

impl RtspError {
    pub(crate) fn decode(kind: DecodeErrorKind) -> Self {
        RtspError::Decode { kind }
    }
}

/// Specific kind of RTSP decode failure, carrying the offending input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// A request line did not match `METHOD URI RTSP/x.y`.
    BadRequestLine(String),
    /// A status line did not match `RTSP/x.y CODE REASON`.
    BadStatusLine(String),
    /// A header line was neither `Name: Value`, a continuation, nor blank.
    BadHeaderLine(String),
    /// A `Transport` header value did not match the transport grammar.
    BadTransportValue(String),
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequestLine(line) => write!(f, "bad request line: {line:?}"),
            Self::BadStatusLine(line) => write!(f, "bad status line: {line:?}"),
            Self::BadHeaderLine(line) => write!(f, "bad header line: {line:?}"),
            Self::BadTransportValue(value) => write!(f, "bad transport value: {value:?}"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
