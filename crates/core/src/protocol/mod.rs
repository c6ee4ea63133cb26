//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol — incremental
//! decoding of requests and statuses from a TCP byte stream, encoding of
//! outbound messages, and the `Transport` header sub-grammar.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! SETUP rtsp://server/media.ts RTSP/1.0\r\n
//! CSeq: 1\r\n
//! Transport: RTP/AVP;unicast;client_port=5004-5005\r\n
//! \r\n
//! ```
//!
//! Because messages arrive over TCP with arbitrary fragmentation, parsing is
//! incremental: [`MessageDecoder`](codec::MessageDecoder) retains partial
//! input across calls and emits every message completed so far.

pub mod codec;
pub mod message;
pub mod transport;

pub use codec::MessageDecoder;
pub use message::{Headers, Message, RtspRequest, RtspStatus};
pub use transport::{TransportParam, TransportProto, TransportSpec};

/// RTSP protocol version emitted on every request and status line.
pub const VERSION: &str = "1.0";

/// Default RTSP control port (RFC 2326 §9.2).
pub const PORT_NUMBER: u16 = 554;

/// Default media port pair used when a peer does not request one.
pub const DEFAULT_MEDIA_PORTS: [u16; 2] = [5004, 5005];

/// Default time-to-live for negotiated media delivery.
pub const DEFAULT_TTL: u8 = 64;

/// RTSP method names (RFC 2326 §6.1).
pub mod method {
    pub const ANNOUNCE: &str = "ANNOUNCE";
    pub const DESCRIBE: &str = "DESCRIBE";
    pub const GET_PARAMETER: &str = "GET_PARAMETER";
    pub const OPTIONS: &str = "OPTIONS";
    pub const PAUSE: &str = "PAUSE";
    pub const PLAY: &str = "PLAY";
    pub const RECORD: &str = "RECORD";
    pub const REDIRECT: &str = "REDIRECT";
    pub const SETUP: &str = "SETUP";
    pub const SET_PARAMETER: &str = "SET_PARAMETER";
    pub const TEARDOWN: &str = "TEARDOWN";
}

/// Header field names used by the control plane.
pub mod header {
    pub const ALLOW: &str = "Allow";
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CSEQ: &str = "CSeq";
    pub const RANGE: &str = "Range";
    pub const SERVER: &str = "Server";
    pub const SESSION: &str = "Session";
    pub const TRANSPORT: &str = "Transport";
    pub const X_LOOP_FLAG: &str = "X-Loop-Flag";
    pub const X_ERROR_MSG: &str = "X-Error-Msg";
    pub const X_WARNING_MSG: &str = "X-Warning-Msg";
}

/// `Transport` header parameter names (RFC 2326 §12.39).
pub mod transport_param {
    pub const MULTICAST: &str = "multicast";
    pub const UNICAST: &str = "unicast";
    pub const SOURCE: &str = "source";
    pub const DESTINATION: &str = "destination";
    pub const PORT: &str = "port";
    pub const CLIENT_PORT: &str = "client_port";
    pub const SERVER_PORT: &str = "server_port";
    pub const TTL: &str = "ttl";
}
