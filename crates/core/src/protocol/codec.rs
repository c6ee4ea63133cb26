//! Incremental RTSP message decoding and encoding.
//!
//! TCP delivers RTSP messages with arbitrary fragmentation: a single read
//! may contain half a request line, several complete messages back to back,
//! or a body split across many segments. [`MessageDecoder`] is a three-state
//! machine (Idle → Header → Body) that consumes raw chunks, keeps partial
//! input buffered, and returns every message completed so far in arrival
//! order.

use crate::error::{DecodeErrorKind, Result, RtspError};
use crate::protocol::header;
use crate::protocol::message::{reason_phrase, Headers, Message, RtspRequest, RtspStatus};

/// Which first-line grammar the decoder applies: a client decodes statuses,
/// a server decodes requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Awaiting a request/status line. Blank lines are tolerated here
    /// (RFC 2616 §4.1).
    Idle,
    /// Accumulating header lines until the blank terminator.
    Header,
    /// Accumulating exactly `Content-Length` body bytes.
    Body,
}

/// Incremental RTSP message parser.
///
/// One decoder instance serves one connection; state carries over between
/// [`feed`](Self::feed) calls. A decode error is fatal for the connection —
/// no partial message is ever delivered.
#[derive(Debug)]
pub struct MessageDecoder {
    kind: MessageKind,
    state: DecodeState,
    buffer: Vec<u8>,
    message: Option<Message>,
    last_field_name: Option<String>,
    body_remaining: usize,
}

impl MessageDecoder {
    pub fn new(kind: MessageKind) -> Self {
        MessageDecoder {
            kind,
            state: DecodeState::Idle,
            buffer: Vec::new(),
            message: None,
            last_field_name: None,
            body_remaining: 0,
        }
    }

    /// Discard buffered input and any message in progress.
    pub fn reset(&mut self) {
        self.state = DecodeState::Idle;
        self.buffer.clear();
        self.message = None;
        self.last_field_name = None;
        self.body_remaining = 0;
    }

    /// Append raw bytes and extract every message completed by them.
    ///
    /// Partial data is retained for the next call, so a message may be fed
    /// in arbitrarily small chunks, including mid-header and mid-body
    /// splits. Bytes beyond a completed body stay buffered for the next
    /// message.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();

        loop {
            let completed = match self.state {
                DecodeState::Idle | DecodeState::Header => {
                    let Some(line) = self.take_line() else { break };
                    if self.state == DecodeState::Idle {
                        self.idle_line(&line)?
                    } else {
                        self.header_line(&line)?
                    }
                }
                DecodeState::Body => {
                    if self.buffer.is_empty() {
                        break;
                    }
                    let take = self.body_remaining.min(self.buffer.len());
                    let chunk: Vec<u8> = self.buffer.drain(..take).collect();
                    self.body_mut().extend_from_slice(&chunk);
                    self.body_remaining -= take;
                    self.body_remaining == 0
                }
            };

            if completed {
                messages.push(self.finish());
            }
        }

        Ok(messages)
    }

    /// Extract one `\n`-terminated line from the buffer, stripping the
    /// trailing `\r\n`.
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
        let mut end = raw.len();
        while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
            end -= 1;
        }
        Some(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    fn idle_line(&mut self, line: &str) -> Result<bool> {
        if line.is_empty() {
            return Ok(false);
        }
        self.message = Some(match self.kind {
            MessageKind::Request => {
                let (method, uri, version) = parse_request_line(line).ok_or_else(|| {
                    RtspError::decode(DecodeErrorKind::BadRequestLine(line.to_string()))
                })?;
                let mut request = RtspRequest::new(&method, &uri);
                request.version = version;
                Message::Request(request)
            }
            MessageKind::Status => {
                let (version, code, reason) = parse_status_line(line).ok_or_else(|| {
                    RtspError::decode(DecodeErrorKind::BadStatusLine(line.to_string()))
                })?;
                let mut status = RtspStatus::new(code);
                status.version = version;
                status.reason = reason;
                Message::Status(status)
            }
        });
        self.state = DecodeState::Header;
        Ok(false)
    }

    fn header_line(&mut self, line: &str) -> Result<bool> {
        if line.is_empty() {
            // End of headers: enter Body or complete immediately.
            let declared = self.headers().get(header::CONTENT_LENGTH).map(str::to_string);
            self.body_remaining = match declared {
                Some(value) => value.trim().parse().map_err(|_| {
                    RtspError::decode(DecodeErrorKind::BadHeaderLine(format!(
                        "{}: {}",
                        header::CONTENT_LENGTH,
                        value
                    )))
                })?,
                None => 0,
            };
            if self.body_remaining > 0 {
                self.state = DecodeState::Body;
                return Ok(false);
            }
            return Ok(true);
        }

        match parse_header_line(line) {
            Some(HeaderLine::Field(name, value)) => {
                self.headers_mut().set(&name, value);
                self.last_field_name = Some(name);
                Ok(false)
            }
            Some(HeaderLine::Continuation(rest)) => {
                // Folded header: appended to the previous field with a
                // single space separator.
                let name = self.last_field_name.clone().ok_or_else(|| {
                    RtspError::decode(DecodeErrorKind::BadHeaderLine(line.to_string()))
                })?;
                let previous = self.headers().get(&name).unwrap_or("").to_string();
                self.headers_mut().set(&name, format!("{previous} {rest}"));
                Ok(false)
            }
            None => Err(RtspError::decode(DecodeErrorKind::BadHeaderLine(
                line.to_string(),
            ))),
        }
    }

    fn finish(&mut self) -> Message {
        self.state = DecodeState::Idle;
        self.last_field_name = None;
        self.body_remaining = 0;
        self.message
            .take()
            .unwrap_or_else(|| unreachable!("message completed with none in progress"))
    }

    fn headers(&self) -> &Headers {
        match self.message.as_ref() {
            Some(message) => message.headers(),
            None => unreachable!("header state with no message in progress"),
        }
    }

    fn headers_mut(&mut self) -> &mut Headers {
        match self.message.as_mut() {
            Some(Message::Request(request)) => &mut request.headers,
            Some(Message::Status(status)) => &mut status.headers,
            None => unreachable!("header state with no message in progress"),
        }
    }

    fn body_mut(&mut self) -> &mut Vec<u8> {
        match self.message.as_mut() {
            Some(Message::Request(request)) => &mut request.body,
            Some(Message::Status(status)) => &mut status.body,
            None => unreachable!("body state with no message in progress"),
        }
    }
}

/// Serialize a message to its wire form.
///
/// If the body is non-empty and no `Content-Length` header is set, one is
/// synthesized from the body length.
pub fn encode(message: &Message) -> Vec<u8> {
    match message {
        Message::Request(request) => encode_request(request),
        Message::Status(status) => encode_status(status),
    }
}

pub fn encode_request(request: &RtspRequest) -> Vec<u8> {
    let first_line = format!(
        "{} {} RTSP/{}\r\n",
        request.method, request.uri, request.version
    );
    encode_parts(&first_line, &request.headers, &request.body)
}

/// Serialize a status message. The reason phrase is always looked up from
/// the standard table (unlisted codes encode as `Unknown`).
pub fn encode_status(status: &RtspStatus) -> Vec<u8> {
    let first_line = format!(
        "RTSP/{} {} {}\r\n",
        status.version,
        status.code,
        reason_phrase(status.code)
    );
    encode_parts(&first_line, &status.headers, &status.body)
}

fn encode_parts(first_line: &str, headers: &Headers, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(first_line.len() + 64 + body.len());
    out.extend_from_slice(first_line.as_bytes());
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !body.is_empty() && !headers.contains(header::CONTENT_LENGTH) {
        out.extend_from_slice(format!("{}: {}\r\n", header::CONTENT_LENGTH, body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

fn parse_request_line(line: &str) -> Option<(String, String, String)> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let uri = parts.next()?;
    let version_token = parts.next()?;
    if !method
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    let version = version_token.strip_prefix("RTSP/")?;
    if !valid_version(version) {
        return None;
    }
    Some((method.to_string(), uri.to_string(), version.to_string()))
}

fn parse_status_line(line: &str) -> Option<(String, u16, String)> {
    let rest = line.strip_prefix("RTSP/")?;
    let split = rest.find(|c: char| c.is_whitespace())?;
    let (version, rest) = rest.split_at(split);
    if !valid_version(version) {
        return None;
    }
    let rest = rest.trim_start();
    let split = rest.find(|c: char| c.is_whitespace())?;
    let (code, reason) = rest.split_at(split);
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let code = code.parse().ok()?;
    Some((version.to_string(), code, reason.trim_start().to_string()))
}

/// `digits '.' digits`, the whole token.
fn valid_version(version: &str) -> bool {
    match version.split_once('.') {
        Some((major, minor)) => {
            !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

enum HeaderLine {
    Field(String, String),
    Continuation(String),
}

fn parse_header_line(line: &str) -> Option<HeaderLine> {
    if line.starts_with(|c: char| c.is_whitespace()) {
        return Some(HeaderLine::Continuation(line.trim_start().to_string()));
    }
    let colon = line.find(':')?;
    let name = line[..colon].trim_end();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    Some(HeaderLine::Field(
        name.to_string(),
        line[colon + 1..].trim_start().to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(kind: MessageKind, wire: &[u8]) -> Message {
        let mut decoder = MessageDecoder::new(kind);
        let mut messages = decoder.feed(wire).unwrap();
        assert_eq!(messages.len(), 1);
        messages.remove(0)
    }

    #[test]
    fn request_round_trip() {
        let mut request = RtspRequest::new("SETUP", "rtsp://host:554/media.ts");
        request.headers.set("CSeq", "1");
        request
            .headers
            .set("Transport", "RTP/AVP;unicast;client_port=5004-5005");
        let wire = encode_request(&request);

        let decoded = decode_one(MessageKind::Request, &wire);
        let Message::Request(decoded) = decoded else {
            panic!("expected request");
        };
        assert_eq!(decoded, request);
    }

    #[test]
    fn status_round_trip_with_body() {
        let mut status = RtspStatus::new(200);
        status.headers.set("CSeq", "2");
        status.body = b"hello body".to_vec();
        status.headers.set("Content-Length", "10");
        let wire = encode_status(&status);

        let Message::Status(decoded) = decode_one(MessageKind::Status, &wire) else {
            panic!("expected status");
        };
        assert_eq!(decoded.code, 200);
        assert_eq!(decoded.reason, "OK");
        assert_eq!(decoded.body, b"hello body");
        assert_eq!(decoded.headers, status.headers);
    }

    #[test]
    fn content_length_synthesized_when_missing() {
        let mut status = RtspStatus::new(200);
        status.body = b"12345".to_vec();
        let wire = encode_status(&status);
        let text = String::from_utf8(wire).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n12345"));
    }

    #[test]
    fn incremental_feed_byte_by_byte() {
        let mut request = RtspRequest::new("PLAY", "rtsp://host/media.ts");
        request.headers.set("CSeq", "2");
        request.headers.set("Session", "A1B2C3D4");
        request.body = b"param: value".to_vec();
        let wire = encode_request(&request);

        let mut decoder = MessageDecoder::new(MessageKind::Request);
        let mut messages = Vec::new();
        for byte in &wire {
            messages.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(messages.len(), 1);
        let Message::Request(decoded) = &messages[0] else {
            panic!("expected request");
        };
        assert_eq!(decoded.method, "PLAY");
        assert_eq!(decoded.headers.get("Session"), Some("A1B2C3D4"));
        assert_eq!(decoded.body, b"param: value");
    }

    #[test]
    fn pipelined_messages_in_one_feed() {
        let mut first = RtspRequest::new("SETUP", "rtsp://host/a.ts");
        first.headers.set("CSeq", "1");
        let mut second = RtspRequest::new("PLAY", "rtsp://host/a.ts");
        second.headers.set("CSeq", "2");

        let mut wire = encode_request(&first);
        wire.extend_from_slice(&encode_request(&second));

        let mut decoder = MessageDecoder::new(MessageKind::Request);
        let messages = decoder.feed(&wire).unwrap();
        assert_eq!(messages.len(), 2);
        let Message::Request(a) = &messages[0] else {
            panic!()
        };
        let Message::Request(b) = &messages[1] else {
            panic!()
        };
        assert_eq!(a.method, "SETUP");
        assert_eq!(b.method, "PLAY");
    }

    #[test]
    fn surplus_body_bytes_start_next_message() {
        let wire = b"RTSP/1.0 200 OK\r\nContent-Length: 4\r\n\r\nbodyRTSP/1.0 454 Session Not Found\r\n\r\n";
        let mut decoder = MessageDecoder::new(MessageKind::Status);
        let messages = decoder.feed(wire).unwrap();
        assert_eq!(messages.len(), 2);
        let Message::Status(first) = &messages[0] else {
            panic!()
        };
        let Message::Status(second) = &messages[1] else {
            panic!()
        };
        assert_eq!(first.body, b"body");
        assert_eq!(second.code, 454);
    }

    #[test]
    fn blank_lines_before_request_line_skipped() {
        let wire = b"\r\n\r\nTEARDOWN rtsp://host/a.ts RTSP/1.0\r\nCSeq: 3\r\n\r\n";
        let Message::Request(request) = decode_one(MessageKind::Request, wire) else {
            panic!("expected request");
        };
        assert_eq!(request.method, "TEARDOWN");
    }

    #[test]
    fn header_continuation_folded_with_space() {
        let wire = b"RTSP/1.0 200 OK\r\nX-Warning-Msg: first\r\n  second\r\n\r\n";
        let Message::Status(status) = decode_one(MessageKind::Status, wire) else {
            panic!("expected status");
        };
        assert_eq!(status.headers.get("X-Warning-Msg"), Some("first second"));
    }

    #[test]
    fn bad_request_line() {
        let mut decoder = MessageDecoder::new(MessageKind::Request);
        let err = decoder.feed(b"blah blah\r\n").unwrap_err();
        let RtspError::Decode {
            kind: DecodeErrorKind::BadRequestLine(line),
        } = err
        else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(line, "blah blah");
    }

    #[test]
    fn bad_status_line_truncated() {
        let mut decoder = MessageDecoder::new(MessageKind::Status);
        let err = decoder.feed(b"RTSP/1.0 200\r\n").unwrap_err();
        assert!(matches!(
            err,
            RtspError::Decode {
                kind: DecodeErrorKind::BadStatusLine(_)
            }
        ));
    }

    #[test]
    fn bad_header_line() {
        let mut decoder = MessageDecoder::new(MessageKind::Status);
        let err = decoder
            .feed(b"RTSP/1.0 200 OK\r\nno colon here\r\n")
            .unwrap_err();
        let RtspError::Decode {
            kind: DecodeErrorKind::BadHeaderLine(line),
        } = err
        else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(line, "no colon here");
    }

    #[test]
    fn continuation_without_previous_header_rejected() {
        let mut decoder = MessageDecoder::new(MessageKind::Status);
        let err = decoder.feed(b"RTSP/1.0 200 OK\r\n  dangling\r\n").unwrap_err();
        assert!(matches!(
            err,
            RtspError::Decode {
                kind: DecodeErrorKind::BadHeaderLine(_)
            }
        ));
    }

    #[test]
    fn unknown_status_code_encodes_unknown_reason() {
        let status = RtspStatus::new(299);
        let text = String::from_utf8(encode_status(&status)).unwrap();
        assert!(text.starts_with("RTSP/1.0 299 Unknown\r\n"));
    }

    #[test]
    fn reset_discards_partial_message() {
        let mut decoder = MessageDecoder::new(MessageKind::Request);
        assert!(decoder.feed(b"SETUP rtsp://host/a.ts RTSP/1.0\r\nCS").unwrap().is_empty());
        decoder.reset();
        let messages = decoder
            .feed(b"PLAY rtsp://host/a.ts RTSP/1.0\r\nCSeq: 9\r\n\r\n")
            .unwrap();
        assert_eq!(messages.len(), 1);
    }
}
