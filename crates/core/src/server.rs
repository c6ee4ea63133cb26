//! Emulated RTSP server role.
//!
//! [`RtspServer`] accepts connections from the reactor and gives each one
//! its own [`ServerConnection`] with a private request parser. Decoded
//! requests run through a validation ladder and are routed to the SETUP,
//! PLAY, or TEARDOWN handler; every other method is refused with 405.
//! Responses echo the request's CSeq and Session headers and carry a fixed
//! `Server` header. A connection stays open after a response only when the
//! request carried `Connection: Keepalive`.
//!
//! Media delivery is not done here. Session activation and deactivation
//! are reported to a [`SessionObserver`] so an external backend can start
//! and stop the actual stream.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::protocol::codec::{self, MessageDecoder, MessageKind};
use crate::protocol::message::{Message, RtspRequest, RtspStatus};
use crate::protocol::transport::{TransportProto, TransportSpec};
use crate::protocol::{header, method, transport_param, DEFAULT_MEDIA_PORTS, DEFAULT_TTL};
use crate::reactor::{Handler, Reactor, Token, Wire};
use crate::session::{ResolveError, ResourceResolver, SessionManager, SessionObserver};

/// Value of the `Server` header on every response.
pub const SERVER_AGENT: &str = "rtspgen/0.1";

/// Methods the server routes; everything else earns a 405.
const ALLOWED_METHODS: &str = "SETUP, PLAY, TEARDOWN";

/// Per-connection server state: parser, peer identity, and the sessions
/// negotiated over this socket (identifiers only, the table is shared).
struct ServerConnection {
    peer: SocketAddr,
    local_ip: IpAddr,
    decoder: MessageDecoder,
    session_ids: Vec<String>,
}

impl ServerConnection {
    fn new(peer: SocketAddr, local_ip: IpAddr) -> Self {
        ServerConnection {
            peer,
            local_ip,
            decoder: MessageDecoder::new(MessageKind::Request),
            session_ids: Vec::new(),
        }
    }
}

/// The server role: session table, resource resolution, and one
/// [`ServerConnection`] per accepted socket.
pub struct RtspServer {
    sessions: SessionManager,
    resolver: Box<dyn ResourceResolver>,
    observer: Box<dyn SessionObserver>,
    connections: HashMap<Token, ServerConnection>,
}

impl RtspServer {
    pub fn new(
        sessions: SessionManager,
        resolver: Box<dyn ResourceResolver>,
        observer: Box<dyn SessionObserver>,
    ) -> Self {
        RtspServer {
            sessions,
            resolver,
            observer,
            connections: HashMap::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn register(&mut self, token: Token, peer: SocketAddr, local_ip: IpAddr) {
        self.connections
            .insert(token, ServerConnection::new(peer, local_ip));
    }

    /// Validate and route one request, producing the response and the
    /// keep-open verdict.
    fn handle_request(&mut self, token: Token, request: &RtspRequest) -> (RtspStatus, bool) {
        let keep_open = request
            .headers
            .get(header::CONNECTION)
            .is_some_and(|v| v.eq_ignore_ascii_case("keepalive"));

        let mut response = if !request.headers.contains(header::CSEQ) {
            RtspStatus::new(400)
        } else {
            match request.method.as_str() {
                method::SETUP => self.setup(token, request),
                method::PLAY => self.play(request),
                method::TEARDOWN => self.teardown(token, request),
                other => {
                    tracing::debug!(method = %other, "method not allowed");
                    let mut status = RtspStatus::new(405);
                    status.headers.set(header::ALLOW, ALLOWED_METHODS);
                    status
                }
            }
        };

        if let Some(cseq) = request.headers.get(header::CSEQ) {
            response.headers.set(header::CSEQ, cseq.to_string());
        }
        if let Some(session) = request.headers.get(header::SESSION) {
            if !response.headers.contains(header::SESSION) {
                response.headers.set(header::SESSION, session.to_string());
            }
        }
        response.headers.set(header::SERVER, SERVER_AGENT);
        (response, keep_open)
    }

    fn setup(&mut self, token: Token, request: &RtspRequest) -> RtspStatus {
        // SETUP negotiates a new session; an existing association on the
        // request is an aggregate operation.
        if request.headers.contains(header::SESSION) {
            return RtspStatus::new(459);
        }

        let Some(value) = request.headers.get(header::TRANSPORT) else {
            return RtspStatus::new(461);
        };
        let mut transport = match TransportSpec::decode(value) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable transport");
                return RtspStatus::new(461);
            }
        };
        if transport.proto == TransportProto::Tcp {
            return error_status(461, "only UDP delivery is supported");
        }

        let resource = match self.resolver.resolve(uri_path(&request.uri)) {
            Ok(path) => path,
            Err(ResolveError::NotFound) => return RtspStatus::new(404),
            Err(ResolveError::Forbidden) => return RtspStatus::new(403),
        };

        let Some(conn) = self.connections.get(&token) else {
            return RtspStatus::new(500);
        };
        let dest_addr = if transport.is_multicast() {
            match transport.destination().map(str::parse) {
                Some(Ok(addr)) => addr,
                Some(Err(_)) => return error_status(461, "bad destination address"),
                None => return error_status(461, "multicast requires a destination"),
            }
        } else {
            match transport.destination().map(str::parse) {
                Some(Ok(addr)) => addr,
                Some(Err(_)) => return error_status(461, "bad destination address"),
                // Unicast delivery defaults to the requesting peer.
                None => conn.peer.ip(),
            }
        };
        let ports = transport.requested_ports().unwrap_or(DEFAULT_MEDIA_PORTS);
        let ttl = transport.ttl().unwrap_or(DEFAULT_TTL);
        let loop_flag = request
            .headers
            .get(header::X_LOOP_FLAG)
            .is_some_and(|v| v != "0");

        let session = self.sessions.create(
            resource,
            loop_flag,
            conn.local_ip,
            dest_addr,
            ports[0],
            ttl,
        );
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.session_ids.push(session.id.clone());
        }
        tracing::info!(session_id = %session.id, resource = %session.resource.display(), "session created");

        // Echo the transport back normalized to what was actually granted.
        transport.set_value(transport_param::DESTINATION, dest_addr.to_string());
        transport.set_ports(transport_param::CLIENT_PORT, ports);
        transport.set_value(transport_param::TTL, ttl.to_string());

        let mut status = RtspStatus::new(200);
        status.headers.set(header::SESSION, session.id);
        status.headers.set(header::TRANSPORT, transport.encode());
        status
    }

    fn play(&mut self, request: &RtspRequest) -> RtspStatus {
        let Some(id) = request_session_id(request) else {
            return RtspStatus::new(454);
        };
        let Some(session) = self.sessions.set_active(id, true) else {
            return RtspStatus::new(454);
        };
        self.observer.session_started(&session);

        let mut status = RtspStatus::new(200);
        if request.headers.contains(header::RANGE) {
            status
                .headers
                .set(header::X_WARNING_MSG, "Range header not supported");
        }
        status
    }

    fn teardown(&mut self, token: Token, request: &RtspRequest) -> RtspStatus {
        let Some(id) = request_session_id(request) else {
            return RtspStatus::new(454);
        };
        let Some(session) = self.sessions.remove(id) else {
            return RtspStatus::new(454);
        };
        self.observer.session_stopped(&session);
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.session_ids.retain(|owned| owned != &session.id);
        }
        RtspStatus::new(200)
    }

    /// Forget a connection and tear down every session it negotiated.
    /// Backends are notified only for sessions that were playing.
    fn cleanup_connection(&mut self, token: Token) {
        let Some(conn) = self.connections.remove(&token) else {
            return;
        };
        for id in conn.session_ids {
            let was_active = self.sessions.get(&id).is_some_and(|s| s.active);
            if let Some(session) = self.sessions.remove(&id) {
                tracing::debug!(session_id = %session.id, "session dropped with connection");
                if was_active {
                    self.observer.session_stopped(&session);
                }
            }
        }
    }
}

impl Handler for RtspServer {
    fn on_accepted(&mut self, reactor: &mut Reactor, _listener: Token, conn: Token, peer: SocketAddr) {
        let local_ip = reactor
            .local_addr(conn)
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        tracing::info!(%peer, token = conn, "connection accepted");
        self.register(conn, peer, local_ip);
    }

    fn on_data(&mut self, reactor: &mut Reactor, token: Token, data: &[u8]) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let messages = match conn.decoder.feed(data) {
            Ok(messages) => messages,
            Err(e) => {
                // Decode failures are unrecoverable for this connection.
                tracing::warn!(token, error = %e, "request decode failed, closing");
                reactor.close(token);
                self.cleanup_connection(token);
                return;
            }
        };

        for message in messages {
            let Message::Request(request) = message else {
                continue;
            };
            tracing::debug!(token, method = %request.method, "request received");
            let (response, keep_open) = self.handle_request(token, &request);
            reactor.send(token, &codec::encode_status(&response));
            if !keep_open {
                reactor.close(token);
                self.cleanup_connection(token);
                break;
            }
        }
    }

    fn on_closed(&mut self, _reactor: &mut Reactor, token: Token) {
        tracing::debug!(token, "connection lost");
        self.cleanup_connection(token);
    }
}

fn error_status(code: u16, message: &str) -> RtspStatus {
    let mut status = RtspStatus::new(code);
    status.headers.set(header::X_ERROR_MSG, message);
    status
}

/// Session identifier from the request, with any `;timeout=` suffix
/// stripped.
fn request_session_id(request: &RtspRequest) -> Option<&str> {
    let value = request.headers.get(header::SESSION)?;
    Some(value.split(';').next().unwrap_or(value).trim())
}

/// Path component of a request URI; a bare path passes through.
fn uri_path(uri: &str) -> &str {
    match uri.strip_prefix("rtsp://") {
        Some(rest) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => uri,
    }
}
