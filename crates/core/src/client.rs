//! Emulated RTSP client workflow.
//!
//! One [`RtspClient`] drives one connection through
//! connect → SETUP → PLAY → session → TEARDOWN, reporting every
//! protocol-visible step to an injected [`EventSink`]. The six states form
//! a closed transition table over four inputs: `start`, `stop`, the
//! connection outcome, and the completion status of the in-flight
//! transaction. At most one request is outstanding at a time.
//!
//! The client owns its parser and connection identity; sockets belong to
//! the reactor and are reached only through the [`Wire`] trait, which
//! keeps the workflow drivable against a mock in tests.

use std::net::{IpAddr, SocketAddr};

use crate::error::RtspError;
use crate::protocol::codec::{self, MessageDecoder, MessageKind};
use crate::protocol::message::{Message, RtspRequest, RtspStatus};
use crate::protocol::transport::{TransportProto, TransportSpec};
use crate::protocol::{header, method, transport_param, DEFAULT_MEDIA_PORTS, DEFAULT_TTL};
use crate::reactor::{BindConfig, Token, Wire};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Initial and terminal state; no socket exists.
    Disconnected,
    /// TCP connect in flight.
    ConnectWait,
    /// SETUP sent, awaiting status.
    SetupWait,
    /// PLAY sent, awaiting status.
    PlayWait,
    /// Streaming session established; idle until `stop`.
    Session,
    /// TEARDOWN sent, awaiting status.
    TeardownWait,
}

/// Protocol-visible client events reported to the statistics sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectionAttempted,
    ConnectionSuccessful,
    ConnectionUnsuccessful,
    ConnectionAborted,
    TransactionAttempted,
    TransactionCompleted,
    TransactionAborted,
}

/// Statistics callback, invoked once per protocol-visible event.
///
/// Persistence and aggregation are entirely the collaborator's concern;
/// invocation is fire-and-forget from the protocol's perspective.
pub trait EventSink {
    fn on_event(&mut self, event: ClientEvent);
}

/// Configuration for one emulated client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// RTSP server to connect to.
    pub server_addr: SocketAddr,
    /// Request-URI naming the media resource.
    pub uri: String,
    /// Socket binder settings, passed through to the transport layer.
    pub bind: BindConfig,
    /// Requested media delivery address. Defaults to the connection's
    /// local bind address when unset.
    pub destination: Option<IpAddr>,
    /// Requested media port pair. Defaults to [`DEFAULT_MEDIA_PORTS`].
    pub client_ports: Option<[u16; 2]>,
    pub ttl: Option<u8>,
    /// Request multicast delivery instead of unicast.
    pub multicast: bool,
    /// Ask the server to loop the resource.
    pub loop_flag: bool,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr, uri: impl Into<String>) -> Self {
        ClientConfig {
            server_addr,
            uri: uri.into(),
            bind: BindConfig::default(),
            destination: None,
            client_ports: None,
            ttl: None,
            multicast: false,
            loop_flag: false,
        }
    }
}

/// One emulated RTSP client connection.
pub struct RtspClient {
    config: ClientConfig,
    state: ClientState,
    decoder: MessageDecoder,
    token: Option<Token>,
    /// Last issued CSeq; monotonically increasing from 1.
    cseq: u32,
    /// Method of the in-flight transaction, if any.
    pending: Option<&'static str>,
    /// Session identifier returned by SETUP, echoed on PLAY/TEARDOWN.
    session_id: Option<String>,
    local_addr: Option<SocketAddr>,
}

impl RtspClient {
    pub fn new(config: ClientConfig) -> Self {
        RtspClient {
            config,
            state: ClientState::Disconnected,
            decoder: MessageDecoder::new(MessageKind::Status),
            token: None,
            cseq: 0,
            pending: None,
            session_id: None,
            local_addr: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn token(&self) -> Option<Token> {
        self.token
    }

    pub fn last_cseq(&self) -> u32 {
        self.cseq
    }

    /// Begin the workflow. Only meaningful in `Disconnected`; a no-op in
    /// every other state.
    pub fn start(&mut self, wire: &mut dyn Wire, sink: &mut dyn EventSink) {
        if self.state != ClientState::Disconnected {
            return;
        }
        sink.on_event(ClientEvent::ConnectionAttempted);
        match wire.connect(self.config.server_addr, &self.config.bind) {
            Ok(token) => {
                self.token = Some(token);
                self.transition(ClientState::ConnectWait);
            }
            Err(e) => {
                tracing::debug!(addr = %self.config.server_addr, error = %e, "connect failed");
                sink.on_event(ClientEvent::ConnectionUnsuccessful);
            }
        }
    }

    /// Abort or wind down the workflow, per the transition table: a live
    /// session is torn down cleanly, anything earlier is aborted.
    pub fn stop(&mut self, wire: &mut dyn Wire, sink: &mut dyn EventSink) {
        match self.state {
            ClientState::Disconnected | ClientState::TeardownWait => {}
            ClientState::ConnectWait => {
                sink.on_event(ClientEvent::ConnectionAborted);
                self.close(wire);
                self.transition(ClientState::Disconnected);
            }
            ClientState::SetupWait | ClientState::PlayWait => {
                sink.on_event(ClientEvent::TransactionAborted);
                self.close(wire);
                self.transition(ClientState::Disconnected);
            }
            ClientState::Session => {
                self.send_teardown(wire, sink);
                self.transition(ClientState::TeardownWait);
            }
        }
    }

    /// Connection outcome: `true` once the TCP connect completes, `false`
    /// on connect failure or any later connection loss.
    pub fn on_connected(&mut self, ok: bool, wire: &mut dyn Wire, sink: &mut dyn EventSink) {
        match (self.state, ok) {
            (ClientState::ConnectWait, true) => {
                sink.on_event(ClientEvent::ConnectionSuccessful);
                self.local_addr = self.token.and_then(|token| wire.local_addr(token));
                self.send_setup(wire, sink);
                self.transition(ClientState::SetupWait);
            }
            (ClientState::ConnectWait, false) => {
                sink.on_event(ClientEvent::ConnectionUnsuccessful);
                self.drop_connection();
            }
            (ClientState::SetupWait | ClientState::PlayWait | ClientState::TeardownWait, false) => {
                sink.on_event(ClientEvent::TransactionAborted);
                self.drop_connection();
            }
            (ClientState::Session, false) => {
                self.drop_connection();
            }
            (state, ok) => {
                tracing::warn!(?state, ok, "unexpected connection event");
            }
        }
    }

    /// Feed raw bytes received on this connection. Completed statuses
    /// drive the transaction input of the state machine; a decode failure
    /// is fatal and handled by the caller force-closing the connection.
    pub fn on_data(
        &mut self,
        data: &[u8],
        wire: &mut dyn Wire,
        sink: &mut dyn EventSink,
    ) -> Result<(), RtspError> {
        let messages = self.decoder.feed(data)?;
        for message in messages {
            let Message::Status(status) = message else {
                continue;
            };
            self.on_response(&status, wire, sink);
        }
        Ok(())
    }

    /// Transaction completion: a decoded status for the in-flight request.
    pub fn on_response(&mut self, status: &RtspStatus, wire: &mut dyn Wire, sink: &mut dyn EventSink) {
        if let Some(method) = self.pending {
            tracing::debug!(method, code = status.code, "transaction completed");
        }
        match self.state {
            ClientState::SetupWait => {
                sink.on_event(ClientEvent::TransactionCompleted);
                self.pending = None;
                if status.status_category() == 200 {
                    if let Some(id) = status.headers.get(header::SESSION) {
                        self.session_id = Some(id.split(';').next().unwrap_or(id).trim().to_string());
                    }
                    self.send_play(wire, sink);
                    self.transition(ClientState::PlayWait);
                } else {
                    tracing::debug!(code = status.code, "SETUP rejected");
                    self.close(wire);
                    self.transition(ClientState::Disconnected);
                }
            }
            ClientState::PlayWait => {
                sink.on_event(ClientEvent::TransactionCompleted);
                self.pending = None;
                if status.status_category() == 200 {
                    self.transition(ClientState::Session);
                } else {
                    tracing::debug!(code = status.code, "PLAY rejected");
                    self.send_teardown(wire, sink);
                    self.transition(ClientState::TeardownWait);
                }
            }
            ClientState::TeardownWait => {
                sink.on_event(ClientEvent::TransactionCompleted);
                self.pending = None;
                self.close(wire);
                self.transition(ClientState::Disconnected);
            }
            state => {
                tracing::warn!(?state, code = status.code, "status with no transaction in flight");
            }
        }
    }

    fn send_setup(&mut self, wire: &mut dyn Wire, sink: &mut dyn EventSink) {
        let mut request = self.new_request(method::SETUP);

        let mut transport = TransportSpec::new(TransportProto::Udp);
        if self.config.multicast {
            transport.set_flag(transport_param::MULTICAST);
        } else {
            transport.set_flag(transport_param::UNICAST);
        }
        // Unspecified destination falls back to the local bind address.
        let destination = self
            .config
            .destination
            .or_else(|| self.local_addr.map(|addr| addr.ip()));
        if let Some(destination) = destination {
            transport.set_value(transport_param::DESTINATION, destination.to_string());
        }
        let ports = self.config.client_ports.unwrap_or(DEFAULT_MEDIA_PORTS);
        transport.set_ports(transport_param::CLIENT_PORT, ports);
        let ttl = self.config.ttl.unwrap_or(DEFAULT_TTL);
        transport.set_value(transport_param::TTL, ttl.to_string());

        request.headers.set(header::TRANSPORT, transport.encode());
        if self.config.loop_flag {
            request.headers.set(header::X_LOOP_FLAG, "1");
        }
        // More requests follow on this connection; ask the server to keep
        // it open. TEARDOWN omits the header so the server closes for us.
        request.headers.set(header::CONNECTION, "Keepalive");
        self.send_request(request, wire, sink);
    }

    fn send_play(&mut self, wire: &mut dyn Wire, sink: &mut dyn EventSink) {
        let mut request = self.new_request(method::PLAY);
        if let Some(id) = &self.session_id {
            request.headers.set(header::SESSION, id.clone());
        }
        request.headers.set(header::CONNECTION, "Keepalive");
        self.send_request(request, wire, sink);
    }

    fn send_teardown(&mut self, wire: &mut dyn Wire, sink: &mut dyn EventSink) {
        let mut request = self.new_request(method::TEARDOWN);
        if let Some(id) = &self.session_id {
            request.headers.set(header::SESSION, id.clone());
        }
        self.send_request(request, wire, sink);
    }

    /// Build a request with the next CSeq assigned.
    fn new_request(&mut self, method: &'static str) -> RtspRequest {
        self.cseq += 1;
        self.pending = Some(method);
        let mut request = RtspRequest::new(method, &self.config.uri);
        request.headers.set(header::CSEQ, self.cseq.to_string());
        request
    }

    fn send_request(&mut self, request: RtspRequest, wire: &mut dyn Wire, sink: &mut dyn EventSink) {
        if let Some(token) = self.token {
            tracing::debug!(method = %request.method, cseq = self.cseq, "request sent");
            wire.send(token, &codec::encode_request(&request));
        }
        sink.on_event(ClientEvent::TransactionAttempted);
    }

    fn close(&mut self, wire: &mut dyn Wire) {
        if let Some(token) = self.token.take() {
            wire.close(token);
        }
        self.reset_connection();
    }

    /// Release connection state without touching the socket (used when the
    /// reactor already deregistered it).
    fn drop_connection(&mut self) {
        self.token = None;
        self.reset_connection();
        self.transition(ClientState::Disconnected);
    }

    fn reset_connection(&mut self) {
        self.decoder.reset();
        self.pending = None;
        self.session_id = None;
        self.local_addr = None;
    }

    fn transition(&mut self, next: ClientState) {
        tracing::debug!(from = ?self.state, to = ?next, "client state transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Records sends instead of touching sockets.
    #[derive(Default)]
    struct MockWire {
        next_token: Token,
        sent: Vec<(Token, Vec<u8>)>,
        closed: Vec<Token>,
        refuse_connect: bool,
    }

    impl Wire for MockWire {
        fn connect(&mut self, _addr: SocketAddr, _bind: &BindConfig) -> crate::error::Result<Token> {
            if self.refuse_connect {
                return Err(RtspError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)));
            }
            self.next_token += 1;
            Ok(self.next_token)
        }

        fn send(&mut self, token: Token, bytes: &[u8]) {
            self.sent.push((token, bytes.to_vec()));
        }

        fn close(&mut self, token: Token) {
            self.closed.push(token);
        }

        fn local_addr(&self, _token: Token) -> Option<SocketAddr> {
            Some("192.0.2.10:40000".parse().unwrap())
        }
    }

    #[derive(Default)]
    struct VecSink {
        events: Vec<ClientEvent>,
    }

    impl EventSink for VecSink {
        fn on_event(&mut self, event: ClientEvent) {
            self.events.push(event);
        }
    }

    fn new_client() -> RtspClient {
        RtspClient::new(ClientConfig::new(
            "192.0.2.1:554".parse().unwrap(),
            "rtsp://192.0.2.1:554/media.ts",
        ))
    }

    fn request_text(wire: &MockWire, index: usize) -> String {
        String::from_utf8(wire.sent[index].1.clone()).unwrap()
    }

    fn ok_status() -> RtspStatus {
        let mut status = RtspStatus::new(200);
        status.headers.set("Session", "A1B2C3D4");
        status
    }

    #[test]
    fn full_workflow_with_incrementing_cseq() {
        let mut client = new_client();
        let mut wire = MockWire::default();
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::ConnectWait);
        assert_eq!(sink.events, vec![ClientEvent::ConnectionAttempted]);

        client.on_connected(true, &mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::SetupWait);
        let setup = request_text(&wire, 0);
        assert!(setup.starts_with("SETUP rtsp://192.0.2.1:554/media.ts RTSP/1.0\r\n"));
        assert!(setup.contains("CSeq: 1\r\n"));
        assert!(setup.contains("Transport: RTP/AVP;unicast;destination=192.0.2.10;client_port=5004-5005;ttl=64\r\n"));
        assert!(setup.contains("Connection: Keepalive\r\n"));

        client.on_response(&ok_status(), &mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::PlayWait);
        let play = request_text(&wire, 1);
        assert!(play.starts_with("PLAY "));
        assert!(play.contains("CSeq: 2\r\n"));
        assert!(play.contains("Session: A1B2C3D4\r\n"));

        client.on_response(&ok_status(), &mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::Session);

        client.stop(&mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::TeardownWait);
        let teardown = request_text(&wire, 2);
        assert!(teardown.starts_with("TEARDOWN "));
        assert!(teardown.contains("CSeq: 3\r\n"));
        assert!(!teardown.contains("Connection:"), "final request closes the connection");

        client.on_response(&ok_status(), &mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(client.last_cseq(), 3);
        assert_eq!(wire.closed.len(), 1);

        assert_eq!(
            sink.events,
            vec![
                ClientEvent::ConnectionAttempted,
                ClientEvent::ConnectionSuccessful,
                ClientEvent::TransactionAttempted,
                ClientEvent::TransactionCompleted,
                ClientEvent::TransactionAttempted,
                ClientEvent::TransactionCompleted,
                ClientEvent::TransactionAttempted,
                ClientEvent::TransactionCompleted,
            ]
        );
    }

    #[test]
    fn synchronous_connect_failure_stays_disconnected() {
        let mut client = new_client();
        let mut wire = MockWire {
            refuse_connect: true,
            ..Default::default()
        };
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(
            sink.events,
            vec![
                ClientEvent::ConnectionAttempted,
                ClientEvent::ConnectionUnsuccessful,
            ]
        );
    }

    #[test]
    fn rejected_setup_disconnects() {
        let mut client = new_client();
        let mut wire = MockWire::default();
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        client.on_connected(true, &mut wire, &mut sink);
        client.on_response(&RtspStatus::new(404), &mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(wire.closed.len(), 1);
        assert_eq!(wire.sent.len(), 1, "no PLAY after rejected SETUP");
    }

    #[test]
    fn rejected_play_tears_down() {
        let mut client = new_client();
        let mut wire = MockWire::default();
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        client.on_connected(true, &mut wire, &mut sink);
        client.on_response(&ok_status(), &mut wire, &mut sink);
        client.on_response(&RtspStatus::new(455), &mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::TeardownWait);
        assert!(request_text(&wire, 2).starts_with("TEARDOWN "));
    }

    #[test]
    fn stop_during_connect_aborts_connection() {
        let mut client = new_client();
        let mut wire = MockWire::default();
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        client.stop(&mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(wire.closed.len(), 1);
        assert_eq!(
            sink.events,
            vec![
                ClientEvent::ConnectionAttempted,
                ClientEvent::ConnectionAborted,
            ]
        );
    }

    #[test]
    fn stop_during_setup_aborts_transaction() {
        let mut client = new_client();
        let mut wire = MockWire::default();
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        client.on_connected(true, &mut wire, &mut sink);
        client.stop(&mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(*sink.events.last().unwrap(), ClientEvent::TransactionAborted);
    }

    #[test]
    fn connection_loss_in_session_disconnects_silently() {
        let mut client = new_client();
        let mut wire = MockWire::default();
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        client.on_connected(true, &mut wire, &mut sink);
        client.on_response(&ok_status(), &mut wire, &mut sink);
        client.on_response(&ok_status(), &mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::Session);

        let events_before = sink.events.len();
        client.on_connected(false, &mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(sink.events.len(), events_before);
    }

    #[test]
    fn connection_loss_mid_transaction_aborts() {
        let mut client = new_client();
        let mut wire = MockWire::default();
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        client.on_connected(true, &mut wire, &mut sink);
        client.on_connected(false, &mut wire, &mut sink);
        assert_eq!(client.state(), ClientState::Disconnected);
        assert_eq!(*sink.events.last().unwrap(), ClientEvent::TransactionAborted);
    }

    #[test]
    fn start_is_noop_outside_disconnected() {
        let mut client = new_client();
        let mut wire = MockWire::default();
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        let events = sink.events.len();
        client.start(&mut wire, &mut sink);
        assert_eq!(sink.events.len(), events);
        assert_eq!(client.state(), ClientState::ConnectWait);
    }

    #[test]
    fn status_bytes_drive_transaction() {
        let mut client = new_client();
        let mut wire = MockWire::default();
        let mut sink = VecSink::default();

        client.start(&mut wire, &mut sink);
        client.on_connected(true, &mut wire, &mut sink);

        let wire_bytes = codec::encode_status(&ok_status());
        // Split the response across two reads.
        let (left, right) = wire_bytes.split_at(7);
        client.on_data(left, &mut wire, &mut sink).unwrap();
        assert_eq!(client.state(), ClientState::SetupWait);
        client.on_data(right, &mut wire, &mut sink).unwrap();
        assert_eq!(client.state(), ClientState::PlayWait);
    }
}
