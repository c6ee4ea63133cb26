//! Single-threaded, non-blocking I/O dispatch.
//!
//! The reactor exclusively owns every socket and timer. Each
//! [`poll`](Reactor::poll) iteration fires due timers, then sweeps all
//! registered sockets for accept/connect/read readiness and invokes the
//! matching [`Handler`] callback; callbacks run to completion on the loop
//! thread and must never block on I/O. Sockets are non-blocking and
//! `WouldBlock` results simply leave them for the next sweep, so one thread
//! can host thousands of connections.
//!
//! Outbound writes are single-shot and unbuffered: the original system
//! assumed socket writes never block, and that simplifying assumption is
//! preserved here. A short or refused write is logged and the remainder
//! dropped, which is lossy under backpressure.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Type};

use crate::error::{Result, RtspError};

/// Identifies one registered socket.
pub type Token = usize;

/// Identifies one armed timer.
pub type TimerId = u64;

/// Per-connection socket configuration supplied by the controller.
///
/// These fields configure how the emulated endpoint binds to the test
/// network. They are opaque to the protocol core; the reactor applies them
/// at socket creation, before the connect is initiated.
#[derive(Debug, Clone, Default)]
pub struct BindConfig {
    /// Interface name the connection should be pinned to (Linux only).
    pub interface: Option<String>,
    /// Local address to bind before connecting.
    pub local_addr: Option<SocketAddr>,
    /// ToS/traffic-class byte for outbound packets.
    pub tos: Option<u8>,
}

/// Readiness callbacks invoked by the reactor.
///
/// Each callback receives the reactor so it can send, connect, close, or
/// arm timers; the reactor never re-enters a handler already on the stack.
pub trait Handler {
    /// A listener produced a new connection `conn`.
    fn on_accepted(&mut self, _reactor: &mut Reactor, _listener: Token, _conn: Token, _peer: SocketAddr) {}

    /// An outbound connect finished; `ok` is false on failure, in which
    /// case the socket is already deregistered.
    fn on_connected(&mut self, _reactor: &mut Reactor, _token: Token, _ok: bool) {}

    /// Bytes drained from a ready socket, in arrival order.
    fn on_data(&mut self, reactor: &mut Reactor, token: Token, data: &[u8]);

    /// The socket was closed by the peer or force-closed after an error.
    /// The token is already deregistered.
    fn on_closed(&mut self, reactor: &mut Reactor, token: Token);

    /// An armed timer reached its deadline.
    fn on_timer(&mut self, _reactor: &mut Reactor, _timer: TimerId) {}
}

/// Send-side socket operations, split out so state machines can be driven
/// against a mock in tests.
pub trait Wire {
    /// Begin a TCP connection. A synchronous failure returns `Err`; on
    /// `Ok` the connection outcome is delivered via
    /// [`Handler::on_connected`].
    fn connect(&mut self, addr: SocketAddr, bind: &BindConfig) -> Result<Token>;

    /// Write bytes to a connection. Fire-and-forget: socket-level failures
    /// surface later as a connection-closed event.
    fn send(&mut self, token: Token, bytes: &[u8]);

    /// Deregister and drop a socket. No callback fires for a close the
    /// owner requested itself.
    fn close(&mut self, token: Token);

    /// Local address of a registered socket.
    fn local_addr(&self, token: Token) -> Option<SocketAddr>;
}

enum Socket {
    Listener(TcpListener),
    /// Outbound connection whose establishment has not been observed yet.
    Connecting(TcpStream),
    Stream(TcpStream),
}

enum SweepEvent {
    Accepted(TcpStream, SocketAddr),
    Connected(bool),
    Data(Vec<u8>),
    Closed,
    Idle,
}

/// The event loop. Owns all sockets and timers; single-threaded.
pub struct Reactor {
    sockets: HashMap<Token, Socket>,
    next_token: Token,
    timers: BinaryHeap<Reverse<(Instant, TimerId)>>,
    armed: HashSet<TimerId>,
    next_timer: TimerId,
    /// Tokens force-closed outside the sweep (e.g. send failure), whose
    /// closed event is still owed to the handler.
    dead: Vec<Token>,
}

impl Reactor {
    pub fn new() -> Self {
        Reactor {
            sockets: HashMap::new(),
            next_token: 1,
            timers: BinaryHeap::new(),
            armed: HashSet::new(),
            next_timer: 1,
            dead: Vec::new(),
        }
    }

    fn alloc_token(&mut self) -> Token {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    /// Bind a listening socket and register it for accept readiness.
    pub fn listen(&mut self, addr: SocketAddr) -> Result<Token> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let token = self.alloc_token();
        tracing::info!(%addr, token, "listening");
        self.sockets.insert(token, Socket::Listener(listener));
        Ok(token)
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Schedule a single-shot timer `delay` from now.
    pub fn arm_timer(&mut self, delay: Duration) -> TimerId {
        let id = self.next_timer;
        self.next_timer += 1;
        self.timers.push(Reverse((Instant::now() + delay, id)));
        self.armed.insert(id);
        id
    }

    /// Cancel a pending timer. Guaranteed: the callback will not fire
    /// after this returns.
    pub fn cancel_timer(&mut self, id: TimerId) {
        self.armed.remove(&id);
    }

    /// One loop iteration: deliver deferred closes, fire due timers, sweep
    /// every socket once, and sleep up to `max_wait` if nothing was ready.
    pub fn poll(&mut self, handler: &mut dyn Handler, max_wait: Duration) {
        for token in std::mem::take(&mut self.dead) {
            handler.on_closed(self, token);
        }

        self.fire_due_timers(handler);

        let tokens: Vec<Token> = self.sockets.keys().copied().collect();
        let mut progressed = false;
        for token in tokens {
            let event = self.sweep_socket(token);
            match event {
                SweepEvent::Accepted(stream, peer) => {
                    progressed = true;
                    match stream.set_nonblocking(true) {
                        Ok(()) => {
                            let conn = self.alloc_token();
                            self.sockets.insert(conn, Socket::Stream(stream));
                            handler.on_accepted(self, token, conn, peer);
                        }
                        Err(e) => {
                            tracing::warn!(%peer, error = %e, "dropping accepted connection");
                        }
                    }
                }
                SweepEvent::Connected(ok) => {
                    progressed = true;
                    if !ok {
                        self.sockets.remove(&token);
                    }
                    handler.on_connected(self, token, ok);
                }
                SweepEvent::Data(data) => {
                    progressed = true;
                    handler.on_data(self, token, &data);
                }
                SweepEvent::Closed => {
                    progressed = true;
                    self.sockets.remove(&token);
                    handler.on_closed(self, token);
                }
                SweepEvent::Idle => {}
            }
        }

        if !progressed {
            let mut wait = max_wait;
            if let Some(Reverse((deadline, _))) = self.timers.peek() {
                wait = wait.min(deadline.saturating_duration_since(Instant::now()));
            }
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }

    /// Run until `stop` returns true, polling with a short tick.
    pub fn run(&mut self, handler: &mut dyn Handler, mut stop: impl FnMut() -> bool) {
        while !stop() {
            self.poll(handler, Duration::from_millis(10));
        }
    }

    fn fire_due_timers(&mut self, handler: &mut dyn Handler) {
        let now = Instant::now();
        while let Some(Reverse((deadline, id))) = self.timers.peek().copied() {
            if deadline > now {
                break;
            }
            self.timers.pop();
            // Cancelled entries stay in the heap; drop them here.
            if self.armed.remove(&id) {
                handler.on_timer(self, id);
            }
        }
    }

    /// Probe one socket for readiness without blocking.
    fn sweep_socket(&mut self, token: Token) -> SweepEvent {
        // A handler callback earlier in this sweep may have closed it.
        let Some(socket) = self.sockets.get_mut(&token) else {
            return SweepEvent::Idle;
        };
        match socket {
            Socket::Listener(listener) => match listener.accept() {
                Ok((stream, peer)) => SweepEvent::Accepted(stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => SweepEvent::Idle,
                Err(e) => {
                    tracing::warn!(token, error = %e, "accept error");
                    SweepEvent::Idle
                }
            },
            Socket::Connecting(stream) => match stream.peer_addr() {
                Ok(_) => {
                    let Some(Socket::Connecting(stream)) = self.sockets.remove(&token) else {
                        return SweepEvent::Idle;
                    };
                    self.sockets.insert(token, Socket::Stream(stream));
                    SweepEvent::Connected(true)
                }
                Err(e) if e.kind() == ErrorKind::NotConnected => {
                    match stream.take_error() {
                        Ok(None) => SweepEvent::Idle,
                        Ok(Some(e)) => {
                            tracing::debug!(token, error = %e, "connect failed");
                            SweepEvent::Connected(false)
                        }
                        Err(e) => {
                            tracing::debug!(token, error = %e, "connect failed");
                            SweepEvent::Connected(false)
                        }
                    }
                }
                Err(_) => SweepEvent::Connected(false),
            },
            Socket::Stream(stream) => {
                let mut buf = [0u8; 4096];
                match stream.read(&mut buf) {
                    Ok(0) => SweepEvent::Closed,
                    Ok(n) => SweepEvent::Data(buf[..n].to_vec()),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => SweepEvent::Idle,
                    Err(e) if e.kind() == ErrorKind::Interrupted => SweepEvent::Idle,
                    Err(e) => {
                        tracing::warn!(token, error = %e, "read error, closing connection");
                        SweepEvent::Closed
                    }
                }
            }
        }
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Wire for Reactor {
    fn connect(&mut self, addr: SocketAddr, bind: &BindConfig) -> Result<Token> {
        let socket = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        if let Some(tos) = bind.tos {
            socket.set_tos(u32::from(tos))?;
        }
        #[cfg(target_os = "linux")]
        if let Some(interface) = &bind.interface {
            socket.bind_device(Some(interface.as_bytes()))?;
        }
        if let Some(local) = bind.local_addr {
            socket.bind(&local.into())?;
        }

        // Non-blocking connect: the handshake proceeds in the background
        // and the outcome is observed by the Connecting sweep. Anything
        // other than an in-progress report is a synchronous failure.
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {}
            Err(e) => return Err(RtspError::Io(e)),
        }

        let token = self.alloc_token();
        tracing::debug!(%addr, token, "connection attempt registered");
        self.sockets.insert(token, Socket::Connecting(socket.into()));
        Ok(token)
    }

    fn send(&mut self, token: Token, bytes: &[u8]) {
        let socket = match self.sockets.get_mut(&token) {
            Some(Socket::Stream(stream)) | Some(Socket::Connecting(stream)) => stream,
            _ => {
                tracing::warn!(token, "send on unknown connection");
                return;
            }
        };
        match socket.write(bytes) {
            Ok(n) if n < bytes.len() => {
                tracing::warn!(token, written = n, len = bytes.len(), "short write, dropping remainder");
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                tracing::warn!(token, len = bytes.len(), "send would block, dropping");
            }
            Err(e) => {
                tracing::warn!(token, error = %e, "write error, closing connection");
                self.sockets.remove(&token);
                self.dead.push(token);
            }
        }
    }

    fn close(&mut self, token: Token) {
        if self.sockets.remove(&token).is_some() {
            tracing::debug!(token, "connection closed");
        }
    }

    fn local_addr(&self, token: Token) -> Option<SocketAddr> {
        match self.sockets.get(&token)? {
            Socket::Listener(listener) => listener.local_addr().ok(),
            Socket::Connecting(stream) | Socket::Stream(stream) => stream.local_addr().ok(),
        }
    }
}

/// A non-blocking connect reports EINPROGRESS on Unix and WouldBlock on
/// Windows while the handshake is pending.
fn connect_in_progress(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    return e.raw_os_error() == Some(libc::EINPROGRESS);
    #[cfg(not(unix))]
    {
        e.kind() == ErrorKind::WouldBlock
    }
}
