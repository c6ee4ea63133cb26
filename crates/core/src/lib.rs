//! Control-plane RTSP load generation.
//!
//! This crate emulates large numbers of RTSP clients and servers for
//! exercising network equipment: session negotiation (SETUP, PLAY,
//! TEARDOWN) over many concurrent TCP connections, driven by one
//! single-threaded reactor. Media delivery itself is out of scope and
//! delegated to an external backend through [`session::SessionObserver`].
//!
//! The main pieces:
//!
//! - [`protocol`]: incremental RTSP message codec and the `Transport`
//!   header grammar.
//! - [`client`]: the per-connection client workflow state machine.
//! - [`server`]: the accepting side with its session validation ladder.
//! - [`session`]: shared session table and resource resolution.
//! - [`reactor`]: non-blocking socket and timer dispatch.

pub mod client;
pub mod error;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod session;

pub use client::{ClientConfig, ClientEvent, ClientState, EventSink, RtspClient};
pub use error::{DecodeErrorKind, Result, RtspError};
pub use protocol::{Message, MessageDecoder, RtspRequest, RtspStatus, TransportSpec};
pub use reactor::{BindConfig, Handler, Reactor, TimerId, Token, Wire};
pub use server::{RtspServer, SERVER_AGENT};
pub use session::{
    FileLibrary, ResourceResolver, ServerSession, SessionManager, SessionObserver,
};
