use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use rtspgen::client::{ClientConfig, ClientEvent, EventSink, RtspClient};
use rtspgen::reactor::{Handler, Reactor, TimerId, Token, Wire};
use rtspgen::server::RtspServer;
use rtspgen::session::{FileLibrary, ServerSession, SessionManager, SessionObserver};
use rtspgen::ClientState;

#[derive(Parser)]
#[command(
    name = "rtspgen",
    about = "RTSP control-plane load generator: emulated clients and servers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a media library over RTSP.
    Serve {
        /// Bind address (host:port)
        #[arg(long, short, default_value = "0.0.0.0:554")]
        bind: SocketAddr,
        /// Media library root directory
        #[arg(long, short)]
        root: PathBuf,
    },
    /// Drive a batch of emulated clients against a server.
    Drive {
        /// Server address (host:port)
        #[arg(long, short)]
        target: SocketAddr,
        /// Resource path requested by every client
        #[arg(long, short, default_value = "/media.ts")]
        path: String,
        /// Number of concurrent emulated clients
        #[arg(long, short, default_value_t = 1)]
        clients: usize,
        /// Seconds to hold established sessions before tearing down
        #[arg(long, default_value_t = 5)]
        hold_secs: u64,
        /// Request multicast delivery to this destination address
        #[arg(long)]
        multicast: Option<IpAddr>,
        /// Ask the server to loop the resource
        #[arg(long = "loop")]
        loop_media: bool,
    },
}

/// Logs session activity in place of a media backend.
struct LogObserver;

impl SessionObserver for LogObserver {
    fn session_started(&mut self, session: &ServerSession) {
        tracing::info!(
            session_id = %session.id,
            resource = %session.resource.display(),
            destination = %session.dest_addr,
            port = session.dest_port,
            "stream delivery requested"
        );
    }

    fn session_stopped(&mut self, session: &ServerSession) {
        tracing::info!(session_id = %session.id, "stream delivery stopped");
    }
}

#[derive(Default)]
struct Counters {
    connections_attempted: u64,
    connections_successful: u64,
    connections_unsuccessful: u64,
    connections_aborted: u64,
    transactions_attempted: u64,
    transactions_completed: u64,
    transactions_aborted: u64,
}

impl EventSink for Counters {
    fn on_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::ConnectionAttempted => self.connections_attempted += 1,
            ClientEvent::ConnectionSuccessful => self.connections_successful += 1,
            ClientEvent::ConnectionUnsuccessful => self.connections_unsuccessful += 1,
            ClientEvent::ConnectionAborted => self.connections_aborted += 1,
            ClientEvent::TransactionAttempted => self.transactions_attempted += 1,
            ClientEvent::TransactionCompleted => self.transactions_completed += 1,
            ClientEvent::TransactionAborted => self.transactions_aborted += 1,
        }
    }
}

/// Routes reactor events to the emulated client owning each socket.
struct ClientPool {
    clients: Vec<RtspClient>,
    by_token: HashMap<Token, usize>,
    counters: Counters,
    hold_timer: Option<TimerId>,
}

impl ClientPool {
    fn new(clients: Vec<RtspClient>) -> Self {
        ClientPool {
            clients,
            by_token: HashMap::new(),
            counters: Counters::default(),
            hold_timer: None,
        }
    }

    fn start_all(&mut self, reactor: &mut Reactor, hold: Duration) {
        for index in 0..self.clients.len() {
            let client = &mut self.clients[index];
            client.start(reactor, &mut self.counters);
            if let Some(token) = client.token() {
                self.by_token.insert(token, index);
            }
        }
        self.hold_timer = Some(reactor.arm_timer(hold));
    }

    fn finished(&self) -> bool {
        self.clients
            .iter()
            .all(|client| client.state() == ClientState::Disconnected)
    }

    fn client_for(&mut self, token: Token) -> Option<&mut RtspClient> {
        let index = *self.by_token.get(&token)?;
        self.clients.get_mut(index)
    }
}

impl Handler for ClientPool {
    fn on_connected(&mut self, reactor: &mut Reactor, token: Token, ok: bool) {
        let Some(index) = self.by_token.get(&token).copied() else {
            return;
        };
        if !ok {
            self.by_token.remove(&token);
        }
        self.clients[index].on_connected(ok, reactor, &mut self.counters);
    }

    fn on_data(&mut self, reactor: &mut Reactor, token: Token, data: &[u8]) {
        let Some(index) = self.by_token.get(&token).copied() else {
            return;
        };
        if let Err(e) = self.clients[index].on_data(data, reactor, &mut self.counters) {
            tracing::warn!(token, error = %e, "response decode failed, closing");
            reactor.close(token);
            self.by_token.remove(&token);
            self.clients[index].on_connected(false, reactor, &mut self.counters);
        } else if self.client_for(token).is_none_or(|c| c.state() == ClientState::Disconnected) {
            self.by_token.remove(&token);
        }
    }

    fn on_closed(&mut self, reactor: &mut Reactor, token: Token) {
        let Some(index) = self.by_token.remove(&token) else {
            return;
        };
        // Connection lost; the client transitions as if stopped.
        self.clients[index].on_connected(false, reactor, &mut self.counters);
    }

    fn on_timer(&mut self, reactor: &mut Reactor, timer: TimerId) {
        if self.hold_timer != Some(timer) {
            return;
        }
        tracing::info!("hold time elapsed, stopping all clients");
        for client in &mut self.clients {
            client.stop(reactor, &mut self.counters);
        }
    }
}

fn serve(bind: SocketAddr, root: PathBuf) {
    let mut reactor = Reactor::new();
    if let Err(e) = reactor.listen(bind) {
        eprintln!("Failed to bind {bind}: {e}");
        std::process::exit(1);
    }

    let mut server = RtspServer::new(
        SessionManager::new(),
        Box::new(FileLibrary::new(root)),
        Box::new(LogObserver),
    );
    tracing::info!(%bind, "serving");
    reactor.run(&mut server, || false);
}

fn drive(
    target: SocketAddr,
    path: String,
    count: usize,
    hold: Duration,
    multicast: Option<IpAddr>,
    loop_media: bool,
) {
    let uri = format!("rtsp://{target}{path}");
    let clients = (0..count)
        .map(|_| {
            let mut config = ClientConfig::new(target, uri.clone());
            config.multicast = multicast.is_some();
            config.destination = multicast;
            config.loop_flag = loop_media;
            RtspClient::new(config)
        })
        .collect();

    let mut reactor = Reactor::new();
    let mut pool = ClientPool::new(clients);
    tracing::info!(%target, clients = count, "starting client batch");
    pool.start_all(&mut reactor, hold);

    while !pool.finished() {
        reactor.poll(&mut pool, Duration::from_millis(10));
    }

    let c = &pool.counters;
    tracing::info!(
        connections_attempted = c.connections_attempted,
        connections_successful = c.connections_successful,
        connections_unsuccessful = c.connections_unsuccessful,
        connections_aborted = c.connections_aborted,
        transactions_attempted = c.transactions_attempted,
        transactions_completed = c.transactions_completed,
        transactions_aborted = c.transactions_aborted,
        "run complete"
    );
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { bind, root } => serve(bind, root),
        Command::Drive {
            target,
            path,
            clients,
            hold_secs,
            multicast,
            loop_media,
        } => drive(
            target,
            path,
            clients,
            Duration::from_secs(hold_secs),
            multicast,
            loop_media,
        ),
    }
}
