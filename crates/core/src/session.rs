//! Server-side RTSP session management.
//!
//! A session is created by a successful SETUP, activated by PLAY, and
//! removed by TEARDOWN or when its owning connection closes. The
//! [`SessionManager`] owns the table of open sessions; connection handlers
//! hold only session identifiers, never session references. Media delivery
//! itself belongs to an external collaborator notified through
//! [`SessionObserver`].

use std::collections::HashMap;
use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::distr::Alphanumeric;
use rand::RngExt;

/// Length of generated session identifiers.
pub const SESSION_ID_LEN: usize = 8;

/// One negotiated streaming arrangement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSession {
    /// Random alphanumeric identifier, unique among open sessions.
    pub id: String,
    /// Resolved filesystem path of the requested media resource.
    pub resource: PathBuf,
    /// Whether the media backend should loop the resource.
    pub loop_flag: bool,
    /// Local address of the connection that negotiated the session.
    pub source_addr: IpAddr,
    /// Negotiated delivery destination.
    pub dest_addr: IpAddr,
    /// Negotiated delivery port (low port of the pair).
    pub dest_port: u16,
    pub ttl: u8,
    /// Set by PLAY, cleared by TEARDOWN or connection loss.
    pub active: bool,
}

/// Notified when a session transitions active/inactive, so the media
/// backend can start or stop actual delivery.
pub trait SessionObserver {
    fn session_started(&mut self, session: &ServerSession);
    fn session_stopped(&mut self, session: &ServerSession);
}

/// Why a request URI could not be mapped to a servable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// No such resource (maps to 404).
    NotFound,
    /// Resource exists but is not a readable regular file (maps to 403).
    Forbidden,
}

/// Maps a request URI path to a filesystem path and checks access.
pub trait ResourceResolver {
    fn resolve(&self, path: &str) -> Result<PathBuf, ResolveError>;
}

/// Production resolver: joins the request path with a configured library
/// root and requires a readable regular file.
#[derive(Debug, Clone)]
pub struct FileLibrary {
    root: PathBuf,
}

impl FileLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileLibrary { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceResolver for FileLibrary {
    fn resolve(&self, path: &str) -> Result<PathBuf, ResolveError> {
        let full = self.root.join(path.trim_start_matches('/'));
        let meta = std::fs::metadata(&full).map_err(|_| ResolveError::NotFound)?;
        if !meta.is_file() {
            return Err(ResolveError::Forbidden);
        }
        File::open(&full).map_err(|_| ResolveError::Forbidden)?;
        Ok(full)
    }
}

/// Registry of open sessions, keyed by generated identifier.
///
/// Handles are `Clone` and share one table. All protocol-driven mutation
/// happens on the single reactor thread; the lock keeps handles sound when
/// a collaborator inspects the table from elsewhere.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, ServerSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Allocate a session with a fresh unique identifier. The session
    /// starts inactive; a snapshot is returned.
    pub fn create(
        &self,
        resource: PathBuf,
        loop_flag: bool,
        source_addr: IpAddr,
        dest_addr: IpAddr,
        dest_port: u16,
        ttl: u8,
    ) -> ServerSession {
        let mut sessions = self.sessions.write();
        let id = Self::generate_id(&sessions, Self::random_id);
        let session = ServerSession {
            id: id.clone(),
            resource,
            loop_flag,
            source_addr,
            dest_addr,
            dest_port,
            ttl,
            active: false,
        };
        sessions.insert(id.clone(), session.clone());
        tracing::debug!(session_id = %id, total_sessions = sessions.len(), "session created");
        session
    }

    /// Fixed-length identifier drawn from `candidate`, resampled until it
    /// collides with no currently open session.
    fn generate_id(
        sessions: &HashMap<String, ServerSession>,
        mut candidate: impl FnMut() -> String,
    ) -> String {
        loop {
            let id = candidate();
            if !sessions.contains_key(&id) {
                return id;
            }
        }
    }

    fn random_id() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ServerSession> {
        self.sessions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Flip a session's active flag, returning the updated snapshot.
    pub fn set_active(&self, id: &str, active: bool) -> Option<ServerSession> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id)?;
        session.active = active;
        tracing::debug!(session_id = %id, active, "session state change");
        Some(session.clone())
    }

    /// Remove a session (TEARDOWN or connection loss). The returned
    /// snapshot is marked inactive.
    pub fn remove(&self, id: &str) -> Option<ServerSession> {
        let mut session = self.sessions.write().remove(id)?;
        session.active = false;
        tracing::debug!(session_id = %id, remaining = self.len(), "session removed");
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
