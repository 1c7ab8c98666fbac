//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the registry of open reading sessions.

use crate::config::Config;
use reader_core::domain::UserId;
use reader_core::ports::DatabaseService;
use reader_core::reader::{LiveSession, ReaderService};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub reader: ReaderService,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(db: Arc<dyn DatabaseService>, config: Arc<Config>) -> Self {
        let limits = SessionLimits {
            idle_timeout: config.session_idle_timeout,
            per_reader: config.max_sessions_per_reader,
            total: config.max_open_sessions,
        };
        Self {
            reader: ReaderService::new(db.clone(), config.reader_settings()),
            db,
            config,
            sessions: SessionRegistry::new(limits),
        }
    }
}

/// Periodically closes reading sessions that have been idle too long. Readers
/// who navigate away never send a close request, so this is what ends them.
pub fn spawn_idle_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let period = (state.sessions.limits.idle_timeout / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = state.sessions.evict_idle().await;
            if evicted > 0 {
                info!(evicted, "Closed idle reading sessions");
            }
        }
    })
}

//=========================================================================================
// SessionRegistry (Open Reading Sessions)
//=========================================================================================

#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub idle_timeout: Duration,
    /// Open sessions per signed-in reader; the least recently used goes first.
    pub per_reader: usize,
    /// Open sessions overall, anonymous previews included.
    pub total: usize,
}

struct RegistryEntry {
    session: Arc<LiveSession>,
    last_seen: Instant,
}

/// Open reading sessions, keyed by session id. A session is only visible to
/// the reader who opened it.
///
/// Removing a session only drops the registry's handle. Its pending store
/// writes still complete once the last in-flight request lets go of it.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, RegistryEntry>>,
    limits: SessionLimits,
}

impl SessionRegistry {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            limits,
        }
    }

    /// Registers a new session, first making room under the configured limits.
    pub async fn insert(&self, session: Arc<LiveSession>) {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        let idle_timeout = self.limits.idle_timeout;
        sessions.retain(|_, e| now.duration_since(e.last_seen) <= idle_timeout);

        if let Some(user_id) = session.user_id() {
            let owner = Some(user_id);
            while count_where(&sessions, |s| s.user_id() == owner) >= self.limits.per_reader {
                match evict_least_recent(&mut sessions, |s| s.user_id() == owner) {
                    Some(id) => debug!(session_id = %id, %user_id, "Evicted reader's oldest session"),
                    None => break,
                }
            }
        }
        while sessions.len() >= self.limits.total {
            match evict_least_recent(&mut sessions, |_| true) {
                Some(id) => debug!(session_id = %id, "Evicted least recently used session"),
                None => break,
            }
        }

        sessions.insert(
            session.id(),
            RegistryEntry {
                session,
                last_seen: now,
            },
        );
    }

    /// Looks up a session for its owner and marks it as used.
    pub async fn get(&self, session_id: Uuid, user_id: Option<UserId>) -> Option<Arc<LiveSession>> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .filter(|e| e.session.user_id() == user_id)?;
        entry.last_seen = Instant::now();
        Some(entry.session.clone())
    }

    pub async fn remove(&self, session_id: Uuid, user_id: Option<UserId>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&session_id) {
            Some(e) if e.session.user_id() == user_id => {
                sessions.remove(&session_id);
                debug!(%session_id, "Reading session closed");
                true
            }
            _ => false,
        }
    }

    /// Drops every session idle for longer than the timeout, returning how many.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let now = Instant::now();
        let idle_timeout = self.limits.idle_timeout;
        sessions.retain(|_, e| now.duration_since(e.last_seen) <= idle_timeout);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn count_where(
    sessions: &HashMap<Uuid, RegistryEntry>,
    pred: impl Fn(&LiveSession) -> bool,
) -> usize {
    sessions.values().filter(|e| pred(&e.session)).count()
}

fn evict_least_recent(
    sessions: &mut HashMap<Uuid, RegistryEntry>,
    pred: impl Fn(&LiveSession) -> bool,
) -> Option<Uuid> {
    let oldest = sessions
        .iter()
        .filter(|(_, e)| pred(&e.session))
        .min_by_key(|(_, e)| e.last_seen)
        .map(|(id, _)| *id)?;
    sessions.remove(&oldest);
    Some(oldest)
}
