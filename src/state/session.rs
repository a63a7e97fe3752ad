//! Connection ↔ username registry and the per-user runtimes that outlive connections.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dto::ws::ServerMessage,
    state::{ledger::Ledger, timer::CountdownTimer},
};

/// Identity of one live transport connection.
pub type ConnectionId = Uuid;
/// Outbound channel of one connection.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Errors raised by the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Another connection already holds this username.
    #[error("User `{0}` is already logged in")]
    AlreadyLoggedIn(String),
    /// The connection is already mapped to a username.
    #[error("Connection already logged in")]
    ConnectionAlreadyLoggedIn,
    /// The connection has no username mapping.
    #[error("Please login first")]
    NotLoggedIn,
    /// The username already has a quiz attempt.
    #[error("Quiz already started for `{0}`")]
    RuntimeExists(String),
}

/// Quiz attempt of one username; survives disconnects.
#[derive(Debug)]
pub struct UserRuntime {
    username: String,
    ledger: Mutex<Ledger>,
    question_timer: Mutex<Option<CountdownTimer>>,
}

impl UserRuntime {
    fn new(username: String, ledger: Ledger) -> Self {
        Self {
            username,
            ledger: Mutex::new(ledger),
            question_timer: Mutex::new(None),
        }
    }

    /// Owner of the attempt.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Scoring ledger of the attempt.
    pub fn ledger(&self) -> &Mutex<Ledger> {
        &self.ledger
    }

    /// Countdown of the question currently on screen, bullet mode only.
    pub fn question_timer(&self) -> &Mutex<Option<CountdownTimer>> {
        &self.question_timer
    }
}

#[derive(Debug, Default)]
struct Sessions {
    by_connection: HashMap<ConnectionId, String>,
    by_username: HashMap<String, ConnectionId>,
    runtimes: HashMap<String, Arc<UserRuntime>>,
}

/// Enforces one live connection per username and resolves identities both ways.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<Sessions>,
    outboxes: DashMap<ConnectionId, Outbox>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `connection` to `username`.
    ///
    /// Returns `true` when the username already owns a runtime, i.e. this is a reconnection.
    pub async fn add_session(
        &self,
        connection: ConnectionId,
        username: &str,
    ) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.by_username.contains_key(username) {
            return Err(SessionError::AlreadyLoggedIn(username.to_string()));
        }
        if sessions.by_connection.contains_key(&connection) {
            return Err(SessionError::ConnectionAlreadyLoggedIn);
        }
        sessions
            .by_connection
            .insert(connection, username.to_string());
        sessions.by_username.insert(username.to_string(), connection);
        Ok(sessions.runtimes.contains_key(username))
    }

    /// Allocate the single quiz attempt of `username`.
    pub async fn create_user_runtime(
        &self,
        username: &str,
        ledger: Ledger,
    ) -> Result<Arc<UserRuntime>, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.runtimes.contains_key(username) {
            return Err(SessionError::RuntimeExists(username.to_string()));
        }
        let runtime = Arc::new(UserRuntime::new(username.to_string(), ledger));
        sessions
            .runtimes
            .insert(username.to_string(), Arc::clone(&runtime));
        Ok(runtime)
    }

    /// Clear the mapping of `connection`, keeping the username's runtime.
    ///
    /// Returns the username that was mapped.
    pub async fn remove_session(&self, connection: ConnectionId) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        let username = sessions.by_connection.remove(&connection)?;
        if sessions.by_username.get(&username) == Some(&connection) {
            sessions.by_username.remove(&username);
        }
        Some(username)
    }

    /// Username mapped to `connection`, or [`SessionError::NotLoggedIn`].
    pub async fn validate_session(&self, connection: ConnectionId) -> Result<String, SessionError> {
        self.username(connection)
            .await
            .ok_or(SessionError::NotLoggedIn)
    }

    /// Username mapped to `connection`.
    pub async fn username(&self, connection: ConnectionId) -> Option<String> {
        self.sessions
            .read()
            .await
            .by_connection
            .get(&connection)
            .cloned()
    }

    /// Runtime of `username`.
    pub async fn runtime(&self, username: &str) -> Option<Arc<UserRuntime>> {
        self.sessions.read().await.runtimes.get(username).cloned()
    }

    /// Runtime of the username mapped to `connection`.
    pub async fn runtime_by_connection(&self, connection: ConnectionId) -> Option<Arc<UserRuntime>> {
        let sessions = self.sessions.read().await;
        let username = sessions.by_connection.get(&connection)?;
        sessions.runtimes.get(username).cloned()
    }

    /// Whether `username` is mapped to a live connection.
    pub async fn is_logged_in(&self, username: &str) -> bool {
        self.sessions.read().await.by_username.contains_key(username)
    }

    /// Number of live mappings.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.by_connection.len()
    }

    /// Number of quiz attempts, live or not.
    pub async fn runtime_count(&self) -> usize {
        self.sessions.read().await.runtimes.len()
    }

    /// Force-stop every running question countdown. Returns how many were running.
    pub async fn stop_question_timers(&self) -> usize {
        let runtimes: Vec<Arc<UserRuntime>> =
            self.sessions.read().await.runtimes.values().cloned().collect();
        let mut stopped = 0;
        for runtime in runtimes {
            let timer = runtime.question_timer.lock().await;
            if timer.as_ref().is_some_and(CountdownTimer::force_stop) {
                stopped += 1;
            }
        }
        stopped
    }

    /// Register the outbound channel of a freshly opened connection.
    pub fn attach_outbox(&self, connection: ConnectionId, outbox: Outbox) {
        self.outboxes.insert(connection, outbox);
    }

    /// Forget the outbound channel of a closed connection.
    pub fn detach_outbox(&self, connection: ConnectionId) {
        self.outboxes.remove(&connection);
    }

    /// Push `message` to the live connection of `username`.
    pub async fn notify_user(&self, username: &str, message: ServerMessage) -> bool {
        let connection = {
            let sessions = self.sessions.read().await;
            sessions.by_username.get(username).copied()
        };
        let Some(connection) = connection else {
            debug!(username = %username, "notification dropped: user offline");
            return false;
        };
        self.push(connection, message)
    }

    /// Push `message` to every logged-in connection. Returns the number of deliveries.
    pub async fn notify_all_users(&self, message: &ServerMessage) -> usize {
        let connections: Vec<ConnectionId> = {
            let sessions = self.sessions.read().await;
            sessions.by_connection.keys().copied().collect()
        };
        connections
            .into_iter()
            .filter(|connection| self.push(*connection, message.clone()))
            .count()
    }

    fn push(&self, connection: ConnectionId, message: ServerMessage) -> bool {
        let Some(outbox) = self.outboxes.get(&connection).map(|entry| entry.value().clone()) else {
            return false;
        };
        if outbox.send(message).is_err() {
            warn!(connection = %connection, "send failed (writer closed), removing outbox");
            self.outboxes.remove(&connection);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;

    fn ledger() -> Ledger {
        Ledger::new(ScoringConfig::default(), 10_000, 0)
    }

    #[tokio::test]
    async fn one_connection_per_username() {
        let registry = SessionRegistry::new();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(registry.add_session(first, "alice").await, Ok(false));
        assert_eq!(
            registry.add_session(second, "alice").await,
            Err(SessionError::AlreadyLoggedIn("alice".into()))
        );
        assert_eq!(
            registry.add_session(first, "bob").await,
            Err(SessionError::ConnectionAlreadyLoggedIn)
        );
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_logins_admit_exactly_one() {
        let registry = Arc::new(SessionRegistry::new());
        let attempts = (0..8).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.add_session(Uuid::new_v4(), "carol").await })
        });
        let results = futures::future::join_all(attempts).await;
        let admitted = results
            .into_iter()
            .filter(|result| matches!(result, Ok(Ok(_))))
            .count();
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn runtime_survives_session_removal() {
        let registry = SessionRegistry::new();
        let connection = Uuid::new_v4();
        registry.add_session(connection, "alice").await.unwrap();
        registry.create_user_runtime("alice", ledger()).await.unwrap();
        assert_eq!(
            registry
                .create_user_runtime("alice", ledger())
                .await
                .unwrap_err(),
            SessionError::RuntimeExists("alice".into())
        );
        assert!(registry.runtime_by_connection(connection).await.is_some());

        assert_eq!(
            registry.remove_session(connection).await.as_deref(),
            Some("alice")
        );
        assert_eq!(
            registry.validate_session(connection).await,
            Err(SessionError::NotLoggedIn)
        );
        assert!(registry.runtime_by_connection(connection).await.is_none());
        assert!(registry.runtime("alice").await.is_some());

        let reconnect = Uuid::new_v4();
        assert_eq!(registry.add_session(reconnect, "alice").await, Ok(true));
        assert_eq!(
            registry.validate_session(reconnect).await.as_deref(),
            Ok("alice")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_running_question_timers() {
        use crate::state::timer::{TimerKind, TimerState};
        use std::time::Duration;

        let registry = SessionRegistry::new();
        let runtime = registry.create_user_runtime("alice", ledger()).await.unwrap();
        registry.create_user_runtime("bob", ledger()).await.unwrap();
        let timer = CountdownTimer::new(
            TimerKind::Question {
                username: "alice".into(),
                question_id: 1,
            },
            Duration::from_secs(10),
            None,
        );
        timer.start();
        *runtime.question_timer().lock().await = Some(timer);

        assert_eq!(registry.stop_question_timers().await, 1);
        let state = runtime
            .question_timer()
            .lock()
            .await
            .as_ref()
            .map(CountdownTimer::state);
        assert_eq!(state, Some(TimerState::ForceStopped));
        assert_eq!(registry.stop_question_timers().await, 0);
    }

    #[tokio::test]
    async fn notifications_reach_live_connections_only() {
        let registry = SessionRegistry::new();
        let (alice, bob, guest) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, bob_rx) = mpsc::unbounded_channel();
        let (guest_tx, mut guest_rx) = mpsc::unbounded_channel();
        registry.attach_outbox(alice, alice_tx);
        registry.attach_outbox(bob, bob_tx);
        registry.attach_outbox(guest, guest_tx);
        registry.add_session(alice, "alice").await.unwrap();
        registry.add_session(bob, "bob").await.unwrap();
        drop(bob_rx);

        let notice = ServerMessage::notification("QUIZ_TIMEOUT", None);
        assert_eq!(registry.notify_all_users(&notice).await, 1);
        assert_eq!(alice_rx.recv().await.unwrap(), notice);
        assert!(guest_rx.try_recv().is_err());

        assert!(!registry.notify_user("bob", notice.clone()).await);
        assert!(!registry.notify_user("nobody", notice).await);
    }
}
