pub mod ledger;
pub mod lifecycle;
pub mod question;
pub mod question_store;
pub mod session;
pub mod timer;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::mpsc;

use crate::config::AppConfig;

use self::{
    lifecycle::QuizCoordinator,
    question_store::QuestionStore,
    session::SessionRegistry,
    timer::{TimerEventReceiver, TimerEventSender},
};

pub type SharedState = Arc<AppState>;
/// Source of wall-clock time in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// [`Clock`] reading the system time.
pub fn system_clock() -> Clock {
    Arc::new(epoch_millis)
}

/// Central application state: configuration, question bank, sessions and quiz lifecycle.
pub struct AppState {
    config: Arc<AppConfig>,
    questions: Arc<QuestionStore>,
    sessions: SessionRegistry,
    coordinator: QuizCoordinator,
    timer_events: TimerEventSender,
    clock: Clock,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// Returns the receiving end of the timer event channel; it must be drained by
    /// [`crate::services::events::spawn_event_pumps`] for timeouts to take effect.
    pub fn new(config: AppConfig, questions: Arc<QuestionStore>) -> (SharedState, TimerEventReceiver) {
        Self::with_clock(config, questions, system_clock())
    }

    /// Same as [`AppState::new`] with an explicit wall clock.
    pub fn with_clock(
        config: AppConfig,
        questions: Arc<QuestionStore>,
        clock: Clock,
    ) -> (SharedState, TimerEventReceiver) {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Self {
            config: Arc::new(config),
            questions,
            sessions: SessionRegistry::new(),
            coordinator: QuizCoordinator::new(timer_tx.clone(), Arc::clone(&clock)),
            timer_events: timer_tx,
            clock,
        });
        (state, timer_rx)
    }

    /// Shared runtime configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    /// Question bank.
    pub fn questions(&self) -> &QuestionStore {
        &self.questions
    }

    /// Connection and user runtime registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Global quiz lifecycle.
    pub fn coordinator(&self) -> &QuizCoordinator {
        &self.coordinator
    }

    /// Current wall-clock time in epoch milliseconds.
    pub fn now_ms(&self) -> u64 {
        (self.clock)()
    }

    /// Channel that per-question countdowns publish on.
    pub fn timer_events(&self) -> TimerEventSender {
        self.timer_events.clone()
    }
}
