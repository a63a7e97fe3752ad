//! Cancellable single-shot countdowns driven by the tokio timer wheel.
//!
//! A [`CountdownTimer`] reports exactly one terminal outcome per run. Terminal
//! transitions are committed under the run lock before any [`TimerEvent`] is
//! published, so an expiring deadline racing a `stop`/`force_stop` call resolves
//! to whichever took the lock first.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::debug;

/// Sending half of the channel that receives timer outcomes.
pub type TimerEventSender = mpsc::UnboundedSender<TimerEvent>;
/// Receiving half of the channel that receives timer outcomes.
pub type TimerEventReceiver = mpsc::UnboundedReceiver<TimerEvent>;

/// Lifecycle of a single countdown run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// `start` has never been called.
    NotStarted,
    /// The deadline is pending.
    Running,
    /// Stopped voluntarily before the deadline.
    Answered,
    /// The deadline elapsed without a stop.
    TimedOut,
    /// Terminated administratively.
    ForceStopped,
}

impl TimerState {
    /// Whether the run has reached one of its terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Answered | Self::TimedOut | Self::ForceStopped)
    }
}

/// What a timer is counting down for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Whole-quiz countdown gating every participant.
    Quiz {
        /// Identifier of the quiz the countdown belongs to.
        quiz_id: String,
    },
    /// Per-user countdown for one fetched question.
    Question {
        /// Owner of the countdown.
        username: String,
        /// Question being answered.
        question_id: u32,
    },
}

/// Terminal outcomes that are published on the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The deadline elapsed.
    TimedOut,
    /// `force_stop` ended the run.
    ForceStopped,
}

/// Event published when a run ends by timeout or force-stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    /// Label of the timer that produced the event.
    pub kind: TimerKind,
    /// How the run ended.
    pub outcome: TimerOutcome,
}

#[derive(Debug)]
struct Run {
    state: TimerState,
    generation: u64,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Run {
    fn finish(&mut self, state: TimerState) {
        self.state = state;
        self.finished_at = Some(Instant::now());
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

#[derive(Debug)]
struct Shared {
    kind: TimerKind,
    duration: Duration,
    run: Mutex<Run>,
    events: Option<TimerEventSender>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Run> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, outcome: TimerOutcome) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let event = TimerEvent {
            kind: self.kind.clone(),
            outcome,
        };
        if events.send(event).is_err() {
            debug!(kind = ?self.kind, ?outcome, "timer event dropped: no receiver");
        }
    }
}

/// Single-shot deadline that can be stopped, force-stopped, or restarted.
#[derive(Debug)]
pub struct CountdownTimer {
    shared: Arc<Shared>,
}

impl CountdownTimer {
    /// Build an idle timer whose outcomes are published on `events`.
    pub fn new(kind: TimerKind, duration: Duration, events: Option<TimerEventSender>) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind,
                duration,
                run: Mutex::new(Run {
                    state: TimerState::NotStarted,
                    generation: 0,
                    started_at: None,
                    finished_at: None,
                    cancel: None,
                    task: None,
                }),
                events,
            }),
        }
    }

    /// Label passed at construction.
    pub fn kind(&self) -> &TimerKind {
        &self.shared.kind
    }

    /// Configured duration of every run.
    pub fn duration(&self) -> Duration {
        self.shared.duration
    }

    /// Begin a new run. A previous run is quiesced first and never reports an outcome.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut run = self.shared.lock();
        if let Some(task) = run.task.take() {
            task.abort();
        }
        run.cancel.take();

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let started_at = Instant::now();
        run.generation += 1;
        run.state = TimerState::Running;
        run.started_at = Some(started_at);
        run.finished_at = None;
        run.cancel = Some(cancel_tx);

        let generation = run.generation;
        let deadline = started_at + self.shared.duration;
        let shared = Arc::clone(&self.shared);
        run.task = Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = cancel_rx => return,
            }

            {
                let mut run = shared.lock();
                if run.generation != generation || run.state != TimerState::Running {
                    return;
                }
                run.state = TimerState::TimedOut;
                run.finished_at = Some(Instant::now());
                run.cancel = None;
            }
            debug!(kind = ?shared.kind, "countdown timed out");
            shared.publish(TimerOutcome::TimedOut);
        }));
    }

    /// Voluntarily end a running countdown. Returns `false` when it was not running.
    pub fn stop(&self) -> bool {
        let mut run = self.shared.lock();
        if run.state != TimerState::Running {
            return false;
        }
        run.finish(TimerState::Answered);
        true
    }

    /// Administratively end a running countdown and publish [`TimerOutcome::ForceStopped`].
    ///
    /// A no-op returning `false` once the run is terminal, including after a timeout.
    pub fn force_stop(&self) -> bool {
        {
            let mut run = self.shared.lock();
            if run.state != TimerState::Running {
                return false;
            }
            run.finish(TimerState::ForceStopped);
        }
        self.shared.publish(TimerOutcome::ForceStopped);
        true
    }

    /// Current state of the latest run.
    pub fn state(&self) -> TimerState {
        self.shared.lock().state
    }

    /// Whether the countdown is pending.
    pub fn is_running(&self) -> bool {
        self.state() == TimerState::Running
    }

    /// Time since `start`, frozen at the terminal timestamp once the run ended.
    pub fn elapsed(&self) -> Duration {
        let run = self.shared.lock();
        match run.started_at {
            Some(started_at) => run
                .finished_at
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(started_at),
            None => Duration::ZERO,
        }
    }

    /// Time left before the deadline; zero once the run is terminal.
    pub fn remaining(&self) -> Duration {
        if self.state().is_terminal() {
            return Duration::ZERO;
        }
        self.shared.duration.saturating_sub(self.elapsed())
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        let mut run = self.shared.lock();
        run.cancel.take();
        if let Some(task) = run.task.take() {
            task.abort();
        }
    }
}
