//! Global quiz lifecycle: phase machine, optional quiz countdown, and notice sinks.

use std::{collections::HashMap, time::Duration};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::state::{
    Clock,
    timer::{CountdownTimer, TimerEvent, TimerEventSender, TimerKind, TimerOutcome},
};

/// Identifier of the quiz every participant joins.
pub const GLOBAL_QUIZ_ID: &str = "global_quiz";

/// Sending half of a quiz notice sink.
pub type NoticeSender = mpsc::UnboundedSender<QuizNotice>;
/// Receiving half of a quiz notice sink.
pub type NoticeReceiver = mpsc::UnboundedReceiver<QuizNotice>;

/// Why a quiz reached its terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The quiz countdown elapsed.
    Timeout,
    /// Ended administratively, e.g. at shutdown.
    ForceStopped,
    /// A participant finished the quiz in single-user mode.
    Completed,
}

/// High-level phases a quiz can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizPhase {
    /// Nobody has started the quiz yet.
    NotStarted,
    /// Participants may fetch and answer questions.
    InProgress,
    /// No further gameplay is accepted.
    Ended(EndReason),
}

impl QuizPhase {
    /// Whether the phase is one of the terminal variants.
    pub fn is_ended(self) -> bool {
        matches!(self, Self::Ended(_))
    }

    /// Stable label used in logs and health reports.
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Ended(EndReason::Timeout) => "ENDED_TIMEOUT",
            Self::Ended(EndReason::ForceStopped) => "ENDED_FORCE_STOPPED",
            Self::Ended(EndReason::Completed) => "ENDED_COMPLETED",
        }
    }
}

/// Events that can be applied to a quiz phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizEvent {
    /// First participant starts the quiz.
    Start,
    /// The quiz terminates for the given reason.
    End(EndReason),
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the quiz was in when the invalid event was received.
    pub from: QuizPhase,
    /// The event that cannot be applied from this phase.
    pub event: QuizEvent,
}

/// Compute the next phase if `event` is valid from `from`.
pub fn compute_transition(from: QuizPhase, event: QuizEvent) -> Result<QuizPhase, InvalidTransition> {
    let next = match (from, event) {
        (QuizPhase::NotStarted, QuizEvent::Start) => QuizPhase::InProgress,
        (QuizPhase::InProgress, QuizEvent::End(reason)) => QuizPhase::Ended(reason),
        (from, event) => return Err(InvalidTransition { from, event }),
    };
    Ok(next)
}

/// Message tokens broadcast to the participants of a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizNotice {
    /// The quiz countdown elapsed.
    Timeout,
    /// The quiz was ended administratively.
    ForceStopped,
    /// The quiz was completed.
    Completed,
    /// Every quiz was ended at shutdown.
    AllForceStopped,
}

impl QuizNotice {
    /// Wire token of this notice.
    pub fn token(self) -> &'static str {
        match self {
            Self::Timeout => "QUIZ_TIMEOUT",
            Self::ForceStopped => "QUIZ_FORCE_STOPPED",
            Self::Completed => "QUIZ_COMPLETED",
            Self::AllForceStopped => "ALL_QUIZZES_FORCE_STOPPED",
        }
    }

    fn for_reason(reason: EndReason) -> Self {
        match reason {
            EndReason::Timeout => Self::Timeout,
            EndReason::ForceStopped => Self::ForceStopped,
            EndReason::Completed => Self::Completed,
        }
    }
}

#[derive(Debug)]
struct QuizRecord {
    phase: QuizPhase,
    timer: Option<CountdownTimer>,
    deadline_ms: Option<u64>,
}

impl Default for QuizRecord {
    fn default() -> Self {
        Self {
            phase: QuizPhase::NotStarted,
            timer: None,
            deadline_ms: None,
        }
    }
}

/// Owner of every tracked quiz's phase and countdown.
pub struct QuizCoordinator {
    quizzes: RwLock<HashMap<String, QuizRecord>>,
    sinks: DashMap<String, NoticeSender>,
    timer_events: TimerEventSender,
    clock: Clock,
}

impl QuizCoordinator {
    /// Coordinator whose quiz countdowns publish on `timer_events`.
    ///
    /// `clock` stamps quiz deadlines in epoch milliseconds.
    pub fn new(timer_events: TimerEventSender, clock: Clock) -> Self {
        Self {
            quizzes: RwLock::new(HashMap::new()),
            sinks: DashMap::new(),
            timer_events,
            clock,
        }
    }

    /// Move `quiz_id` to in-progress, starting a countdown of `duration` when given.
    pub async fn start_quiz(
        &self,
        quiz_id: &str,
        duration: Option<Duration>,
    ) -> Result<QuizPhase, InvalidTransition> {
        let mut quizzes = self.quizzes.write().await;
        let record = quizzes.entry(quiz_id.to_string()).or_default();
        let next = compute_transition(record.phase, QuizEvent::Start)?;
        record.phase = next;

        if let Some(duration) = duration {
            let timer = CountdownTimer::new(
                TimerKind::Quiz {
                    quiz_id: quiz_id.to_string(),
                },
                duration,
                Some(self.timer_events.clone()),
            );
            timer.start();
            record.deadline_ms = Some((self.clock)() + duration.as_millis() as u64);
            record.timer = Some(timer);
        }

        info!(quiz = %quiz_id, timed = duration.is_some(), "quiz started");
        Ok(next)
    }

    /// Terminate `quiz_id` with `reason`, force-stopping its countdown.
    ///
    /// Participants are notified once, through the countdown's force-stop event
    /// when one was running and directly otherwise.
    pub async fn end_quiz(
        &self,
        quiz_id: &str,
        reason: EndReason,
    ) -> Result<QuizPhase, InvalidTransition> {
        let stopped = {
            let mut quizzes = self.quizzes.write().await;
            let record = quizzes.entry(quiz_id.to_string()).or_default();
            let next = compute_transition(record.phase, QuizEvent::End(reason))?;
            record.phase = next;
            record
                .timer
                .as_ref()
                .is_some_and(CountdownTimer::force_stop)
        };

        info!(quiz = %quiz_id, ?reason, "quiz ended");
        if !stopped {
            self.notify_clients(quiz_id, QuizNotice::for_reason(reason));
        }
        Ok(QuizPhase::Ended(reason))
    }

    /// End every in-progress quiz as force-stopped and notify every sink.
    ///
    /// Returns how many quizzes were ended.
    pub async fn force_end_all_quizzes(&self) -> usize {
        let mut ended = 0;
        {
            let mut quizzes = self.quizzes.write().await;
            for (quiz_id, record) in quizzes.iter_mut() {
                if let Some(timer) = record.timer.as_ref() {
                    timer.force_stop();
                }
                if record.phase == QuizPhase::InProgress {
                    record.phase = QuizPhase::Ended(EndReason::ForceStopped);
                    ended += 1;
                    debug!(quiz = %quiz_id, "quiz force-stopped");
                }
            }
        }
        let notified = self.notify_all_clients(QuizNotice::AllForceStopped);
        info!(ended, notified, "all quizzes force-stopped");
        ended
    }

    /// Apply a quiz countdown outcome. Events for other timer kinds are ignored.
    pub async fn handle_timer_event(&self, event: &TimerEvent) {
        let TimerKind::Quiz { quiz_id } = &event.kind else {
            return;
        };

        match event.outcome {
            TimerOutcome::TimedOut => {
                let timed_out = {
                    let mut quizzes = self.quizzes.write().await;
                    match quizzes.get_mut(quiz_id) {
                        Some(record) => {
                            match compute_transition(record.phase, QuizEvent::End(EndReason::Timeout)) {
                                Ok(next) => {
                                    record.phase = next;
                                    true
                                }
                                Err(err) => {
                                    debug!(quiz = %quiz_id, error = %err, "ignoring late quiz timeout");
                                    false
                                }
                            }
                        }
                        None => false,
                    }
                };
                if timed_out {
                    info!(quiz = %quiz_id, "quiz timed out");
                    self.notify_clients(quiz_id, QuizNotice::Timeout);
                }
            }
            TimerOutcome::ForceStopped => {
                let notice = match self.quiz_state(quiz_id).await {
                    QuizPhase::Ended(reason) => QuizNotice::for_reason(reason),
                    _ => QuizNotice::ForceStopped,
                };
                self.notify_clients(quiz_id, notice);
            }
        }
    }

    /// Install the notification sink of `quiz_id`, replacing any previous one.
    ///
    /// Returns `true` when a previous sink was replaced.
    pub fn register_client(&self, quiz_id: &str, sink: NoticeSender) -> bool {
        self.sinks.insert(quiz_id.to_string(), sink).is_some()
    }

    /// Push `notice` to the sink of `quiz_id`. Returns whether it was delivered.
    pub fn notify_clients(&self, quiz_id: &str, notice: QuizNotice) -> bool {
        let Some(sink) = self.sinks.get(quiz_id) else {
            debug!(quiz = %quiz_id, notice = notice.token(), "no sink registered");
            return false;
        };
        if sink.send(notice).is_err() {
            warn!(quiz = %quiz_id, notice = notice.token(), "quiz sink closed");
            return false;
        }
        true
    }

    /// Push `notice` to every sink. Returns the number of deliveries.
    pub fn notify_all_clients(&self, notice: QuizNotice) -> usize {
        self.sinks
            .iter()
            .filter(|sink| sink.value().send(notice).is_ok())
            .count()
    }

    /// Current phase of `quiz_id`; untracked quizzes are not started.
    pub async fn quiz_state(&self, quiz_id: &str) -> QuizPhase {
        self.quizzes
            .read()
            .await
            .get(quiz_id)
            .map_or(QuizPhase::NotStarted, |record| record.phase)
    }

    /// Whether `quiz_id` is in progress.
    pub async fn is_quiz_active(&self, quiz_id: &str) -> bool {
        self.quiz_state(quiz_id).await == QuizPhase::InProgress
    }

    /// Wall-clock deadline of a timed quiz, in epoch milliseconds.
    pub async fn deadline_ms(&self, quiz_id: &str) -> Option<u64> {
        self.quizzes
            .read()
            .await
            .get(quiz_id)
            .and_then(|record| record.deadline_ms)
    }

    /// Time left on the quiz countdown, if one exists.
    pub async fn remaining(&self, quiz_id: &str) -> Option<Duration> {
        self.quizzes
            .read()
            .await
            .get(quiz_id)
            .and_then(|record| record.timer.as_ref().map(CountdownTimer::remaining))
    }
}
