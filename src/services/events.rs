//! Background pumps turning timer events and quiz notices into client notifications.

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    dto::ws::ServerMessage,
    state::{
        SharedState,
        lifecycle::{GLOBAL_QUIZ_ID, NoticeReceiver},
        timer::{TimerEvent, TimerEventReceiver, TimerKind, TimerOutcome},
    },
};

/// Notification token sent when a question countdown elapses.
pub const QUESTION_TIMEOUT: &str = "QUESTION_TIMEOUT";

/// Install the global quiz sink and spawn the timer and notice pumps.
pub fn spawn_event_pumps(
    state: SharedState,
    timer_events: TimerEventReceiver,
) -> [JoinHandle<()>; 2] {
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();
    state.coordinator().register_client(GLOBAL_QUIZ_ID, notice_tx);

    [
        tokio::spawn(run_timer_pump(state.clone(), timer_events)),
        tokio::spawn(run_notice_pump(state, notice_rx)),
    ]
}

async fn run_timer_pump(state: SharedState, mut timer_events: TimerEventReceiver) {
    while let Some(event) = timer_events.recv().await {
        route_timer_event(&state, event).await;
    }
    debug!("timer event channel closed");
}

/// Deliver one timer outcome to whoever owns it.
pub async fn route_timer_event(state: &SharedState, event: TimerEvent) {
    match (&event.kind, event.outcome) {
        (TimerKind::Quiz { .. }, _) => state.coordinator().handle_timer_event(&event).await,
        (
            TimerKind::Question {
                username,
                question_id,
            },
            TimerOutcome::TimedOut,
        ) => {
            info!(username = %username, question_id, "question timed out");
            state
                .sessions()
                .notify_user(
                    username,
                    ServerMessage::notification(QUESTION_TIMEOUT, Some(*question_id)),
                )
                .await;
        }
        (TimerKind::Question { .. }, TimerOutcome::ForceStopped) => {}
    }
}

async fn run_notice_pump(state: SharedState, mut notices: NoticeReceiver) {
    while let Some(notice) = notices.recv().await {
        let message = ServerMessage::notification(notice.token(), None);
        let delivered = state.sessions().notify_all_users(&message).await;
        info!(notice = notice.token(), delivered, "quiz notice broadcast");
    }
    debug!("quiz notice channel closed");
}
