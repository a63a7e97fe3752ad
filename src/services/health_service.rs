use tracing::warn;

use crate::{
    dto::health::HealthResponse,
    state::{SharedState, lifecycle::GLOBAL_QUIZ_ID},
};

/// Report quiz phase, bank size and live sessions.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let phase = state.coordinator().quiz_state(GLOBAL_QUIZ_ID).await;

    if !state.questions().is_initialized() {
        warn!("question bank not initialized");
        return HealthResponse::loading(phase.label());
    }

    HealthResponse::ok(
        phase.label(),
        state.questions().len(),
        state.sessions().session_count().await,
    )
}
