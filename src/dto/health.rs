use serde::Serialize;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("ok" or "loading").
    pub status: String,
    /// Lifecycle phase of the global quiz.
    pub quiz_phase: String,
    /// Number of questions in the bank.
    pub questions: usize,
    /// Number of live logged-in connections.
    pub sessions: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(quiz_phase: &str, questions: usize, sessions: usize) -> Self {
        Self {
            status: "ok".to_string(),
            quiz_phase: quiz_phase.to_string(),
            questions,
            sessions,
        }
    }

    /// Create a health response indicating the question bank is not loaded yet.
    pub fn loading(quiz_phase: &str) -> Self {
        Self {
            status: "loading".to_string(),
            quiz_phase: quiz_phase.to_string(),
            questions: 0,
            sessions: 0,
        }
    }
}
