use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::dto::validation::validate_username;

#[derive(Debug, Clone, PartialEq, Deserialize)]
/// Requests accepted from quiz WebSocket clients.
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientRequest {
    Login(LoginRequest),
    StartQuiz,
    ContinueQuiz,
    EndQuiz,
    FetchQuestion {
        #[serde(default)]
        question_id: u32,
    },
    FetchUnattempted,
    SubmitAnswer(SubmitAnswerRequest),
    Logout,
    #[serde(other)]
    Unknown,
}

impl ClientRequest {
    /// Decode a text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Wire name of the command, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login(_) => "LOGIN",
            Self::StartQuiz => "START_QUIZ",
            Self::ContinueQuiz => "CONTINUE_QUIZ",
            Self::EndQuiz => "END_QUIZ",
            Self::FetchQuestion { .. } => "FETCH_QUESTION",
            Self::FetchUnattempted => "FETCH_UNATTEMPTED",
            Self::SubmitAnswer(_) => "SUBMIT_ANSWER",
            Self::Logout => "LOGOUT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Credentials sent with `LOGIN`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_username(&self.username) {
            errors.add("username", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Answer sent with `SUBMIT_ANSWER`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmitAnswerRequest {
    #[serde(default)]
    pub question_id: u32,
    /// Zero-based option indices.
    #[serde(default)]
    pub selected_options: Vec<usize>,
    /// Client-measured time spent on the question.
    #[serde(default)]
    pub time_to_attempt_in_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Responses and notifications pushed to quiz WebSocket clients.
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    LoginOk {
        welcome: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    LoginFail {
        reason: String,
    },
    QuizStarted(QuizOverview),
    QuizRestarted {
        #[serde(flatten)]
        overview: QuizOverview,
        updated_elapsed_time: u64,
        question_ids: Vec<u32>,
    },
    Question(QuestionPayload),
    UnattemptedQuestions {
        question_ids: Vec<u32>,
    },
    AnswerSubmitted(AnswerReceipt),
    QuizResult(QuizResult),
    QuizEnded,
    LogoutOk {
        bye: String,
    },
    Error {
        message: String,
    },
    Notification {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        question_id: Option<u32>,
    },
}

impl ServerMessage {
    /// `ERROR` response carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Unsolicited `NOTIFICATION` carrying a notice token.
    pub fn notification(message: impl Into<String>, question_id: Option<u32>) -> Self {
        Self::Notification {
            message: message.into(),
            question_id,
        }
    }
}

/// Quiz parameters sent when a participant starts or resumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizOverview {
    pub total_questions: u32,
    pub quiz_mode: u8,
    pub is_multioption_allowed: bool,
    pub is_kbc_mode: bool,
    /// Milliseconds.
    pub total_time: u64,
    /// Epoch milliseconds.
    pub end_time: u64,
}

/// One question as shown to a participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionPayload {
    pub id: u32,
    pub text: String,
    pub options: Vec<String>,
    pub total_time: u64,
    pub updated_elapsed_time: u64,
    /// Milliseconds the client should count down for this question.
    pub question_timer: u64,
}

/// Outcome of a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerReceipt {
    pub question_id: u32,
    /// Attempt status ordinal.
    pub status: u8,
    pub score: f64,
    pub total_time: u64,
    pub updated_elapsed_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_options: Option<Vec<usize>>,
}

/// Final score and per-status counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizResult {
    pub score: f64,
    pub total_time: u64,
    pub elapsed_time: u64,
    pub correct: usize,
    pub incorrect: usize,
    pub partially_correct: usize,
    pub unattempted: usize,
}
