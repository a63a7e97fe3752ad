//! Application-level configuration loading: quiz mode, scoring weights, time budgets.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MULTIQUIZ_CONFIG_PATH";
/// Default question bank location.
const DEFAULT_QUESTIONS_PATH: &str = "config/questions.json";
const DEFAULT_TIME_ALLOWED_MS: u64 = 15_000;
const DEFAULT_ACCESS_CODE: &str = "1234";

/// How time is budgeted for a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizMode {
    /// Each question has its own short budget, reported by the client.
    #[default]
    Bullet,
    /// One budget for the whole quiz; disconnected time is forgiven on reconnect.
    TimeBound,
    /// One budget with a fixed wall-clock end shared by every participant.
    StrictTimeBound,
}

impl QuizMode {
    /// Wire ordinal of this mode.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Bullet => 0,
            Self::TimeBound => 1,
            Self::StrictTimeBound => 2,
        }
    }
}

/// Contribution of each attempt status to a running score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringConfig {
    /// Added for a correct answer.
    pub correct_reward: f64,
    /// Added for an incorrect answer; zero unless negative marking is enabled.
    pub incorrect_penalty: f64,
    /// Added for a partially correct answer.
    pub partial_reward: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            correct_reward: 1.0,
            incorrect_penalty: 0.0,
            partial_reward: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Time budgeting mode.
    pub quiz_mode: QuizMode,
    /// When set, ending the quiz for one user completes it for everyone.
    pub single_user: bool,
    /// Whether more than one option may be selected per answer.
    pub multi_option_select: bool,
    /// Reveal correct options right after each submission.
    pub kbc_mode: bool,
    /// Score contributions.
    pub scoring: ScoringConfig,
    /// Per-question budget in bullet mode, whole-quiz budget otherwise.
    pub time_allowed: Duration,
    /// Shared password checked at login.
    pub access_code: String,
    /// Question bank file.
    pub questions_path: PathBuf,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        mode = ?config.quiz_mode,
                        time_allowed_ms = config.time_allowed.as_millis() as u64,
                        "loaded quiz configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Whether the whole quiz shares one budget.
    pub fn is_time_bound(&self) -> bool {
        self.quiz_mode != QuizMode::Bullet
    }

    /// Whole-quiz budget for a bank of `question_count` questions.
    pub fn total_time(&self, question_count: usize) -> Duration {
        match self.quiz_mode {
            QuizMode::Bullet => self.time_allowed * question_count as u32,
            QuizMode::TimeBound | QuizMode::StrictTimeBound => self.time_allowed,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            quiz_mode: QuizMode::default(),
            single_user: false,
            multi_option_select: false,
            kbc_mode: false,
            scoring: ScoringConfig::default(),
            time_allowed: Duration::from_millis(DEFAULT_TIME_ALLOWED_MS),
            access_code: DEFAULT_ACCESS_CODE.into(),
            questions_path: PathBuf::from(DEFAULT_QUESTIONS_PATH),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    quiz_mode: QuizMode,
    single_user: bool,
    multi_option_select: bool,
    kbc_mode: bool,
    correct_reward: Option<f64>,
    partial_reward: Option<f64>,
    incorrect_penalty: Option<f64>,
    time_allowed_ms: Option<u64>,
    access_code: Option<String>,
    questions_path: Option<PathBuf>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = ScoringConfig::default();
        // KBC reveal is restricted to bullet mode.
        let kbc_mode = if value.kbc_mode && value.quiz_mode != QuizMode::Bullet {
            warn!(mode = ?value.quiz_mode, "kbc mode is only available in bullet mode; disabling");
            false
        } else {
            value.kbc_mode
        };

        Self {
            quiz_mode: value.quiz_mode,
            single_user: value.single_user,
            multi_option_select: value.multi_option_select,
            kbc_mode,
            scoring: ScoringConfig {
                correct_reward: value.correct_reward.unwrap_or(defaults.correct_reward),
                incorrect_penalty: value.incorrect_penalty.unwrap_or(0.0),
                partial_reward: value.partial_reward.unwrap_or(defaults.partial_reward),
            },
            time_allowed: Duration::from_millis(
                value.time_allowed_ms.unwrap_or(DEFAULT_TIME_ALLOWED_MS),
            ),
            access_code: value
                .access_code
                .unwrap_or_else(|| DEFAULT_ACCESS_CODE.into()),
            questions_path: value
                .questions_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_QUESTIONS_PATH)),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.quiz_mode, QuizMode::Bullet);
        assert_eq!(config.scoring, ScoringConfig::default());
        assert_eq!(config.time_allowed, Duration::from_millis(15_000));
        assert_eq!(config.access_code, "1234");
    }

    #[test]
    fn penalty_enables_negative_marking() {
        let config = AppConfig::from_json(
            r#"{ "quiz_mode": "time_bound", "incorrect_penalty": -0.25, "time_allowed_ms": 600000 }"#,
        )
        .unwrap();
        assert_eq!(config.quiz_mode, QuizMode::TimeBound);
        assert_eq!(config.scoring.incorrect_penalty, -0.25);
        assert_eq!(config.total_time(10), Duration::from_secs(600));
    }

    #[test]
    fn kbc_mode_is_dropped_outside_bullet_mode() {
        let config =
            AppConfig::from_json(r#"{ "quiz_mode": "strict_time_bound", "kbc_mode": true }"#)
                .unwrap();
        assert!(!config.kbc_mode);

        let config = AppConfig::from_json(r#"{ "kbc_mode": true }"#).unwrap();
        assert!(config.kbc_mode);
    }

    #[test]
    fn bullet_total_time_scales_with_question_count() {
        let config = AppConfig::default();
        assert_eq!(config.total_time(4), Duration::from_secs(60));
    }
}
