//! Protocol state machine: gates commands on the quiz phase and drives sessions,
//! ledgers and question timers.

use std::{collections::BTreeSet, sync::Arc};

use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::{
    config::{AppConfig, QuizMode},
    dto::ws::{
        AnswerReceipt, ClientRequest, LoginRequest, QuestionPayload, QuizOverview, QuizResult,
        ServerMessage, SubmitAnswerRequest,
    },
    error::{ErrorKind, ServiceError},
    state::{
        SharedState,
        ledger::Ledger,
        lifecycle::{EndReason, GLOBAL_QUIZ_ID, QuizPhase},
        question::{Answer, OPTION_COUNT},
        session::{ConnectionId, Outbox, UserRuntime},
        timer::{CountdownTimer, TimerKind, TimerState},
    },
};

const QUIZ_NOT_STARTED: &str = "Quiz has not started yet";
const QUIZ_ENDED: &str = "Quiz has ended";
const QUIZ_TIME_OVER: &str = "Quiz time is over";
const QUESTION_TIME_OVER: &str = "Time for this question has elapsed";
const START_FIRST: &str = "Quiz not started, send START_QUIZ first";

/// Routes decoded requests of every connection to their handlers.
#[derive(Clone)]
pub struct CommandDispatcher {
    state: SharedState,
}

impl CommandDispatcher {
    /// Dispatcher operating on `state`.
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Register the outbound channel of a new connection.
    pub fn on_connect(&self, connection: ConnectionId, outbox: Outbox) {
        self.state.sessions().attach_outbox(connection, outbox);
        info!(connection = %connection, "client connected");
    }

    /// Settle time and release the session of a closed connection.
    pub async fn on_disconnect(&self, connection: ConnectionId) {
        let sessions = self.state.sessions();
        if let Some(runtime) = sessions.runtime_by_connection(connection).await {
            self.suspend(&runtime).await;
        }
        let username = sessions.remove_session(connection).await;
        sessions.detach_outbox(connection);
        info!(connection = %connection, username = ?username, "client disconnected");
    }

    /// Handle one request and produce its response. Never fails.
    pub async fn process(&self, connection: ConnectionId, request: ClientRequest) -> ServerMessage {
        let command = request.name();
        match self.dispatch(connection, request).await {
            Ok(response) => response,
            Err(err) => {
                if err.kind() == ErrorKind::Internal {
                    error!(connection = %connection, command, error = %err, "request failed");
                } else {
                    debug!(connection = %connection, command, error = %err, "request rejected");
                }
                err.into()
            }
        }
    }

    async fn dispatch(
        &self,
        connection: ConnectionId,
        request: ClientRequest,
    ) -> Result<ServerMessage, ServiceError> {
        self.check_access(&request).await?;

        match request {
            ClientRequest::Login(login) => self.login(connection, login).await,
            ClientRequest::StartQuiz => self.start_quiz(connection).await,
            ClientRequest::ContinueQuiz => self.continue_quiz(connection).await,
            ClientRequest::EndQuiz => self.end_quiz(connection).await,
            ClientRequest::FetchQuestion { question_id } => {
                self.fetch_question(connection, question_id).await
            }
            ClientRequest::FetchUnattempted => self.fetch_unattempted(connection).await,
            ClientRequest::SubmitAnswer(submission) => {
                self.submit_answer(connection, submission).await
            }
            ClientRequest::Logout => self.logout(connection).await,
            ClientRequest::Unknown => Err(ServiceError::UnknownCommand),
        }
    }

    /// Reject commands the current quiz phase does not allow.
    async fn check_access(&self, request: &ClientRequest) -> Result<(), ServiceError> {
        if matches!(request, ClientRequest::Unknown) {
            return Err(ServiceError::UnknownCommand);
        }

        let phase = self.state.coordinator().quiz_state(GLOBAL_QUIZ_ID).await;
        let allowed = match phase {
            QuizPhase::InProgress => true,
            QuizPhase::NotStarted => matches!(
                request,
                ClientRequest::Login(_) | ClientRequest::StartQuiz | ClientRequest::Logout
            ),
            QuizPhase::Ended(_) => matches!(
                request,
                ClientRequest::Login(_) | ClientRequest::EndQuiz | ClientRequest::Logout
            ),
        };

        if allowed {
            return Ok(());
        }
        let message = if phase.is_ended() {
            QUIZ_ENDED
        } else {
            QUIZ_NOT_STARTED
        };
        Err(ServiceError::InvalidState(message.into()))
    }

    async fn login(
        &self,
        connection: ConnectionId,
        request: LoginRequest,
    ) -> Result<ServerMessage, ServiceError> {
        if let Err(err) = request.validate() {
            debug!(connection = %connection, error = %err, "login validation failed");
            return Err(ServiceError::LoginFailed("Invalid username".into()));
        }
        if request.password != self.state.config().access_code {
            warn!(connection = %connection, username = %request.username, "wrong access code");
            return Err(ServiceError::LoginFailed("Invalid access code".into()));
        }

        let reconnected = self
            .state
            .sessions()
            .add_session(connection, &request.username)
            .await?;
        info!(
            connection = %connection,
            username = %request.username,
            reconnected,
            "user logged in"
        );

        Ok(ServerMessage::LoginOk {
            welcome: request.username,
            note: reconnected.then(|| "Reconnected".to_string()),
        })
    }

    async fn start_quiz(&self, connection: ConnectionId) -> Result<ServerMessage, ServiceError> {
        let username = self.state.sessions().validate_session(connection).await?;
        if self.state.sessions().runtime(&username).await.is_some() {
            return Err(ServiceError::InvalidState(
                "Quiz already started, send CONTINUE_QUIZ to resume".into(),
            ));
        }

        let config = self.state.config();
        let quiz_duration = (config.quiz_mode == QuizMode::StrictTimeBound)
            .then_some(config.time_allowed);
        let coordinator = self.state.coordinator();
        match coordinator.start_quiz(GLOBAL_QUIZ_ID, quiz_duration).await {
            Ok(_) => {}
            // Another participant started it first.
            Err(err) if err.from == QuizPhase::InProgress => {}
            Err(err) => return Err(err.into()),
        }

        let now = self.state.now_ms();
        let total_ms = config.total_time(self.state.questions().len()).as_millis() as u64;
        let ledger = match config.quiz_mode {
            QuizMode::StrictTimeBound => {
                let deadline = coordinator
                    .deadline_ms(GLOBAL_QUIZ_ID)
                    .await
                    .ok_or_else(|| ServiceError::Internal("strict quiz has no deadline".into()))?;
                let mut ledger = Ledger::new(config.scoring, total_ms, deadline.saturating_sub(total_ms))
                    .with_end_time(deadline);
                ledger.sync_wall_clock(now);
                ledger
            }
            QuizMode::Bullet | QuizMode::TimeBound => Ledger::new(config.scoring, total_ms, now),
        };

        let runtime = self
            .state
            .sessions()
            .create_user_runtime(&username, ledger)
            .await?;
        let mut ledger = runtime.ledger().lock().await;
        if config.quiz_mode == QuizMode::TimeBound {
            ledger.touch(now);
        }
        info!(username = %username, mode = ?config.quiz_mode, total_ms, "quiz started for user");

        Ok(ServerMessage::QuizStarted(self.overview(&config, &ledger)))
    }

    async fn continue_quiz(&self, connection: ConnectionId) -> Result<ServerMessage, ServiceError> {
        let runtime = self.runtime(connection).await?;
        let config = self.state.config();
        let total_questions = self.total_questions();
        let now = self.state.now_ms();
        let mut ledger = runtime.ledger().lock().await;

        let question_ids = ledger.unattempted_ids(total_questions);
        if question_ids.is_empty() {
            return Ok(ServerMessage::QuizEnded);
        }

        match config.quiz_mode {
            QuizMode::Bullet => {}
            QuizMode::TimeBound => {
                ledger.settle_activity(now);
                let remaining = ledger
                    .rebase_budget(now)
                    .map_err(|_| ServiceError::TimeExhausted("No time left to continue the quiz".into()))?;
                ledger.touch(now);
                debug!(username = %runtime.username(), remaining, "budget rebased on reconnect");
            }
            QuizMode::StrictTimeBound => {
                ledger.sync_wall_clock(now);
                if ledger.is_past_end(now) {
                    return Err(ServiceError::TimeExhausted(QUIZ_TIME_OVER.into()));
                }
            }
        }
        info!(username = %runtime.username(), "quiz resumed");

        Ok(ServerMessage::QuizRestarted {
            overview: self.overview(&config, &ledger),
            updated_elapsed_time: ledger.elapsed_ms(),
            question_ids,
        })
    }

    async fn end_quiz(&self, connection: ConnectionId) -> Result<ServerMessage, ServiceError> {
        let runtime = self.runtime(connection).await?;
        let config = self.state.config();
        let now = self.state.now_ms();

        let result = {
            let mut ledger = runtime.ledger().lock().await;
            stop_question_timer(&runtime).await;
            settle(&config, &mut ledger, now);
            let breakdown = ledger.breakdown(self.total_questions());
            QuizResult {
                score: ledger.score(),
                total_time: ledger.total_ms(),
                elapsed_time: ledger.elapsed_ms(),
                correct: breakdown.correct,
                incorrect: breakdown.incorrect,
                partially_correct: breakdown.partially_correct,
                unattempted: breakdown.unattempted,
            }
        };

        if config.single_user {
            if let Err(err) = self
                .state
                .coordinator()
                .end_quiz(GLOBAL_QUIZ_ID, EndReason::Completed)
                .await
            {
                debug!(error = %err, "quiz already ended");
            }
        }
        info!(username = %runtime.username(), score = result.score, "quiz ended for user");

        Ok(ServerMessage::QuizResult(result))
    }

    async fn fetch_question(
        &self,
        connection: ConnectionId,
        question_id: u32,
    ) -> Result<ServerMessage, ServiceError> {
        let runtime = self.runtime(connection).await?;
        let question = self
            .state
            .questions()
            .get(question_id)
            .ok_or_else(|| ServiceError::InvalidInput("Invalid question id".into()))?;
        let config = self.state.config();
        let now = self.state.now_ms();
        let mut ledger = runtime.ledger().lock().await;

        ensure_time_left(&config, &mut ledger, now)?;

        let question_timer = match config.quiz_mode {
            QuizMode::Bullet => {
                let mut slot = runtime.question_timer().lock().await;
                let timed_out = slot
                    .as_ref()
                    .filter(|previous| previous.state() == TimerState::TimedOut)
                    .map(CountdownTimer::kind);
                if let Some(TimerKind::Question { question_id: id, .. }) = timed_out {
                    ledger.mark_expired(*id);
                }
                let timer = CountdownTimer::new(
                    TimerKind::Question {
                        username: runtime.username().to_string(),
                        question_id,
                    },
                    config.time_allowed,
                    Some(self.state.timer_events()),
                );
                timer.start();
                *slot = Some(timer);
                config.time_allowed.as_millis() as u64
            }
            QuizMode::TimeBound => ledger.remaining_ms(),
            QuizMode::StrictTimeBound => ledger
                .end_ms()
                .map_or(0, |end| end.saturating_sub(now)),
        };
        ledger.touch(now);

        Ok(ServerMessage::Question(QuestionPayload {
            id: question.id,
            text: question.text,
            options: question.options,
            total_time: ledger.total_ms(),
            updated_elapsed_time: ledger.elapsed_ms(),
            question_timer,
        }))
    }

    async fn fetch_unattempted(&self, connection: ConnectionId) -> Result<ServerMessage, ServiceError> {
        let runtime = self.runtime(connection).await?;
        let config = self.state.config();
        let now = self.state.now_ms();
        let mut ledger = runtime.ledger().lock().await;

        ensure_time_left(&config, &mut ledger, now)?;

        let question_ids = ledger.unattempted_ids(self.total_questions());
        if question_ids.is_empty() {
            return Ok(ServerMessage::QuizEnded);
        }
        Ok(ServerMessage::UnattemptedQuestions { question_ids })
    }

    async fn submit_answer(
        &self,
        connection: ConnectionId,
        submission: SubmitAnswerRequest,
    ) -> Result<ServerMessage, ServiceError> {
        let runtime = self.runtime(connection).await?;
        let config = self.state.config();
        let question_id = submission.question_id;
        if self.state.questions().get(question_id).is_none() {
            return Err(ServiceError::InvalidInput("Invalid question id".into()));
        }
        let answer = build_answer(&config, question_id, &submission.selected_options)?;

        let now = self.state.now_ms();
        let mut ledger = runtime.ledger().lock().await;
        ensure_time_left(&config, &mut ledger, now)?;

        if config.quiz_mode == QuizMode::Bullet {
            let timer = runtime.question_timer().lock().await;
            if let Some(timer) = timer.as_ref().filter(|timer| {
                matches!(timer.kind(), TimerKind::Question { question_id: id, .. } if *id == question_id)
            }) {
                if timer.state() == TimerState::TimedOut {
                    ledger.mark_expired(question_id);
                }
                timer.stop();
            }
            if ledger.is_expired(question_id) {
                return Err(ServiceError::TimeExhausted(QUESTION_TIME_OVER.into()));
            }
        }

        let status = ledger.add_answer(answer, self.state.questions())?;
        match config.quiz_mode {
            QuizMode::Bullet => ledger.add_to_elapsed(submission.time_to_attempt_in_ms),
            QuizMode::TimeBound => {
                ledger.add_to_elapsed(submission.time_to_attempt_in_ms);
                ledger.touch(now);
            }
            QuizMode::StrictTimeBound => ledger.sync_wall_clock(now),
        }

        let correct_options = if config.kbc_mode {
            Some(self.state.questions().correct_options(question_id)?.indices())
        } else {
            None
        };
        debug!(
            username = %runtime.username(),
            question_id,
            ?status,
            score = ledger.score(),
            "answer recorded"
        );

        Ok(ServerMessage::AnswerSubmitted(AnswerReceipt {
            question_id,
            status: status.ordinal(),
            score: ledger.score(),
            total_time: ledger.total_ms(),
            updated_elapsed_time: ledger.elapsed_ms(),
            correct_options,
        }))
    }

    async fn logout(&self, connection: ConnectionId) -> Result<ServerMessage, ServiceError> {
        let sessions = self.state.sessions();
        let username = sessions.validate_session(connection).await?;
        if let Some(runtime) = sessions.runtime(&username).await {
            self.suspend(&runtime).await;
        }
        sessions.remove_session(connection).await;
        info!(connection = %connection, username = %username, "user logged out");

        Ok(ServerMessage::LogoutOk { bye: username })
    }

    /// Settle time and silence the question timer of a user going offline.
    async fn suspend(&self, runtime: &UserRuntime) {
        let config = self.state.config();
        let now = self.state.now_ms();
        let mut ledger = runtime.ledger().lock().await;
        stop_question_timer(runtime).await;
        settle(&config, &mut ledger, now);
    }

    async fn runtime(&self, connection: ConnectionId) -> Result<Arc<UserRuntime>, ServiceError> {
        let sessions = self.state.sessions();
        let username = sessions.validate_session(connection).await?;
        sessions
            .runtime(&username)
            .await
            .ok_or_else(|| ServiceError::InvalidState(START_FIRST.into()))
    }

    fn total_questions(&self) -> u32 {
        self.state.questions().len() as u32
    }

    fn overview(&self, config: &AppConfig, ledger: &Ledger) -> QuizOverview {
        QuizOverview {
            total_questions: self.total_questions(),
            quiz_mode: config.quiz_mode.ordinal(),
            is_multioption_allowed: config.multi_option_select,
            is_kbc_mode: config.kbc_mode,
            total_time: ledger.total_ms(),
            end_time: ledger
                .end_ms()
                .unwrap_or_else(|| ledger.start_ms() + ledger.total_ms()),
        }
    }
}

/// Fail when the quiz-level budget of `ledger` is used up.
fn ensure_time_left(config: &AppConfig, ledger: &mut Ledger, now: u64) -> Result<(), ServiceError> {
    let exhausted = match config.quiz_mode {
        QuizMode::Bullet => false,
        QuizMode::TimeBound => ledger.is_budget_spent(),
        QuizMode::StrictTimeBound => {
            ledger.sync_wall_clock(now);
            ledger.is_past_end(now)
        }
    };
    if exhausted {
        return Err(ServiceError::TimeExhausted(QUIZ_TIME_OVER.into()));
    }
    Ok(())
}

/// Charge time spent since the last activity, at most once per activity.
fn settle(config: &AppConfig, ledger: &mut Ledger, now: u64) {
    match config.quiz_mode {
        QuizMode::Bullet => {}
        QuizMode::TimeBound => {
            ledger.settle_activity(now);
        }
        QuizMode::StrictTimeBound => ledger.sync_wall_clock(now),
    }
}

/// Force-stop the running question countdown, if any. Only timeouts reach the user.
async fn stop_question_timer(runtime: &UserRuntime) {
    if let Some(timer) = runtime.question_timer().lock().await.as_ref() {
        timer.force_stop();
    }
}

fn build_answer(
    config: &AppConfig,
    question_id: u32,
    selected: &[usize],
) -> Result<Answer, ServiceError> {
    if let Some(index) = selected.iter().find(|&&index| index >= OPTION_COUNT) {
        return Err(ServiceError::InvalidInput(format!("Invalid option index {index}")));
    }
    let distinct: BTreeSet<usize> = selected.iter().copied().collect();
    if !config.multi_option_select && distinct.len() > 1 {
        return Err(ServiceError::InvalidInput("Only one option may be selected".into()));
    }
    Ok(Answer::from_indices(question_id, selected)?)
}
