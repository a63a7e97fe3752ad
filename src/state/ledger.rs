//! Per-user attempt record, running score, and time accounting.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    config::ScoringConfig,
    state::{
        question::{Answer, AttemptStatus, CorrectOptions, QuestionError},
        question_store::QuestionStore,
    },
};

/// Returned when a reconnect finds no budget left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetExhausted;

/// Number of questions per status, over the whole bank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusBreakdown {
    /// Questions answered correctly.
    pub correct: usize,
    /// Questions answered incorrectly.
    pub incorrect: usize,
    /// Questions answered partially correctly.
    pub partially_correct: usize,
    /// Questions never answered, or last answered with an empty selection.
    pub unattempted: usize,
}

/// Authoritative attempt history and score of one participant.
///
/// All timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone)]
pub struct Ledger {
    scoring: ScoringConfig,
    attempts: BTreeMap<u32, Answer>,
    statuses: BTreeMap<u32, AttemptStatus>,
    score: f64,
    elapsed_ms: u64,
    total_ms: u64,
    start_ms: u64,
    end_ms: Option<u64>,
    last_activity_ms: Option<u64>,
    expired: BTreeSet<u32>,
}

impl Ledger {
    /// Fresh ledger with a `total_ms` budget starting at `start_ms`.
    pub fn new(scoring: ScoringConfig, total_ms: u64, start_ms: u64) -> Self {
        Self {
            scoring,
            attempts: BTreeMap::new(),
            statuses: BTreeMap::new(),
            score: 0.0,
            elapsed_ms: 0,
            total_ms,
            start_ms,
            end_ms: None,
            last_activity_ms: None,
            expired: BTreeSet::new(),
        }
    }

    /// Pin a fixed wall-clock end time.
    pub fn with_end_time(mut self, end_ms: u64) -> Self {
        self.end_ms = Some(end_ms);
        self
    }

    /// Resolve the question's correct options from `store` and record `answer`.
    pub fn add_answer(
        &mut self,
        answer: Answer,
        store: &QuestionStore,
    ) -> Result<AttemptStatus, QuestionError> {
        let correct = store.correct_options(answer.question_id())?;
        Ok(self.record(answer, &correct))
    }

    /// Record `answer` against a known correct set and return its status.
    ///
    /// Resubmitting with an unchanged status leaves the score alone; a changed
    /// status first reverses the old contribution, so the score is always the sum
    /// over each question's current status.
    pub fn record(&mut self, answer: Answer, correct: &CorrectOptions) -> AttemptStatus {
        let question_id = answer.question_id();
        let status = correct.evaluate(&answer);

        if let Some(&previous) = self.statuses.get(&question_id) {
            if previous == status {
                return status;
            }
            self.score -= self.contribution(previous);
        }
        self.score += self.contribution(status);

        if status == AttemptStatus::Unattempted {
            self.attempts.remove(&question_id);
        } else {
            self.attempts.insert(question_id, answer);
        }
        self.statuses.insert(question_id, status);
        status
    }

    /// Score contribution of `status` under this ledger's weights.
    pub fn contribution(&self, status: AttemptStatus) -> f64 {
        match status {
            AttemptStatus::Correct => self.scoring.correct_reward,
            AttemptStatus::Incorrect => self.scoring.incorrect_penalty,
            AttemptStatus::PartiallyCorrect => self.scoring.partial_reward,
            AttemptStatus::Unattempted => 0.0,
        }
    }

    /// Running score.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Last recorded status for a question.
    pub fn status(&self, question_id: u32) -> Option<AttemptStatus> {
        self.statuses.get(&question_id).copied()
    }

    /// Last non-empty answer for a question.
    pub fn answer(&self, question_id: u32) -> Option<&Answer> {
        self.attempts.get(&question_id)
    }

    /// Ids in `1..=total_questions` with no status or an `Unattempted` one, ascending.
    pub fn unattempted_ids(&self, total_questions: u32) -> Vec<u32> {
        (1..=total_questions)
            .filter(|id| {
                matches!(
                    self.statuses.get(id),
                    None | Some(AttemptStatus::Unattempted)
                )
            })
            .collect()
    }

    /// Count questions in `1..=total_questions` by status.
    pub fn breakdown(&self, total_questions: u32) -> StatusBreakdown {
        let mut breakdown = StatusBreakdown::default();
        for id in 1..=total_questions {
            match self.statuses.get(&id) {
                Some(AttemptStatus::Correct) => breakdown.correct += 1,
                Some(AttemptStatus::Incorrect) => breakdown.incorrect += 1,
                Some(AttemptStatus::PartiallyCorrect) => breakdown.partially_correct += 1,
                Some(AttemptStatus::Unattempted) | None => breakdown.unattempted += 1,
            }
        }
        breakdown
    }

    /// Charge `delta_ms` against the budget.
    pub fn add_to_elapsed(&mut self, delta_ms: u64) {
        self.elapsed_ms = self.elapsed_ms.saturating_add(delta_ms);
    }

    /// Time charged so far.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Current total budget.
    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }

    /// Budget left, never negative.
    pub fn remaining_ms(&self) -> u64 {
        self.total_ms.saturating_sub(self.elapsed_ms)
    }

    /// When the current budget started.
    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    /// Fixed wall-clock end, if any.
    pub fn end_ms(&self) -> Option<u64> {
        self.end_ms
    }

    /// Last fetch or submission not yet settled.
    pub fn last_activity_ms(&self) -> Option<u64> {
        self.last_activity_ms
    }

    /// Note activity at `now_ms`.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = Some(now_ms);
    }

    /// Charge the gap since the last activity, at most once per activity.
    ///
    /// Returns the charged gap, or `None` when there was nothing to settle.
    pub fn settle_activity(&mut self, now_ms: u64) -> Option<u64> {
        let last = self.last_activity_ms.take()?;
        let gap = now_ms.saturating_sub(last);
        self.add_to_elapsed(gap);
        Some(gap)
    }

    /// Restart the budget at `now_ms` with whatever was left, forgiving time spent away.
    ///
    /// Fails when nothing is left; the ledger is unchanged in that case.
    pub fn rebase_budget(&mut self, now_ms: u64) -> Result<u64, BudgetExhausted> {
        if self.elapsed_ms >= self.total_ms {
            return Err(BudgetExhausted);
        }
        self.total_ms -= self.elapsed_ms;
        self.elapsed_ms = 0;
        self.start_ms = now_ms;
        Ok(self.total_ms)
    }

    /// Set elapsed time to the wall-clock time since start, capped at the fixed end.
    pub fn sync_wall_clock(&mut self, now_ms: u64) {
        let until = self.end_ms.map_or(now_ms, |end| now_ms.min(end));
        self.elapsed_ms = until.saturating_sub(self.start_ms);
    }

    /// Whether the fixed end has been reached at `now_ms`.
    pub fn is_past_end(&self, now_ms: u64) -> bool {
        self.end_ms.is_some_and(|end| now_ms >= end)
    }

    /// Lock `question_id` after its countdown ran out.
    pub fn mark_expired(&mut self, question_id: u32) {
        self.expired.insert(question_id);
    }

    /// Whether the countdown of `question_id` ran out at some point.
    pub fn is_expired(&self, question_id: u32) -> bool {
        self.expired.contains(&question_id)
    }

    /// Whether the budget is fully consumed.
    pub fn is_budget_spent(&self) -> bool {
        self.elapsed_ms >= self.total_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::question::QuestionDraft;

    const SCORING: ScoringConfig = ScoringConfig {
        correct_reward: 1.0,
        incorrect_penalty: -0.25,
        partial_reward: 0.5,
    };

    fn correct_0_2() -> CorrectOptions {
        CorrectOptions::new([0, 2]).unwrap()
    }

    fn answer(question_id: u32, indices: &[usize]) -> Answer {
        Answer::from_indices(question_id, indices).unwrap()
    }

    #[test]
    fn resubmitting_same_status_is_idempotent() {
        let mut ledger = Ledger::new(SCORING, 0, 0);
        assert_eq!(
            ledger.record(answer(1, &[0, 2]), &correct_0_2()),
            AttemptStatus::Correct
        );
        assert_eq!(ledger.score(), 1.0);
        ledger.record(answer(1, &[0, 2]), &correct_0_2());
        assert_eq!(ledger.score(), 1.0);
    }

    #[test]
    fn changed_status_reconciles_contribution() {
        let mut ledger = Ledger::new(SCORING, 0, 0);
        ledger.record(answer(1, &[0, 2]), &correct_0_2());
        ledger.record(answer(2, &[1]), &correct_0_2());
        assert_eq!(ledger.score(), 0.75);

        let before = ledger.score();
        ledger.record(answer(1, &[0]), &correct_0_2());
        assert_eq!(
            ledger.score(),
            before - ledger.contribution(AttemptStatus::Correct)
                + ledger.contribution(AttemptStatus::PartiallyCorrect)
        );
        assert_eq!(ledger.score(), 0.25);

        ledger.record(answer(2, &[]), &correct_0_2());
        assert_eq!(ledger.score(), 0.5);
        assert_eq!(ledger.status(2), Some(AttemptStatus::Unattempted));
        assert!(ledger.answer(2).is_none());
        assert_eq!(ledger.answer(1), Some(&answer(1, &[0])));
    }

    #[test]
    fn incorrect_without_negative_marking_is_still_reported() {
        let mut ledger = Ledger::new(ScoringConfig::default(), 0, 0);
        assert_eq!(
            ledger.record(answer(1, &[3]), &correct_0_2()),
            AttemptStatus::Incorrect
        );
        assert_eq!(ledger.score(), 0.0);
        assert_eq!(ledger.status(1), Some(AttemptStatus::Incorrect));
        assert_eq!(ledger.unattempted_ids(2), vec![2]);
    }

    #[test]
    fn unattempted_ids_complement_attempted_statuses() {
        let mut ledger = Ledger::new(SCORING, 0, 0);
        ledger.record(answer(2, &[0]), &correct_0_2());
        ledger.record(answer(4, &[]), &correct_0_2());
        ledger.record(answer(5, &[1]), &correct_0_2());
        assert_eq!(ledger.unattempted_ids(5), vec![1, 3, 4]);

        ledger.record(answer(5, &[]), &correct_0_2());
        assert_eq!(ledger.unattempted_ids(5), vec![1, 3, 4, 5]);

        let breakdown = ledger.breakdown(5);
        assert_eq!(breakdown.partially_correct, 1);
        assert_eq!(breakdown.unattempted, 4);
    }

    #[test]
    fn add_answer_resolves_from_store() {
        let store = QuestionStore::new();
        let id = store
            .insert(QuestionDraft {
                text: "pick".into(),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct: CorrectOptions::parse("B").unwrap(),
            })
            .unwrap();
        let mut ledger = Ledger::new(SCORING, 0, 0);
        assert_eq!(
            ledger.add_answer(answer(id, &[1]), &store),
            Ok(AttemptStatus::Correct)
        );
        assert_eq!(
            ledger.add_answer(answer(9, &[1]), &store),
            Err(QuestionError::NotFound(9))
        );
    }

    #[test]
    fn settlement_happens_once_per_activity() {
        let mut ledger = Ledger::new(SCORING, 10_000, 1_000);
        ledger.touch(2_000);
        assert_eq!(ledger.settle_activity(2_500), Some(500));
        assert_eq!(ledger.settle_activity(3_000), None);
        assert_eq!(ledger.elapsed_ms(), 500);

        ledger.touch(4_000);
        assert_eq!(ledger.settle_activity(9_000), Some(5_000));
        assert_eq!(ledger.elapsed_ms(), 5_500);
        assert_eq!(ledger.last_activity_ms(), None);
    }

    #[test]
    fn expired_questions_stay_locked() {
        let mut ledger = Ledger::new(SCORING, 0, 0);
        assert!(!ledger.is_expired(2));
        ledger.mark_expired(2);
        ledger.mark_expired(2);
        assert!(ledger.is_expired(2));
        assert!(!ledger.is_expired(1));
    }

    #[test]
    fn rebase_forgives_time_away() {
        let mut ledger = Ledger::new(SCORING, 10_000, 0);
        ledger.add_to_elapsed(4_000);
        assert_eq!(ledger.rebase_budget(50_000), Ok(6_000));
        assert_eq!(ledger.total_ms(), 6_000);
        assert_eq!(ledger.elapsed_ms(), 0);
        assert_eq!(ledger.start_ms(), 50_000);
    }

    #[test]
    fn rebase_fails_exactly_at_budget() {
        let mut ledger = Ledger::new(SCORING, 10_000, 0);
        ledger.add_to_elapsed(10_000);
        assert_eq!(ledger.rebase_budget(50_000), Err(BudgetExhausted));
        assert_eq!(ledger.total_ms(), 10_000);
        assert_eq!(ledger.elapsed_ms(), 10_000);
    }

    #[test]
    fn wall_clock_sync_caps_at_end() {
        let mut ledger = Ledger::new(SCORING, 5_000, 1_000).with_end_time(6_000);
        ledger.sync_wall_clock(3_000);
        assert_eq!(ledger.elapsed_ms(), 2_000);
        assert!(!ledger.is_past_end(5_999));

        ledger.sync_wall_clock(9_000);
        assert_eq!(ledger.elapsed_ms(), 5_000);
        assert!(ledger.is_past_end(6_000));
        assert!(ledger.is_budget_spent());
    }
}
