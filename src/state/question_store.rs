use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::DashMap;

use crate::state::question::{CorrectOptions, Question, QuestionDraft, QuestionError};

/// Concurrent, read-mostly repository of questions keyed by sequential id.
///
/// Lookups hand out owned snapshots, so callers never hold a live reference into
/// the map and a mutation only excludes readers of the same entry while it runs.
#[derive(Debug, Default)]
pub struct QuestionStore {
    entries: DashMap<u32, Question>,
    last_id: AtomicU32,
    initialized: AtomicBool,
}

impl QuestionStore {
    /// Create an empty, uninitialized store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `draft`, assign the next identifier, and store it.
    pub fn insert(&self, draft: QuestionDraft) -> Result<u32, QuestionError> {
        draft.validate()?;
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.entries.insert(id, Question::from_draft(id, draft));
        Ok(id)
    }

    /// Snapshot of the question stored under `id`.
    pub fn get(&self, id: u32) -> Option<Question> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Correct options of the question stored under `id`.
    pub fn correct_options(&self, id: u32) -> Result<CorrectOptions, QuestionError> {
        self.entries
            .get(&id)
            .map(|entry| entry.correct.clone())
            .ok_or(QuestionError::NotFound(id))
    }

    /// Replace the content of an existing question, keeping its identifier.
    pub fn update(&self, id: u32, draft: QuestionDraft) -> Result<(), QuestionError> {
        draft.validate()?;
        let mut entry = self.entries.get_mut(&id).ok_or(QuestionError::NotFound(id))?;
        *entry = Question::from_draft(id, draft);
        Ok(())
    }

    /// Remove a question, returning its last content.
    pub fn remove(&self, id: u32) -> Result<Question, QuestionError> {
        self.entries
            .remove(&id)
            .map(|(_, question)| question)
            .ok_or(QuestionError::NotFound(id))
    }

    /// Number of stored questions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no question is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether bulk loading has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Flag the end of bulk loading.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }
}
