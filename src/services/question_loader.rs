use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::state::{
    question::{CorrectOptions, QuestionDraft, QuestionError},
    question_store::QuestionStore,
};

/// Errors raised while populating the question bank.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The bank file could not be read.
    #[error("failed to read question bank `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The bank file is not a JSON array.
    #[error("failed to parse question bank `{path}`")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct QuestionRow {
    text: String,
    options: Vec<String>,
    correct: String,
}

impl TryFrom<QuestionRow> for QuestionDraft {
    type Error = QuestionError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        Ok(QuestionDraft {
            text: row.text.trim().to_string(),
            options: row
                .options
                .into_iter()
                .map(|option| option.trim().to_string())
                .collect(),
            correct: CorrectOptions::parse(&row.correct)?,
        })
    }
}

/// Load every usable row of the bank at `path` into `store` and mark it initialized.
///
/// Returns the number of questions inserted.
pub fn load_questions(path: &Path, store: &QuestionStore) -> Result<usize, LoadError> {
    let contents = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let loaded = load_from_str(&contents, store).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), loaded, "question bank loaded");
    Ok(loaded)
}

/// Parse a JSON array of rows, skipping rows that do not form a valid question.
pub fn load_from_str(contents: &str, store: &QuestionStore) -> serde_json::Result<usize> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(contents)?;
    let mut loaded = 0;

    for (index, value) in rows.into_iter().enumerate() {
        let row = match serde_json::from_value::<QuestionRow>(value) {
            Ok(row) => row,
            Err(err) => {
                warn!(row = index + 1, error = %err, "skipping malformed question row");
                continue;
            }
        };
        let inserted = QuestionDraft::try_from(row).and_then(|draft| store.insert(draft));
        match inserted {
            Ok(_) => loaded += 1,
            Err(err) => warn!(row = index + 1, error = %err, "skipping invalid question row"),
        }
    }

    store.mark_initialized();
    Ok(loaded)
}
