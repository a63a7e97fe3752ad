use std::collections::BTreeSet;

use thiserror::Error;

/// Number of options every question carries.
pub const OPTION_COUNT: usize = 4;
/// Upper bound on the number of correct options for a question.
pub const MAX_CORRECT_OPTIONS: usize = 3;

/// Errors raised while building or resolving questions and answers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionError {
    /// No question is stored under this identifier.
    #[error("question `{0}` not found")]
    NotFound(u32),
    /// Question text was blank.
    #[error("question text must not be empty")]
    EmptyText,
    /// Wrong number of options or a blank option.
    #[error("a question needs exactly {} non-empty options", OPTION_COUNT)]
    InvalidOptions,
    /// The correct option set was empty.
    #[error("a question needs at least one correct option")]
    NoCorrectOption,
    /// The correct option set was larger than [`MAX_CORRECT_OPTIONS`].
    #[error("a question accepts at most {} correct options", MAX_CORRECT_OPTIONS)]
    TooManyCorrectOptions,
    /// An option index outside `0..OPTION_COUNT`.
    #[error("option index {0} is out of range")]
    OptionOutOfRange(usize),
    /// A correct-option token that is neither `A`-`D` nor `1`-`4`.
    #[error("invalid correct option `{0}`")]
    InvalidCorrectSpec(String),
}

/// Outcome of comparing an answer against a question's correct options.
///
/// The discriminants are the ordinals sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptStatus {
    /// Exactly the correct options were selected.
    Correct = 0,
    /// Only wrong options were selected.
    Incorrect = 1,
    /// Some correct options were selected, but not a clean match.
    PartiallyCorrect = 2,
    /// Nothing was selected.
    Unattempted = 3,
}

impl AttemptStatus {
    /// Wire ordinal of this status.
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// Set of zero-based option indices that are correct for a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectOptions(BTreeSet<usize>);

impl CorrectOptions {
    /// Validate and wrap a set of correct indices.
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Result<Self, QuestionError> {
        let mut set = BTreeSet::new();
        for index in indices {
            if index >= OPTION_COUNT {
                return Err(QuestionError::OptionOutOfRange(index));
            }
            set.insert(index);
        }
        if set.is_empty() {
            return Err(QuestionError::NoCorrectOption);
        }
        if set.len() > MAX_CORRECT_OPTIONS {
            return Err(QuestionError::TooManyCorrectOptions);
        }
        Ok(Self(set))
    }

    /// Parse a spec such as `"A,C"` or `"1, 3"` (letters or one-based digits).
    pub fn parse(spec: &str) -> Result<Self, QuestionError> {
        let indices = spec
            .split(',')
            .map(|token| token.chars().filter(|c| !c.is_whitespace()).collect::<String>())
            .filter(|token| !token.is_empty())
            .map(|token| parse_option_token(&token))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(indices)
    }

    /// Whether `index` is one of the correct options.
    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    /// Correct indices in ascending order.
    pub fn indices(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }

    /// Number of correct options.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no index. `false` for any set built through `new` or `parse`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Classify the options selected in `answer`.
    ///
    /// A clean match is `Correct`, any mix of hits with misses or wrong picks is
    /// `PartiallyCorrect`, wrong picks only is `Incorrect`, nothing is `Unattempted`.
    pub fn evaluate(&self, answer: &Answer) -> AttemptStatus {
        let mut hits = 0;
        let mut wrong = 0;
        for (index, selected) in answer.selected().iter().enumerate() {
            if !selected {
                continue;
            }
            if self.contains(index) {
                hits += 1;
            } else {
                wrong += 1;
            }
        }

        match (hits, wrong) {
            (0, 0) => AttemptStatus::Unattempted,
            (0, _) => AttemptStatus::Incorrect,
            (hits, 0) if hits == self.len() => AttemptStatus::Correct,
            _ => AttemptStatus::PartiallyCorrect,
        }
    }
}

fn parse_option_token(token: &str) -> Result<usize, QuestionError> {
    let invalid = || QuestionError::InvalidCorrectSpec(token.to_string());
    let first = token.chars().next().ok_or_else(invalid)?;
    let index = if first.is_ascii_digit() {
        token
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .ok_or_else(invalid)?
    } else if token.len() == 1 && first.is_ascii_alphabetic() {
        (first.to_ascii_uppercase() as u8).wrapping_sub(b'A') as usize
    } else {
        return Err(invalid());
    };

    if index >= OPTION_COUNT {
        return Err(invalid());
    }
    Ok(index)
}

/// Question content before the store assigns an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    /// Question prompt.
    pub text: String,
    /// Option labels in display order.
    pub options: Vec<String>,
    /// Correct option indices.
    pub correct: CorrectOptions,
}

impl QuestionDraft {
    /// Check text and options are usable.
    pub fn validate(&self) -> Result<(), QuestionError> {
        if self.text.trim().is_empty() {
            return Err(QuestionError::EmptyText);
        }
        if self.options.len() != OPTION_COUNT
            || self.options.iter().any(|option| option.trim().is_empty())
        {
            return Err(QuestionError::InvalidOptions);
        }
        Ok(())
    }
}

/// Stored question; the identifier never changes after insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Sequential identifier assigned by the store, starting at 1.
    pub id: u32,
    /// Question prompt.
    pub text: String,
    /// Option labels in display order.
    pub options: Vec<String>,
    /// Correct option indices.
    pub correct: CorrectOptions,
}

impl Question {
    /// Attach an identifier to validated content.
    pub fn from_draft(id: u32, draft: QuestionDraft) -> Self {
        Self {
            id,
            text: draft.text,
            options: draft.options,
            correct: draft.correct,
        }
    }
}

/// Options a user selected for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    question_id: u32,
    selected: [bool; OPTION_COUNT],
}

impl Answer {
    /// Empty selection for `question_id`.
    pub fn new(question_id: u32) -> Self {
        Self {
            question_id,
            selected: [false; OPTION_COUNT],
        }
    }

    /// Build an answer from zero-based option indices. Duplicates collapse.
    pub fn from_indices(question_id: u32, indices: &[usize]) -> Result<Self, QuestionError> {
        let mut answer = Self::new(question_id);
        for &index in indices {
            answer.select(index)?;
        }
        Ok(answer)
    }

    /// Mark `index` as selected.
    pub fn select(&mut self, index: usize) -> Result<(), QuestionError> {
        let slot = self
            .selected
            .get_mut(index)
            .ok_or(QuestionError::OptionOutOfRange(index))?;
        *slot = true;
        Ok(())
    }

    /// Question this answer targets.
    pub fn question_id(&self) -> u32 {
        self.question_id
    }

    /// One flag per option position.
    pub fn selected(&self) -> &[bool; OPTION_COUNT] {
        &self.selected
    }

    /// Whether no option is selected.
    pub fn is_blank(&self) -> bool {
        self.selected.iter().all(|selected| !selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(indices: &[usize]) -> Answer {
        Answer::from_indices(1, indices).unwrap()
    }

    #[test]
    fn evaluate_against_two_correct_options() {
        let correct = CorrectOptions::new([0, 2]).unwrap();
        assert_eq!(correct.evaluate(&answer(&[0, 2])), AttemptStatus::Correct);
        assert_eq!(
            correct.evaluate(&answer(&[0])),
            AttemptStatus::PartiallyCorrect
        );
        assert_eq!(correct.evaluate(&answer(&[1])), AttemptStatus::Incorrect);
        assert_eq!(correct.evaluate(&answer(&[])), AttemptStatus::Unattempted);
    }

    #[test]
    fn mixed_hits_and_wrong_picks_are_partial() {
        let correct = CorrectOptions::new([0, 2]).unwrap();
        assert_eq!(
            correct.evaluate(&answer(&[0, 1])),
            AttemptStatus::PartiallyCorrect
        );
        assert_eq!(
            correct.evaluate(&answer(&[0, 1, 2])),
            AttemptStatus::PartiallyCorrect
        );
        assert_eq!(
            correct.evaluate(&answer(&[1, 3])),
            AttemptStatus::Incorrect
        );
    }

    #[test]
    fn parse_letters_and_digits() {
        assert_eq!(CorrectOptions::parse("A,C").unwrap().indices(), vec![0, 2]);
        assert_eq!(CorrectOptions::parse(" b , d ").unwrap().indices(), vec![1, 3]);
        assert_eq!(CorrectOptions::parse("1, 4").unwrap().indices(), vec![0, 3]);
        assert_eq!(CorrectOptions::parse("A,A").unwrap().indices(), vec![0]);
    }

    #[test]
    fn parse_rejects_bad_specs() {
        assert!(matches!(
            CorrectOptions::parse("E"),
            Err(QuestionError::InvalidCorrectSpec(_))
        ));
        assert!(matches!(
            CorrectOptions::parse("0"),
            Err(QuestionError::InvalidCorrectSpec(_))
        ));
        assert!(matches!(
            CorrectOptions::parse("5"),
            Err(QuestionError::InvalidCorrectSpec(_))
        ));
        assert_eq!(CorrectOptions::parse(""), Err(QuestionError::NoCorrectOption));
        assert_eq!(
            CorrectOptions::parse("A,B,C,D"),
            Err(QuestionError::TooManyCorrectOptions)
        );
    }

    #[test]
    fn answer_rejects_out_of_range_option() {
        assert_eq!(
            Answer::from_indices(3, &[1, 4]),
            Err(QuestionError::OptionOutOfRange(4))
        );
        assert!(Answer::new(3).is_blank());
    }

    #[test]
    fn draft_requires_four_options() {
        let draft = QuestionDraft {
            text: "Capital of France?".into(),
            options: vec!["Paris".into(), "Rome".into(), "Oslo".into()],
            correct: CorrectOptions::new([0]).unwrap(),
        };
        assert_eq!(draft.validate(), Err(QuestionError::InvalidOptions));
    }
}
