//! Scoring & resolution engine.
//!
//! One pure function evaluates every submission, both for immediate
//! self-feedback on the answering device and wherever the result is
//! persisted. Identical inputs must agree bit-for-bit, so nothing in here
//! reads a clock or touches shared state.

use crate::config::ScoringConfig;
use crate::types::{Question, Submission};

/// What a submission earned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub points: u32,
    pub is_fully_correct: bool,
}

impl Verdict {
    const MISS: Verdict = Verdict {
        points: 0,
        is_fully_correct: false,
    };
}

/// Normalize a short answer for comparison (trim whitespace, lowercase).
fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Evaluate `submission` against `question`. Total over every input pair:
/// a kind-mismatched submission is simply a miss, never an error.
pub fn score(question: &Question, submission: &Submission, config: &ScoringConfig) -> Verdict {
    match (question, submission) {
        (Question::SingleChoice { correct_index, .. }, Submission::Choice { index }) => {
            if index == correct_index {
                Verdict {
                    points: config.single_choice_points,
                    is_fully_correct: true,
                }
            } else {
                Verdict::MISS
            }
        }
        (Question::MultiTruth { statements, .. }, Submission::Truths { values }) => {
            let matches = statements
                .iter()
                .zip(values.iter())
                .filter(|(s, v)| s.expected == **v)
                .count();
            Verdict {
                points: config.ladder_points(matches),
                is_fully_correct: !statements.is_empty() && matches == statements.len(),
            }
        }
        (Question::ShortAnswer { expected, .. }, Submission::Text { value }) => {
            if normalize(value) == normalize(expected) {
                Verdict {
                    points: config.short_answer_points,
                    is_fully_correct: true,
                }
            } else {
                Verdict::MISS
            }
        }
        _ => Verdict::MISS,
    }
}
