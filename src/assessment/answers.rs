//! Per-session answer storage.
//!
//! A sparse two-level map keyed by (section index, question index). Entries
//! appear only through explicit submission and survive until an explicit
//! clear; score updates merge into existing entries without touching
//! anything else.

use std::collections::BTreeMap;

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};

use super::questions::QuestionType;
use crate::audio::Recording;
use crate::evaluation::EvaluationScores;

/// A spoken answer awaiting (or carrying) evaluation scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioAnswer {
    pub question_type: QuestionType,
    pub recording: Recording,
    /// Seconds the learner spent recording.
    pub duration: u64,
    pub scores: Option<EvaluationScores>,
}

/// A word-ordering answer, checked locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceBuildAnswer {
    pub arranged_words: Vec<String>,
    pub is_correct: bool,
    pub attempts: u32,
}

/// A fill-in answer with its supporting recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceCompletionAnswer {
    pub text_answer: String,
    pub recording: Recording,
    pub is_correct: bool,
    pub attempts: u32,
    pub scores: Option<EvaluationScores>,
}

/// One submitted answer, tagged by question kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Answer {
    Audio(AudioAnswer),
    SentenceBuild(SentenceBuildAnswer),
    SentenceCompletion(SentenceCompletionAnswer),
}

impl Answer {
    pub fn question_type(&self) -> QuestionType {
        match self {
            Answer::Audio(a) => a.question_type,
            Answer::SentenceBuild(_) => QuestionType::SentenceBuild,
            Answer::SentenceCompletion(_) => QuestionType::SentenceCompletion,
        }
    }

    pub fn scores(&self) -> Option<&EvaluationScores> {
        match self {
            Answer::Audio(a) => a.scores.as_ref(),
            Answer::SentenceBuild(_) => None,
            Answer::SentenceCompletion(a) => a.scores.as_ref(),
        }
    }

    /// Correctness flag and attempt count for locally-checked answers.
    pub fn correctness(&self) -> Option<(bool, u32)> {
        match self {
            Answer::Audio(_) => None,
            Answer::SentenceBuild(a) => Some((a.is_correct, a.attempts)),
            Answer::SentenceCompletion(a) => Some((a.is_correct, a.attempts)),
        }
    }
}

/// An answer plus the moment it was stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAnswer {
    pub answer: Answer,
    /// Milliseconds since the epoch, stamped by the store on `put`.
    pub timestamp_ms: i64,
}

/// Answers for one test session. Constructed fresh per session; there is no
/// shared or process-wide instance.
#[derive(Debug, Default)]
pub struct AnswerStore {
    answers: BTreeMap<usize, BTreeMap<usize, StoredAnswer>>,
    last_timestamp_ms: i64,
    missing_score_updates: u64,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the answer for a question. The entry is stamped
    /// with a timestamp that never decreases across the life of the store,
    /// even if the wall clock steps backwards.
    pub fn put(&mut self, section: usize, question: usize, answer: Answer) {
        let timestamp_ms = Utc::now().timestamp_millis().max(self.last_timestamp_ms);
        self.last_timestamp_ms = timestamp_ms;

        self.answers.entry(section).or_default().insert(
            question,
            StoredAnswer {
                answer,
                timestamp_ms,
            },
        );
    }

    /// Merge score fields into an existing answer. A missing entry leaves
    /// the store untouched; the dropped update is counted and logged so lost
    /// evaluations stay visible in diagnostics. Timestamps and non-score
    /// fields never change. Returns whether an entry was updated.
    pub fn update_scores(
        &mut self,
        section: usize,
        question: usize,
        patch: &EvaluationScores,
    ) -> bool {
        let Some(stored) = self
            .answers
            .get_mut(&section)
            .and_then(|m| m.get_mut(&question))
        else {
            self.missing_score_updates += 1;
            warn!("dropping score update for unanswered question {section}/{question}");
            return false;
        };

        let slot = match &mut stored.answer {
            Answer::Audio(a) => &mut a.scores,
            Answer::SentenceCompletion(a) => &mut a.scores,
            Answer::SentenceBuild(_) => {
                self.missing_score_updates += 1;
                warn!("dropping score update for sentence-build answer {section}/{question}");
                return false;
            }
        };

        match slot {
            Some(existing) => existing.merge(patch),
            None => *slot = Some(patch.clone()),
        }
        true
    }

    pub fn get(&self, section: usize, question: usize) -> Option<&StoredAnswer> {
        self.answers.get(&section).and_then(|m| m.get(&question))
    }

    /// All answers submitted for a section, keyed by question index.
    pub fn section_answers(&self, section: usize) -> Option<&BTreeMap<usize, StoredAnswer>> {
        self.answers.get(&section)
    }

    pub fn clear(&mut self) {
        self.answers.clear();
    }

    pub fn clear_section(&mut self, section: usize) {
        self.answers.remove(&section);
    }

    pub fn is_empty(&self) -> bool {
        self.answers.values().all(|m| m.is_empty())
    }

    /// How many score updates were dropped because no answer existed.
    pub fn missing_score_updates(&self) -> u64 {
        self.missing_score_updates
    }
}
