//! Rhetorica - spoken-language assessment engine.
//!
//! The pipeline behind the Rhetorica practice test: captured audio is
//! normalized to 16 kHz mono 16-bit PCM, sent to an injected pronunciation
//! scorer for a transcript plus pronunciation/fluency marks, and graded
//! locally for accuracy (edit distance) and phonetic similarity. A test
//! session walks sections and questions, stores answers keyed by
//! (section, question), batch-evaluates each section before leaving it, and
//! derives section and overall reports on demand.
//!
//! Rendering, data loading and account handling live in the hosting
//! application; this crate only exposes plain data at those boundaries.

pub mod assessment;
pub mod audio;
pub mod error;
pub mod evaluation;
pub mod scorer;
pub mod text;

pub use assessment::{
    Answer, AnswerStore, AudioAnswer, AudioCapture, Question, QuestionType, Section, SessionPhase,
    SessionState, TestPlan, TestReport, TestSession,
};
pub use audio::{CanonicalAudio, Recording, TARGET_SAMPLE_RATE};
pub use error::{AudioError, EvaluationError, ScorerError, SessionError};
pub use evaluation::{CancelToken, EvaluationScores, SpeechEvaluator};
pub use scorer::{HttpScorer, HttpScorerConfig, PronunciationAssessment, PronunciationScorer};
