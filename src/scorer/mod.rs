//! External pronunciation/fluency scoring capability.
//!
//! The remote model that grades pronunciation and fluency is a black box to
//! the rest of the crate: anything that can take canonical PCM plus optional
//! reference text and come back with a transcript and two 0-100 scores.

pub mod http;

pub use http::{HttpScorer, HttpScorerConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::CanonicalAudio;
use crate::error::ScorerError;

/// What the external assessment service reports for one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PronunciationAssessment {
    pub transcript: String,
    pub pronunciation_score: f32,
    pub fluency_score: f32,
}

/// Capability interface for the remote pronunciation/fluency model.
///
/// Implementations must accept 16 kHz mono 16-bit PCM and either answer or
/// fail; the evaluator enforces its own timeout on top, so a hung call is
/// cut off rather than awaited forever.
#[async_trait]
pub trait PronunciationScorer: Send + Sync {
    /// Score a canonical recording. `reference_text` is `None` for
    /// open-ended answers, where only the transcript is wanted.
    async fn score(
        &self,
        audio: &CanonicalAudio,
        reference_text: Option<&str>,
    ) -> Result<PronunciationAssessment, ScorerError>;
}
