//! Composite per-answer speech evaluation.
//!
//! One evaluation call normalizes the capture, asks the external scorer for
//! a transcript plus pronunciation/fluency, and derives the two local
//! metrics (accuracy, phonetic) from the transcript. The orchestrator is
//! stateless and performs no retries; independent answers may be evaluated
//! concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::audio::{self, CanonicalAudio, Recording};
use crate::error::EvaluationError;
use crate::scorer::{PronunciationAssessment, PronunciationScorer};
use crate::text;

/// Upper bound on a single external scorer call unless the caller overrides.
pub const DEFAULT_SCORER_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative cancellation flag shared between a session and its in-flight
/// scorer calls. Cancelling is sticky: once set, every waiter resolves.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            // The flag may have flipped between the check and registering.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Composite scores for one spoken answer. Fields are optional because
/// answers recorded mid-test carry scores only after evaluation; numeric
/// fields are clamped to [0, 100] at construction and stay there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub pronunciation: Option<f32>,
    pub fluency: Option<f32>,
    pub accuracy: Option<f32>,
    pub phonetic: Option<f32>,
    pub transcript: Option<String>,
}

impl EvaluationScores {
    pub fn full(
        pronunciation: f32,
        fluency: f32,
        accuracy: f32,
        phonetic: f32,
        transcript: String,
    ) -> Self {
        Self {
            pronunciation: Some(clamp_score(pronunciation)),
            fluency: Some(clamp_score(fluency)),
            accuracy: Some(clamp_score(accuracy)),
            phonetic: Some(clamp_score(phonetic)),
            transcript: Some(transcript),
        }
    }

    /// Neutral maximum scores reported for open-ended answers, where no
    /// reference text exists to grade against. Only the transcript carries
    /// information; reports rely on this convention, so keep it.
    pub fn open_ended(transcript: String) -> Self {
        Self::full(100.0, 100.0, 100.0, 100.0, transcript)
    }

    /// Zeroed fallback stored when an evaluation fails outright.
    pub fn zeroed() -> Self {
        Self::full(0.0, 0.0, 0.0, 0.0, String::new())
    }

    /// Overwrite only the fields present in `patch`.
    pub fn merge(&mut self, patch: &EvaluationScores) {
        if let Some(v) = patch.pronunciation {
            self.pronunciation = Some(v);
        }
        if let Some(v) = patch.fluency {
            self.fluency = Some(v);
        }
        if let Some(v) = patch.accuracy {
            self.accuracy = Some(v);
        }
        if let Some(v) = patch.phonetic {
            self.phonetic = Some(v);
        }
        if let Some(v) = &patch.transcript {
            self.transcript = Some(v.clone());
        }
    }

    /// An answer counts as fully evaluated once both remote metrics are
    /// present; the section batch uses this to skip re-scoring.
    pub fn is_complete(&self) -> bool {
        self.pronunciation.is_some() && self.fluency.is_some()
    }
}

fn clamp_score(value: f32) -> f32 {
    value.clamp(0.0, 100.0)
}

/// Combines the PCM normalizer, the external scorer and the local similarity
/// metrics into one composite score per recorded answer.
pub struct SpeechEvaluator {
    scorer: Arc<dyn PronunciationScorer>,
    scorer_timeout: Duration,
}

impl SpeechEvaluator {
    pub fn new(scorer: Arc<dyn PronunciationScorer>) -> Self {
        Self::with_timeout(scorer, DEFAULT_SCORER_TIMEOUT)
    }

    pub fn with_timeout(scorer: Arc<dyn PronunciationScorer>, scorer_timeout: Duration) -> Self {
        Self {
            scorer,
            scorer_timeout,
        }
    }

    /// Score a recorded answer against its reference text.
    pub async fn evaluate_reading(
        &self,
        recording: &Recording,
        reference_text: &str,
        cancel: &CancelToken,
    ) -> Result<EvaluationScores, EvaluationError> {
        let canonical = audio::normalize(recording)?;
        let assessment = self
            .score_canonical(&canonical, Some(reference_text), cancel)
            .await?;

        let accuracy = text::similarity(&assessment.transcript, reference_text);
        let phonetic = text::phonetic_similarity(&assessment.transcript, reference_text);

        info!(
            "evaluated reading: pronunciation={:.0} fluency={:.0} accuracy={} phonetic={}",
            assessment.pronunciation_score, assessment.fluency_score, accuracy, phonetic
        );

        Ok(EvaluationScores::full(
            assessment.pronunciation_score,
            assessment.fluency_score,
            accuracy as f32,
            phonetic as f32,
            assessment.transcript,
        ))
    }

    /// Transcribe an open-ended answer. There is no ground truth, so every
    /// numeric metric reports the maximum score.
    pub async fn evaluate_open_ended(
        &self,
        recording: &Recording,
        cancel: &CancelToken,
    ) -> Result<EvaluationScores, EvaluationError> {
        let canonical = audio::normalize(recording)?;
        let assessment = self.score_canonical(&canonical, None, cancel).await?;
        Ok(EvaluationScores::open_ended(assessment.transcript))
    }

    async fn score_canonical(
        &self,
        canonical: &CanonicalAudio,
        reference_text: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<PronunciationAssessment, EvaluationError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(EvaluationError::ScoringUnavailable("evaluation cancelled".to_string()))
            }
            result = timeout(self.scorer_timeout, self.scorer.score(canonical, reference_text)) => {
                match result {
                    Ok(Ok(assessment)) => Ok(assessment),
                    Ok(Err(err)) => Err(EvaluationError::ScoringUnavailable(err.to_string())),
                    Err(_) => Err(EvaluationError::ScoringUnavailable(format!(
                        "scorer timed out after {:?}",
                        self.scorer_timeout
                    ))),
                }
            }
        }
    }
}
