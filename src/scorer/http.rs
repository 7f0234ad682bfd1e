//! JSON-over-HTTP client for a hosted pronunciation assessment service.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use log::{debug, warn};
use reqwest::Client;
use serde_json::Value;

use super::{PronunciationAssessment, PronunciationScorer};
use crate::audio::CanonicalAudio;
use crate::error::ScorerError;

#[derive(Debug, Clone)]
pub struct HttpScorerConfig {
    pub endpoint: String,
    pub api_key: String,
    pub language: String,
}

impl HttpScorerConfig {
    /// Read endpoint and credentials from the environment.
    pub fn from_env() -> Result<Self, ScorerError> {
        let endpoint = std::env::var("RHETORICA_SCORER_URL").map_err(|_| {
            ScorerError::Configuration("RHETORICA_SCORER_URL is not set".to_string())
        })?;
        let api_key = std::env::var("RHETORICA_SCORER_KEY").map_err(|_| {
            ScorerError::Configuration("RHETORICA_SCORER_KEY is not set".to_string())
        })?;
        let language =
            std::env::var("RHETORICA_SCORER_LANGUAGE").unwrap_or_else(|_| "en-US".to_string());

        Ok(Self {
            endpoint,
            api_key,
            language,
        })
    }
}

/// Request/response client for a pronunciation assessment endpoint that
/// grades on a hundred-mark scale.
pub struct HttpScorer {
    client: Client,
    config: HttpScorerConfig,
}

impl HttpScorer {
    pub fn new(config: HttpScorerConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn from_env() -> Result<Self, ScorerError> {
        Ok(Self::new(HttpScorerConfig::from_env()?))
    }
}

#[async_trait]
impl PronunciationScorer for HttpScorer {
    async fn score(
        &self,
        audio: &CanonicalAudio,
        reference_text: Option<&str>,
    ) -> Result<PronunciationAssessment, ScorerError> {
        let request_body = serde_json::json!({
            "audio": B64.encode(audio.as_wav_bytes()),
            "format": "wav/pcm-16khz-16bit-mono",
            "language": self.config.language,
            "reference_text": reference_text,
            "grading_system": "hundred-mark",
            "granularity": "word",
        });

        debug!(
            "submitting {}s of audio for assessment (reference: {})",
            audio.duration_secs(),
            reference_text.is_some()
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ScorerError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ScorerError::Request(format!(
                "assessment service returned HTTP {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ScorerError::InvalidResponse(e.to_string()))?;

        let transcript = body["transcript"]
            .as_str()
            .ok_or_else(|| ScorerError::InvalidResponse("missing transcript".to_string()))?
            .trim()
            .to_string();

        // Transcript-only calls may omit the scores entirely.
        let pronunciation_score = body["pronunciation_score"].as_f64().unwrap_or_else(|| {
            if reference_text.is_some() {
                warn!("assessment response carried no pronunciation_score");
            }
            0.0
        }) as f32;
        let fluency_score = body["fluency_score"].as_f64().unwrap_or(0.0) as f32;

        Ok(PronunciationAssessment {
            transcript,
            pronunciation_score,
            fluency_score,
        })
    }
}
