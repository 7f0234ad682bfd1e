use thiserror::Error;

/// Errors produced while converting a capture into canonical PCM.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The input bytes could not be decoded as audio.
    #[error("could not decode audio ({media_type}): {reason}")]
    Decode { media_type: String, reason: String },

    /// Decoding succeeded but yielded no samples.
    #[error("decoded audio contains no samples")]
    EmptyAudio,
}

/// Errors reported by an external pronunciation scorer implementation.
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("scorer configuration error: {0}")]
    Configuration(String),

    #[error("scorer request failed: {0}")]
    Request(String),

    #[error("scorer returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// Errors surfaced by the speech evaluation orchestrator.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// The external scorer timed out, was cancelled, or failed outright.
    #[error("pronunciation scoring unavailable: {0}")]
    ScoringUnavailable(String),
}

/// Illegal transitions and collaborator failures in a test session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("recording may only start while a question is presented")]
    NotPresenting,

    #[error("cannot start recording while prompt playback is in progress")]
    PlaybackInProgress,

    #[error("no recording in progress")]
    NotRecording,

    #[error("submitted answer does not match the current question type")]
    AnswerMismatch,

    #[error("the test is already complete")]
    Completed,

    #[error("audio capture failed: {0}")]
    Capture(String),
}
