// Error types for the trainer core

use uuid::Uuid;

/// Audio clock errors
/// All of these leave the clock usable for scheduling; only audio output is affected.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Audio configuration error: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),

    #[error("Audio stream creation failed: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Audio stream could not start: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Unsupported sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("Audio output thread exited before reporting status")]
    OutputThreadDied,
}

/// Training store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Session startup errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Training {0} not found")]
    TrainingNotFound(Uuid),

    #[error("Training has no exercises")]
    EmptyTraining,
}
