use std::time::Duration;
use thiserror::Error;

/// Microphone could not be acquired.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MediaAccessError {
    #[error("no input device found")]
    NoInputDevice,

    #[error("input device '{0}' not found")]
    DeviceNotFound(String),

    #[error("no suitable input configuration: {0}")]
    UnsupportedConfig(String),

    #[error("microphone access failed: {0}")]
    Stream(String),
}

/// Backend-supplied PCM could not be turned into playable audio.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM payload of {len} bytes is not a whole number of {block_align}-byte frames")]
    PartialFrame { len: usize, block_align: usize },

    #[error("PCM payload of {0} bytes does not fit a WAV container")]
    TooLarge(usize),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to encode recorded audio: {0}")]
    Encode(#[from] hound::Error),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no audio output available: {0}")]
    Output(String),

    #[error("could not decode prompt audio: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("backend reported failure: {0}")]
    Unsuccessful(String),

    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error("backend response is missing {0}")]
    MissingField(&'static str),
}

/// The turn could not be handed to the backend or answered by it.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("answer upload failed: {0}")]
    Answer(#[source] BackendError),

    #[error("next question unavailable: {0}")]
    NextQuestion(#[source] BackendError),
}

/// Session-level failures reported to the control client.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("an interview is already in progress")]
    AlreadyRunning,

    #[error("no interview is in progress")]
    NotRunning,

    #[error("interview {0} is already completed")]
    AlreadyCompleted(String),

    #[error("nothing to retry")]
    NothingToRetry,

    #[error("start was cancelled")]
    Cancelled,

    #[error("could not load interview: {0}")]
    Backend(#[from] BackendError),

    #[error("session task has stopped")]
    Closed,
}
