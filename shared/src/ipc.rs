use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

const SOCKET_NAME: &str = "interviqd.sock";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start (or resume) the voice interview with the given backend id.
    Start(String),
    End,
    Mute,
    Unmute,
    Retry,
    Status,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Error(String),
    Status(SessionStatus),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub interview_id: Option<String>,
    pub state: String,
    pub question_count: u32,
    pub max_questions: u32,
    pub elapsed_seconds: u64,
    pub finished: bool,
    pub muted: bool,
    pub audio_level: f32,
    pub last_error: Option<String>,
}

impl SessionStatus {
    pub fn idle(max_questions: u32) -> Self {
        Self {
            interview_id: None,
            state: "Idle".to_string(),
            question_count: 0,
            max_questions,
            elapsed_seconds: 0,
            finished: false,
            muted: false,
            audio_level: 0.0,
            last_error: None,
        }
    }
}

/// Renders a second counter as `mm:ss`, minutes are not wrapped at the hour.
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Control socket location, shared by the daemon and the CLI.
/// Uses the XDG runtime directory if available, falls back to /tmp.
pub fn socket_path() -> PathBuf {
    match dirs::runtime_dir() {
        Some(runtime_dir) => runtime_dir.join(SOCKET_NAME),
        None => PathBuf::from("/tmp").join(SOCKET_NAME),
    }
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused: is interviqd running?")]
    ConnectionRefused,

    #[error("Connection timeout")]
    Timeout,
}
