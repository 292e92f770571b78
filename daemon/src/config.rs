use crate::session::MAX_QUESTIONS;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default = "Config::default")]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub interview: InterviewConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_user_name")]
    pub user_name: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            user_name: default_user_name(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_user_name() -> String {
    "Candidate".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_analysis_window")]
    pub analysis_window: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            analysis_window: default_analysis_window(),
        }
    }
}

fn default_device() -> String {
    "default".to_string()
}
fn default_sample_rate() -> u32 {
    16000
}
fn default_channels() -> u16 {
    1
}
fn default_analysis_window() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VadConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
    #[serde(default = "default_silence_duration")]
    pub silence_duration_ms: u64,
    #[serde(default = "default_max_recording")]
    pub max_recording_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            check_interval_ms: default_check_interval(),
            silence_duration_ms: default_silence_duration(),
            max_recording_ms: default_max_recording(),
        }
    }
}

fn default_threshold() -> f32 {
    0.02
}
fn default_check_interval() -> u64 {
    200
}
fn default_silence_duration() -> u64 {
    3000
}
fn default_max_recording() -> u64 {
    60000
}

/// Format of the raw PCM the backend synthesizes for AI prompts.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PlaybackConfig {
    #[serde(default = "default_pcm_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_bits_per_sample")]
    pub bits_per_sample: u16,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_pcm_sample_rate(),
            channels: default_channels(),
            bits_per_sample: default_bits_per_sample(),
        }
    }
}

fn default_pcm_sample_rate() -> u32 {
    24000
}
fn default_bits_per_sample() -> u16 {
    16
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InterviewConfig {
    #[serde(default = "default_max_questions")]
    pub max_questions: u32,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            max_questions: default_max_questions(),
        }
    }
}

impl InterviewConfig {
    /// Question limit the session runs with, kept within `1..=MAX_QUESTIONS`.
    pub fn question_limit(&self) -> u32 {
        self.max_questions.clamp(1, MAX_QUESTIONS)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_QUESTIONS).contains(&self.max_questions) {
            anyhow::bail!(
                "interview.max_questions must be between 1 and {}, got {}",
                MAX_QUESTIONS,
                self.max_questions
            );
        }
        Ok(())
    }
}

fn default_max_questions() -> u32 {
    MAX_QUESTIONS
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimeoutsConfig {
    #[serde(default = "default_backend_request_timeout")]
    pub backend_request_seconds: u64,
    #[serde(default = "default_socket_operation_timeout")]
    pub socket_operation_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            backend_request_seconds: default_backend_request_timeout(),
            socket_operation_seconds: default_socket_operation_timeout(),
        }
    }
}

impl TimeoutsConfig {
    pub fn backend_request(&self) -> Duration {
        Duration::from_secs(self.backend_request_seconds)
    }

    pub fn socket_operation(&self) -> Duration {
        Duration::from_secs(self.socket_operation_seconds)
    }
}

fn default_backend_request_timeout() -> u64 {
    30
}
fn default_socket_operation_timeout() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            playback: PlaybackConfig::default(),
            interview: InterviewConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

pub fn load_config() -> Result<Config> {
    match get_config_path() {
        Some(config_path) => load_config_from(&config_path),
        None => {
            tracing::warn!("No config directory on this platform, using defaults");
            Ok(Config::default())
        }
    }
}

pub fn load_config_from(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    tracing::info!("Loading config from {:?}", config_path);
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
    config.interview.validate()?;

    tracing::info!("Config loaded successfully");
    Ok(config)
}

fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("interviq").join("config.toml"))
}
