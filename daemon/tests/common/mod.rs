// Common test helpers for interviqd tests
//
// This module provides:
// - Scripted stand-ins for the microphone, speaker and interview backend
// - Polling helpers for the session task
// - Prompts and output formatting for hardware tests
#![allow(dead_code)]

use base64::Engine;
use interviqd::audio::{CaptureRelease, CaptureStream, Playback};
use interviqd::backend::{
    AiUtterance, ConversationSnapshot, InterviewDetails, NextQuestion,
};
use interviqd::error::{BackendError, MediaAccessError, PlaybackError};
use interviqd::session::Completion;
use interviqd::{EncodedAudio, InterviewBackend, Microphone, PromptPlayer, SessionHandle};
use shared::SessionStatus;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const CHUNK_MS: u64 = 100;
pub const SAMPLE_RATE: u32 = 16000;

/// Speaks at a steady level for `speech`, then stays silent until released.
pub struct ScriptedMicrophone {
    speech: Duration,
    level: f32,
    open_delay: Duration,
    failures_left: AtomicUsize,
    pub opened: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

impl ScriptedMicrophone {
    pub fn new(speech: Duration) -> Self {
        Self {
            speech,
            level: 0.3,
            open_delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The next `count` opens fail as if no device were present.
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Blocks the opening thread for `delay`, like a slow audio driver.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Microphone for ScriptedMicrophone {
    fn open(&self) -> Result<CaptureStream, MediaAccessError> {
        std::thread::sleep(self.open_delay);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MediaAccessError::NoInputDevice);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let chunk_len = (SAMPLE_RATE as u64 * CHUNK_MS / 1000) as usize;
        let speech_chunks = self.speech.as_millis() as u64 / CHUNK_MS;
        let level = self.level;

        let feeder = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(CHUNK_MS));
            let mut sent = 0u64;
            loop {
                ticker.tick().await;
                let sample = if sent < speech_chunks { level } else { 0.0 };
                if tx.send(vec![sample; chunk_len]).is_err() {
                    break;
                }
                sent += 1;
            }
        });

        let released = Arc::clone(&self.released);
        let release = CaptureRelease::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
            feeder.abort();
        });
        Ok(CaptureStream::new(SAMPLE_RATE, rx, release))
    }
}

/// Plays every clip for a fixed time.
pub struct ScriptedPlayer {
    clip_length: Duration,
    open_delay: Duration,
    pub played: Mutex<Vec<usize>>,
    pub stopped: Arc<AtomicUsize>,
}

impl ScriptedPlayer {
    pub fn new(clip_length: Duration) -> Self {
        Self {
            clip_length,
            open_delay: Duration::ZERO,
            played: Mutex::new(Vec::new()),
            stopped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn played(&self) -> Vec<usize> {
        self.played.lock().unwrap().clone()
    }
}

impl PromptPlayer for ScriptedPlayer {
    fn play(&self, audio: &EncodedAudio) -> Result<Playback, PlaybackError> {
        std::thread::sleep(self.open_delay);
        self.played.lock().unwrap().push(audio.len());

        let (finished_tx, finished_rx) = oneshot::channel();
        let clip_length = self.clip_length;
        let clip = tokio::spawn(async move {
            tokio::time::sleep(clip_length).await;
            let _ = finished_tx.send(());
        });

        let stopped = Arc::clone(&self.stopped);
        Ok(Playback::new(finished_rx, move || {
            stopped.fetch_add(1, Ordering::SeqCst);
            clip.abort();
        }))
    }
}

/// PCM bytes of every scripted AI utterance.
pub const PROMPT_PCM_LEN: usize = 4800;

pub fn prompt_audio() -> String {
    base64::engine::general_purpose::STANDARD.encode(vec![0u8; PROMPT_PCM_LEN])
}

/// In-memory interview service that finishes once `question_count`
/// reaches `max_questions`.
#[derive(Default)]
pub struct ScriptedBackend {
    pub snapshot: ConversationSnapshot,
    pub max_questions: u32,
    submit_failures_left: AtomicUsize,
    pub submissions: Mutex<Vec<usize>>,
    pub fetches: Mutex<Vec<u32>>,
    pub timer_logs: Mutex<Vec<(u64, Option<Completion>)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            max_questions: 10,
            ..Self::default()
        }
    }

    pub fn with_snapshot(mut self, snapshot: ConversationSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn failing_submissions(self, count: usize) -> Self {
        self.submit_failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn submissions(&self) -> Vec<usize> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<u32> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn timer_logs(&self) -> Vec<(u64, Option<Completion>)> {
        self.timer_logs.lock().unwrap().clone()
    }
}

impl InterviewBackend for ScriptedBackend {
    async fn conversation(&self, _id: &str) -> Result<ConversationSnapshot, BackendError> {
        Ok(self.snapshot.clone())
    }

    async fn interview_details(&self, _id: &str) -> Result<InterviewDetails, BackendError> {
        Ok(InterviewDetails {
            domain: Some("Software Engineering".to_string()),
            interview_type: Some("Technical".to_string()),
            mode: Some("voice".to_string()),
        })
    }

    async fn first_prompt(
        &self,
        _id: &str,
        _details: &InterviewDetails,
        user_name: &str,
    ) -> Result<AiUtterance, BackendError> {
        Ok(AiUtterance {
            text: Some(format!("Welcome {}, tell me about yourself.", user_name)),
            audio_base64: Some(prompt_audio()),
        })
    }

    async fn submit_answer(&self, _id: &str, answer: &EncodedAudio) -> Result<(), BackendError> {
        self.submissions.lock().unwrap().push(answer.len());
        let failing = self
            .submit_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackendError::Unsuccessful("upload failed".to_string()));
        }
        Ok(())
    }

    async fn next_question(
        &self,
        _id: &str,
        question_count: u32,
    ) -> Result<NextQuestion, BackendError> {
        self.fetches.lock().unwrap().push(question_count);
        let finished = question_count >= self.max_questions;
        let text = if finished {
            "Thank you, that concludes the interview.".to_string()
        } else {
            format!("Question {}", question_count + 1)
        };
        Ok(NextQuestion {
            utterance: AiUtterance {
                text: Some(text),
                audio_base64: Some(prompt_audio()),
            },
            interview_finished: finished,
        })
    }

    async fn log_timer(
        &self,
        _id: &str,
        elapsed_seconds: u64,
        completion: Option<Completion>,
    ) -> Result<(), BackendError> {
        self.timer_logs
            .lock()
            .unwrap()
            .push((elapsed_seconds, completion));
        Ok(())
    }
}

/// Polls the session until `done` holds, giving up after ten virtual minutes.
pub async fn wait_for(
    session: &SessionHandle,
    mut done: impl FnMut(&SessionStatus) -> bool,
) -> SessionStatus {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let status = session.status().await.expect("session task is running");
            if done(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("session never reached the expected status")
}

/// Ask user to confirm an action
pub fn confirm_action(prompt: &str) -> bool {
    print!(
        "\n[CONFIRM] {}\nPress 'y' to confirm, any other key to skip: ",
        prompt
    );
    io::stdout().flush().unwrap();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    input.trim().to_lowercase() == "y"
}

/// Print a section header
pub fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("  {}", title);
    println!("{}", "=".repeat(60));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\n✓ {}", message);
}

/// Print an error message
pub fn print_error(message: &str) {
    println!("\n✗ {}", message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("\nℹ {}", message);
}
