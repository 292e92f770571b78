use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::audio::EncodedAudio;
use crate::recorder::RecordedAnswer;
use crate::vad::EndOfTurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AiPlaying,
    /// Between the end of AI audio and the start of capture.
    UserListeningWindow,
    UserRecording,
    Submitting,
    AwaitingAiResponse,
    Finished,
    Error,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Ai,
    User,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub index: u32,
    pub speaker: Speaker,
    pub audio: Option<EncodedAudio>,
    pub text: Option<String>,
    pub finished: bool,
}

/// Completion flag sent with the timer log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Incomplete,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::Incomplete => "incomplete",
        }
    }
}

/// An AI utterance: the text and, when it decoded, its audio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub text: Option<String>,
    pub audio: Option<EncodedAudio>,
}

/// Where a session starts: the prompt to play and the counters to resume from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Opening {
    pub prompt: Prompt,
    pub question_count: u32,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiReply {
    pub prompt: Prompt,
    pub interview_finished: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailedStage {
    Capture,
    Submission(RecordedAnswer),
    AiResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Start(Opening),
    PlaybackEnded {
        turn: u32,
    },
    RecordingFailed {
        turn: u32,
        reason: String,
    },
    AnswerRecorded {
        turn: u32,
        answer: RecordedAnswer,
        reason: EndOfTurn,
    },
    SubmissionAccepted,
    SubmissionFailed {
        reason: String,
    },
    AiReplied(AiReply),
    AiReplyFailed {
        reason: String,
    },
    End,
    Retry,
    SetMuted(bool),
}

/// Side effects requested by a transition, executed by the session runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// `None` audio means nothing playable: treat playback as already ended.
    PlayPrompt {
        turn: u32,
        audio: Option<EncodedAudio>,
    },
    StopPlayback,
    StartRecording {
        turn: u32,
        muted: bool,
    },
    DiscardRecording,
    SubmitAnswer {
        answer: RecordedAnswer,
    },
    FetchNextQuestion {
        question_count: u32,
    },
    LogTimer {
        elapsed_seconds: u64,
        completion: Option<Completion>,
    },
    SetMuted(bool),
}

/// Monotonic interview timer that can be paused and reset.
#[derive(Debug, Clone, Default)]
pub struct SessionClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl SessionClock {
    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            accumulated: Duration::from_secs(seconds),
            running_since: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += now.saturating_duration_since(since);
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = None;
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let running = self
            .running_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        self.accumulated + running
    }
}

/// Hard upper bound on questions per interview.
pub const MAX_QUESTIONS: u32 = 10;

/// Client-side view of one voice interview. All mutation goes through
/// [`InterviewSession::handle`].
#[derive(Debug)]
pub struct InterviewSession {
    interview_id: String,
    state: TurnState,
    question_count: u32,
    max_questions: u32,
    finished: bool,
    muted: bool,
    clock: SessionClock,
    turns: Vec<Turn>,
    ai_turn: Option<u32>,
    user_turn: Option<u32>,
    pending_answer: Option<RecordedAnswer>,
    failed: Option<FailedStage>,
    last_error: Option<String>,
}

impl InterviewSession {
    /// `max_questions` is clamped to `1..=MAX_QUESTIONS`.
    pub fn new(interview_id: impl Into<String>, max_questions: u32) -> Self {
        Self {
            interview_id: interview_id.into(),
            state: TurnState::Idle,
            question_count: 0,
            max_questions: max_questions.clamp(1, MAX_QUESTIONS),
            finished: false,
            muted: false,
            clock: SessionClock::default(),
            turns: Vec::new(),
            ai_turn: None,
            user_turn: None,
            pending_answer: None,
            failed: None,
            last_error: None,
        }
    }

    pub fn interview_id(&self) -> &str {
        &self.interview_id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn question_count(&self) -> u32 {
        self.question_count
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn elapsed_seconds(&self, now: Instant) -> u64 {
        self.clock.elapsed(now).as_secs()
    }

    pub fn is_timer_running(&self) -> bool {
        self.clock.is_running()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn failed_stage(&self) -> Option<&FailedStage> {
        self.failed.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn handle(&mut self, event: SessionEvent, now: Instant) -> Vec<Effect> {
        match event {
            SessionEvent::Start(opening) => self.on_start(opening, now),
            SessionEvent::PlaybackEnded { turn } => self.on_playback_ended(turn),
            SessionEvent::RecordingFailed { turn, reason } => {
                self.on_recording_failed(turn, reason, now)
            }
            SessionEvent::AnswerRecorded {
                turn,
                answer,
                reason,
            } => self.on_answer_recorded(turn, answer, reason),
            SessionEvent::SubmissionAccepted => self.on_submission_accepted(),
            SessionEvent::SubmissionFailed { reason } => self.on_submission_failed(reason, now),
            SessionEvent::AiReplied(reply) => self.on_ai_replied(reply, now),
            SessionEvent::AiReplyFailed { reason } => self.on_ai_reply_failed(reason, now),
            SessionEvent::End => self.on_end(now),
            SessionEvent::Retry => self.on_retry(now),
            SessionEvent::SetMuted(muted) => {
                self.muted = muted;
                vec![Effect::SetMuted(muted)]
            }
        }
    }

    fn on_start(&mut self, opening: Opening, now: Instant) -> Vec<Effect> {
        if self.state != TurnState::Idle {
            warn!("Start ignored in state {}", self.state);
            return Vec::new();
        }

        self.question_count = opening.question_count.min(self.max_questions);
        self.finished = false;
        self.failed = None;
        self.last_error = None;
        self.clock = SessionClock::from_seconds(opening.elapsed_seconds);
        self.clock.start(now);

        info!(
            "Interview {} starting at question {}",
            self.interview_id, self.question_count
        );
        let turn = self.open_ai_turn(opening.prompt.clone());
        self.transition(TurnState::AiPlaying);
        vec![Effect::PlayPrompt {
            turn,
            audio: opening.prompt.audio,
        }]
    }

    fn on_playback_ended(&mut self, turn: u32) -> Vec<Effect> {
        if self.ai_turn != Some(turn) {
            debug!("Ignoring playback end for stale turn {}", turn);
            return Vec::new();
        }
        self.finish_turn(turn);

        if self.finished || self.state != TurnState::AiPlaying {
            debug!(
                "Playback ended in state {}, not starting a recording",
                self.state
            );
            return Vec::new();
        }

        self.transition(TurnState::UserListeningWindow);
        let user_turn = self.push_turn(Speaker::User, Prompt::default());
        self.user_turn = Some(user_turn);
        self.transition(TurnState::UserRecording);

        vec![Effect::StartRecording {
            turn: user_turn,
            muted: self.muted,
        }]
    }

    fn on_recording_failed(&mut self, turn: u32, reason: String, now: Instant) -> Vec<Effect> {
        if self.state != TurnState::UserRecording || self.user_turn != Some(turn) {
            debug!("Ignoring recording failure for turn {}", turn);
            return Vec::new();
        }

        self.fail(FailedStage::Capture, reason, now);
        vec![Effect::DiscardRecording]
    }

    fn on_answer_recorded(
        &mut self,
        turn: u32,
        answer: RecordedAnswer,
        reason: EndOfTurn,
    ) -> Vec<Effect> {
        if self.state != TurnState::UserRecording || self.user_turn != Some(turn) {
            debug!("Discarding answer for turn {} in state {}", turn, self.state);
            return Vec::new();
        }

        info!(
            "Answer for turn {} recorded ({:?}, {} ms)",
            turn, reason, answer.duration_ms
        );
        if let Some(entry) = self.turns.get_mut(turn as usize) {
            entry.audio = Some(answer.audio.clone());
            entry.finished = true;
        }

        self.pending_answer = Some(answer.clone());
        self.transition(TurnState::Submitting);
        vec![Effect::SubmitAnswer { answer }]
    }

    fn on_submission_accepted(&mut self) -> Vec<Effect> {
        if self.state != TurnState::Submitting {
            debug!("Ignoring submission result in state {}", self.state);
            return Vec::new();
        }

        self.pending_answer = None;
        self.transition(TurnState::AwaitingAiResponse);
        vec![Effect::FetchNextQuestion {
            question_count: self.question_count,
        }]
    }

    fn on_submission_failed(&mut self, reason: String, now: Instant) -> Vec<Effect> {
        if self.state != TurnState::Submitting {
            debug!("Ignoring submission failure in state {}", self.state);
            return Vec::new();
        }

        match self.pending_answer.take() {
            Some(answer) => self.fail(FailedStage::Submission(answer), reason, now),
            None => self.fail(FailedStage::Capture, reason, now),
        }
        Vec::new()
    }

    fn on_ai_replied(&mut self, reply: AiReply, now: Instant) -> Vec<Effect> {
        if self.state != TurnState::AwaitingAiResponse {
            debug!("Ignoring AI reply in state {}", self.state);
            return Vec::new();
        }

        self.question_count = (self.question_count + 1).min(self.max_questions);
        let turn = self.open_ai_turn(reply.prompt.clone());

        if reply.interview_finished {
            self.finished = true;
            let elapsed_seconds = self.elapsed_seconds(now);
            self.clock.reset();
            self.transition(TurnState::Finished);
            info!(
                "Interview {} finished after {}s",
                self.interview_id, elapsed_seconds
            );
            return vec![
                Effect::StopPlayback,
                Effect::PlayPrompt {
                    turn,
                    audio: reply.prompt.audio,
                },
                Effect::LogTimer {
                    elapsed_seconds,
                    completion: None,
                },
            ];
        }

        self.transition(TurnState::AiPlaying);
        vec![Effect::PlayPrompt {
            turn,
            audio: reply.prompt.audio,
        }]
    }

    fn on_ai_reply_failed(&mut self, reason: String, now: Instant) -> Vec<Effect> {
        if self.state != TurnState::AwaitingAiResponse {
            debug!("Ignoring AI reply failure in state {}", self.state);
            return Vec::new();
        }

        self.fail(FailedStage::AiResponse, reason, now);
        Vec::new()
    }

    fn on_end(&mut self, now: Instant) -> Vec<Effect> {
        let elapsed_seconds = self.elapsed_seconds(now);
        self.clock.reset();
        self.pending_answer = None;
        self.failed = None;
        self.user_turn = None;

        let next = if self.finished {
            TurnState::Finished
        } else {
            TurnState::Idle
        };
        self.transition(next);

        info!(
            "Interview {} ended by user after {}s",
            self.interview_id, elapsed_seconds
        );
        vec![
            Effect::DiscardRecording,
            Effect::StopPlayback,
            Effect::LogTimer {
                elapsed_seconds,
                completion: Some(Completion::Incomplete),
            },
        ]
    }

    fn on_retry(&mut self, now: Instant) -> Vec<Effect> {
        let Some(stage) = self.failed.take() else {
            debug!("Nothing to retry in state {}", self.state);
            return Vec::new();
        };

        self.last_error = None;
        self.clock.start(now);

        match stage {
            FailedStage::Capture => {
                // Replay the prompt the user was answering, then record again.
                let Some(turn) = self.ai_turn else {
                    self.transition(TurnState::Idle);
                    return Vec::new();
                };
                let audio = self
                    .turns
                    .get_mut(turn as usize)
                    .and_then(|entry| {
                        entry.finished = false;
                        entry.audio.clone()
                    });
                self.user_turn = None;
                self.transition(TurnState::AiPlaying);
                vec![Effect::PlayPrompt { turn, audio }]
            }
            FailedStage::Submission(answer) => {
                self.pending_answer = Some(answer.clone());
                self.transition(TurnState::Submitting);
                vec![Effect::SubmitAnswer { answer }]
            }
            FailedStage::AiResponse => {
                self.transition(TurnState::AwaitingAiResponse);
                vec![Effect::FetchNextQuestion {
                    question_count: self.question_count,
                }]
            }
        }
    }

    fn fail(&mut self, stage: FailedStage, reason: String, now: Instant) {
        warn!("Interview {} halted: {}", self.interview_id, reason);
        self.clock.pause(now);
        self.failed = Some(stage);
        self.last_error = Some(reason);
        self.transition(TurnState::Error);
    }

    fn open_ai_turn(&mut self, prompt: Prompt) -> u32 {
        let turn = self.push_turn(Speaker::Ai, prompt);
        self.ai_turn = Some(turn);
        self.user_turn = None;
        turn
    }

    fn push_turn(&mut self, speaker: Speaker, prompt: Prompt) -> u32 {
        let index = self.turns.len() as u32;
        self.turns.push(Turn {
            index,
            speaker,
            audio: prompt.audio,
            text: prompt.text,
            finished: false,
        });
        index
    }

    fn finish_turn(&mut self, turn: u32) {
        if let Some(entry) = self.turns.get_mut(turn as usize) {
            entry.finished = true;
        }
    }

    fn transition(&mut self, to: TurnState) {
        if self.state != to {
            info!("State transition: {} → {}", self.state, to);
            self.state = to;
        }
    }
}
