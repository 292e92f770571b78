use shared::ipc::SessionStatus;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::audio::{CaptureStream, Microphone, Playback, PcmFormat, PromptPlayer};
use crate::backend::InterviewBackend;
use crate::config::Config;
use crate::error::{BackendError, MediaAccessError, PlaybackError, SessionError, SubmissionError};
use crate::recorder::TurnRecorder;
use crate::session::{
    decode_prompt, load_opening, AiReply, Effect, InterviewSession, Opening, SessionEvent,
    TurnState,
};
use crate::vad::{watch_for_end_of_turn, SilenceDetector};

const INPUT_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Request {
    Start {
        interview_id: String,
        reply: Reply<()>,
    },
    End {
        reply: Reply<()>,
    },
    SetMuted {
        muted: bool,
        reply: Reply<()>,
    },
    Retry {
        reply: Reply<()>,
    },
    Status {
        reply: Reply<SessionStatus>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

enum Input {
    Request(Request),
    /// Completion of a task spawned for the session started at `generation`.
    Event {
        generation: u64,
        event: SessionEvent,
    },
    OpeningLoaded {
        generation: u64,
        interview_id: String,
        result: Result<Opening, SessionError>,
        reply: Reply<()>,
    },
    /// A speaker or microphone finished opening on the blocking pool.
    PlaybackOpened {
        op: u64,
        turn: u32,
        result: Result<Playback, PlaybackError>,
    },
    MicrophoneOpened {
        op: u64,
        turn: u32,
        result: Result<CaptureStream, MediaAccessError>,
    },
}

impl Input {
    /// Frees whatever device an undeliverable input holds.
    fn discard(self) {
        match self {
            Input::PlaybackOpened {
                result: Ok(playback),
                ..
            } => playback.stop(),
            Input::MicrophoneOpened {
                result: Ok(stream), ..
            } => drop(stream),
            _ => {}
        }
    }
}

/// Cheap, cloneable front end to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    inputs: mpsc::Sender<Input>,
}

impl SessionHandle {
    pub async fn start(&self, interview_id: impl Into<String>) -> Result<(), SessionError> {
        let interview_id = interview_id.into();
        self.request(|reply| Request::Start {
            interview_id,
            reply,
        })
        .await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.request(|reply| Request::End { reply }).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        self.request(|reply| Request::SetMuted { muted, reply }).await
    }

    pub async fn retry(&self) -> Result<(), SessionError> {
        self.request(|reply| Request::Retry { reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.request(|reply| Request::Status { reply }).await
    }

    /// Releases the microphone and speaker, waits for pending timer logs
    /// and stops the session task.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| Request::Shutdown { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.inputs
            .send(Input::Request(build(reply)))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }
}

/// Owns the interview session and every resource a turn holds: the
/// playing prompt, the open microphone and the end-of-turn watcher.
/// Runs as a single task; spawned work reports back as session events.
pub struct SessionRuntime<B, M, P> {
    backend: Arc<B>,
    microphone: Arc<M>,
    player: Arc<P>,
    config: Config,
    pcm_format: PcmFormat,
    inputs: mpsc::Receiver<Input>,
    feedback: mpsc::WeakSender<Input>,
    generation: u64,
    loading: bool,
    session: Option<InterviewSession>,
    device_ops: u64,
    pending_playback: Option<u64>,
    pending_recording: Option<u64>,
    playback: Option<Playback>,
    playback_waiter: Option<JoinHandle<()>>,
    recorder: Option<Arc<TurnRecorder>>,
    watcher: Option<JoinHandle<()>>,
    timer_logs: Vec<JoinHandle<()>>,
}

impl<B, M, P> SessionRuntime<B, M, P>
where
    B: InterviewBackend,
    M: Microphone,
    P: PromptPlayer,
{
    /// Spawns the session task. It stops on shutdown or once every handle
    /// is dropped.
    pub fn spawn(
        backend: Arc<B>,
        microphone: Arc<M>,
        player: Arc<P>,
        config: Config,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INPUT_QUEUE);
        let runtime = Self {
            backend,
            microphone,
            player,
            pcm_format: PcmFormat::from(&config.playback),
            config,
            inputs: rx,
            feedback: tx.downgrade(),
            generation: 0,
            loading: false,
            session: None,
            device_ops: 0,
            pending_playback: None,
            pending_recording: None,
            playback: None,
            playback_waiter: None,
            recorder: None,
            watcher: None,
            timer_logs: Vec::new(),
        };

        let task = tokio::spawn(runtime.run());
        (SessionHandle { inputs: tx }, task)
    }

    async fn run(mut self) {
        info!("Session task started");

        let mut shutdown = None;
        while let Some(input) = self.inputs.recv().await {
            match input {
                Input::Request(Request::Shutdown { reply }) => {
                    shutdown = Some(reply);
                    break;
                }
                Input::Request(request) => self.on_request(request),
                Input::Event { generation, event } => {
                    if generation == self.generation {
                        self.dispatch(event);
                    } else {
                        debug!("Dropping event from an earlier session: {:?}", event);
                    }
                }
                Input::OpeningLoaded {
                    generation,
                    interview_id,
                    result,
                    reply,
                } => self.on_opening_loaded(generation, interview_id, result, reply),
                Input::PlaybackOpened { op, turn, result } => {
                    self.on_playback_opened(op, turn, result)
                }
                Input::MicrophoneOpened { op, turn, result } => {
                    self.on_microphone_opened(op, turn, result)
                }
            }
        }

        self.inputs.close();
        while let Ok(input) = self.inputs.try_recv() {
            input.discard();
        }
        self.stop_playback();
        self.discard_recording();
        for log in self.timer_logs.drain(..) {
            let _ = log.await;
        }
        info!("Session task stopped");

        if let Some(reply) = shutdown {
            let _ = reply.send(Ok(()));
        }
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Start {
                interview_id,
                reply,
            } => self.begin_start(interview_id, reply),
            Request::End { reply } => {
                let _ = reply.send(self.end());
            }
            Request::SetMuted { muted, reply } => {
                let result = if self.session.is_some() {
                    self.dispatch(SessionEvent::SetMuted(muted));
                    Ok(())
                } else {
                    Err(SessionError::NotRunning)
                };
                let _ = reply.send(result);
            }
            Request::Retry { reply } => {
                let failed = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.state() == TurnState::Error);
                let result = if failed {
                    self.dispatch(SessionEvent::Retry);
                    Ok(())
                } else {
                    Err(SessionError::NothingToRetry)
                };
                let _ = reply.send(result);
            }
            Request::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
            Request::Shutdown { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn begin_start(&mut self, interview_id: String, reply: Reply<()>) {
        let busy = self.loading
            || self
                .session
                .as_ref()
                .is_some_and(|s| !matches!(s.state(), TurnState::Idle | TurnState::Finished));
        if busy {
            let _ = reply.send(Err(SessionError::AlreadyRunning));
            return;
        }

        self.loading = true;
        self.generation += 1;
        let generation = self.generation;
        info!("Loading interview {}", interview_id);

        let Some(feedback) = self.feedback.upgrade() else {
            let _ = reply.send(Err(SessionError::Closed));
            return;
        };
        let backend = Arc::clone(&self.backend);
        let user_name = self.config.backend.user_name.clone();
        let max_questions = self.config.interview.question_limit();
        let format = self.pcm_format;
        let limit = self.config.timeouts.backend_request();

        tokio::spawn(async move {
            let load = load_opening(&*backend, &interview_id, &user_name, max_questions, format);
            let result = match timeout(limit, load).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Backend(BackendError::Timeout(limit))),
            };
            let _ = feedback
                .send(Input::OpeningLoaded {
                    generation,
                    interview_id,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn on_opening_loaded(
        &mut self,
        generation: u64,
        interview_id: String,
        result: Result<Opening, SessionError>,
        reply: Reply<()>,
    ) {
        if generation != self.generation || !self.loading {
            let _ = reply.send(Err(SessionError::Cancelled));
            return;
        }
        self.loading = false;

        match result {
            Ok(opening) => {
                self.stop_playback();
                self.discard_recording();
                self.session = Some(InterviewSession::new(
                    interview_id,
                    self.config.interview.question_limit(),
                ));
                self.dispatch(SessionEvent::Start(opening));
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                error!("Failed to start interview {}: {}", interview_id, e);
                let _ = reply.send(Err(e));
            }
        }
    }

    fn end(&mut self) -> Result<(), SessionError> {
        if self.loading {
            info!("Start cancelled");
            self.loading = false;
            self.generation += 1;
            return Ok(());
        }
        if self.session.is_none() {
            return Err(SessionError::NotRunning);
        }
        self.dispatch(SessionEvent::End);
        Ok(())
    }

    fn status(&self) -> SessionStatus {
        let Some(session) = &self.session else {
            let mut status = SessionStatus::idle(self.config.interview.question_limit());
            if self.loading {
                status.state = "Loading".to_string();
            }
            return status;
        };

        let audio_level = match (&self.recorder, session.state()) {
            (Some(recorder), TurnState::UserRecording) => recorder.level(),
            _ => 0.0,
        };

        SessionStatus {
            interview_id: Some(session.interview_id().to_string()),
            state: session.state().to_string(),
            question_count: session.question_count(),
            max_questions: self.config.interview.question_limit(),
            elapsed_seconds: session.elapsed_seconds(now()),
            finished: session.is_finished(),
            muted: session.is_muted(),
            audio_level,
            last_error: session.last_error().map(str::to_string),
        }
    }

    /// Feeds `event` to the state machine and carries out the effects,
    /// including any events they raise synchronously.
    fn dispatch(&mut self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let Some(session) = self.session.as_mut() else {
                debug!("No session for event {:?}", event);
                return;
            };
            let effects = session.handle(event, now());
            for effect in effects {
                self.execute(effect, &mut queue);
            }
        }
    }

    fn execute(&mut self, effect: Effect, queue: &mut VecDeque<SessionEvent>) {
        match effect {
            Effect::PlayPrompt { turn, audio } => {
                self.stop_playback();
                let Some(audio) = audio else {
                    debug!("Prompt {} has no audio", turn);
                    queue.push_back(SessionEvent::PlaybackEnded { turn });
                    return;
                };

                let op = self.next_device_op();
                self.pending_playback = Some(op);
                let player = Arc::clone(&self.player);
                let failed = Input::PlaybackOpened {
                    op,
                    turn,
                    result: Err(PlaybackError::Output("playback task failed".to_string())),
                };
                self.spawn_device_open(failed, move || Input::PlaybackOpened {
                    op,
                    turn,
                    result: player.play(&audio),
                });
            }
            Effect::StopPlayback => self.stop_playback(),
            Effect::StartRecording { turn, .. } => {
                self.discard_recording();
                let op = self.next_device_op();
                self.pending_recording = Some(op);
                let microphone = Arc::clone(&self.microphone);
                let failed = Input::MicrophoneOpened {
                    op,
                    turn,
                    result: Err(MediaAccessError::Stream("capture task failed".to_string())),
                };
                self.spawn_device_open(failed, move || Input::MicrophoneOpened {
                    op,
                    turn,
                    result: microphone.open(),
                });
            }
            Effect::DiscardRecording => self.discard_recording(),
            Effect::SubmitAnswer { answer } => {
                // The watcher has already stopped the recorder.
                self.recorder = None;
                self.watcher = None;

                let Some(interview_id) = self.interview_id() else {
                    return;
                };
                let backend = Arc::clone(&self.backend);
                let limit = self.config.timeouts.backend_request();
                let generation = self.generation;

                self.spawn_reporting(async move {
                    let submitted =
                        with_timeout(limit, backend.submit_answer(&interview_id, &answer.audio))
                            .await;
                    let event = match submitted {
                        Ok(()) => SessionEvent::SubmissionAccepted,
                        Err(e) => SessionEvent::SubmissionFailed {
                            reason: SubmissionError::Answer(e).to_string(),
                        },
                    };
                    Some((generation, event))
                });
            }
            Effect::FetchNextQuestion { question_count } => {
                let Some(interview_id) = self.interview_id() else {
                    return;
                };
                let backend = Arc::clone(&self.backend);
                let limit = self.config.timeouts.backend_request();
                let format = self.pcm_format;
                let generation = self.generation;

                self.spawn_reporting(async move {
                    let next =
                        with_timeout(limit, backend.next_question(&interview_id, question_count))
                            .await;
                    let event = match next {
                        Ok(next) => SessionEvent::AiReplied(AiReply {
                            prompt: decode_prompt(next.utterance, format),
                            interview_finished: next.interview_finished,
                        }),
                        Err(e) => SessionEvent::AiReplyFailed {
                            reason: SubmissionError::NextQuestion(e).to_string(),
                        },
                    };
                    Some((generation, event))
                });
            }
            Effect::LogTimer {
                elapsed_seconds,
                completion,
            } => {
                let Some(interview_id) = self.interview_id() else {
                    return;
                };
                let backend = Arc::clone(&self.backend);
                let limit = self.config.timeouts.backend_request();

                self.timer_logs.retain(|log| !log.is_finished());
                self.timer_logs.push(tokio::spawn(async move {
                    let logged = with_timeout(
                        limit,
                        backend.log_timer(&interview_id, elapsed_seconds, completion),
                    )
                    .await;
                    match logged {
                        Ok(()) => info!("Logged interview timer: {}s", elapsed_seconds),
                        Err(e) => warn!("Failed to log interview timer: {}", e),
                    }
                }));
            }
            Effect::SetMuted(muted) => {
                if let Some(recorder) = &self.recorder {
                    recorder.set_muted(muted);
                }
                info!("Microphone {}", if muted { "muted" } else { "unmuted" });
            }
        }
    }

    fn on_playback_opened(
        &mut self,
        op: u64,
        turn: u32,
        result: Result<Playback, PlaybackError>,
    ) {
        if self.pending_playback != Some(op) {
            debug!("Prompt {} was stopped while the speaker opened", turn);
            if let Ok(playback) = result {
                playback.stop();
            }
            return;
        }
        self.pending_playback = None;

        match result {
            Ok(mut playback) => {
                if let Some(finished) = playback.take_finished() {
                    let generation = self.generation;
                    self.playback_waiter = self.spawn_reporting(async move {
                        finished
                            .await
                            .ok()
                            .map(|_| (generation, SessionEvent::PlaybackEnded { turn }))
                    });
                }
                self.playback = Some(playback);
            }
            Err(e) => {
                warn!("Could not play prompt {}: {}", turn, e);
                self.dispatch(SessionEvent::PlaybackEnded { turn });
            }
        }
    }

    fn on_microphone_opened(
        &mut self,
        op: u64,
        turn: u32,
        result: Result<CaptureStream, MediaAccessError>,
    ) {
        if self.pending_recording != Some(op) {
            debug!("Recording {} was discarded while the microphone opened", turn);
            return;
        }
        self.pending_recording = None;

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                error!("Microphone unavailable: {}", e);
                self.dispatch(SessionEvent::RecordingFailed {
                    turn,
                    reason: e.to_string(),
                });
                return;
            }
        };

        stream.set_muted(self.session.as_ref().is_some_and(|s| s.is_muted()));
        let recorder = Arc::new(TurnRecorder::start(
            stream,
            self.config.audio.analysis_window,
        ));
        let detector = SilenceDetector::from_config(&self.config.vad);
        let generation = self.generation;
        let watched = Arc::clone(&recorder);

        self.watcher = self.spawn_reporting(async move {
            let reason = watch_for_end_of_turn(detector, || watched.rms()).await;
            let event = match watched.stop() {
                Ok(Some(answer)) => SessionEvent::AnswerRecorded {
                    turn,
                    answer,
                    reason,
                },
                Ok(None) => return None,
                Err(e) => SessionEvent::RecordingFailed {
                    turn,
                    reason: e.to_string(),
                },
            };
            Some((generation, event))
        });
        self.recorder = Some(recorder);
    }

    fn next_device_op(&mut self) -> u64 {
        self.device_ops += 1;
        self.device_ops
    }

    /// Opens a device on the blocking pool so the session task keeps
    /// answering while drivers initialize. `failed` is delivered if the
    /// blocking task dies.
    fn spawn_device_open<F>(&self, failed: Input, open: F)
    where
        F: FnOnce() -> Input + Send + 'static,
    {
        let Some(feedback) = self.feedback.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let input = match tokio::task::spawn_blocking(open).await {
                Ok(input) => input,
                Err(e) => {
                    error!("Device open task failed: {}", e);
                    failed
                }
            };
            if let Err(mpsc::error::SendError(input)) = feedback.send(input).await {
                input.discard();
            }
        });
    }

    /// Runs `work` and feeds the event it yields back into the loop.
    fn spawn_reporting<F>(&self, work: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = Option<(u64, SessionEvent)>> + Send + 'static,
    {
        let feedback = self.feedback.upgrade()?;
        Some(tokio::spawn(async move {
            if let Some((generation, event)) = work.await {
                let _ = feedback.send(Input::Event { generation, event }).await;
            }
        }))
    }

    fn interview_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.interview_id().to_string())
    }

    fn stop_playback(&mut self) {
        self.pending_playback = None;
        if let Some(waiter) = self.playback_waiter.take() {
            waiter.abort();
        }
        if let Some(playback) = self.playback.take() {
            playback.stop();
        }
    }

    fn discard_recording(&mut self) {
        self.pending_recording = None;
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.stop() {
                warn!("Discarded recording could not be finalized: {}", e);
            }
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    request: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    timeout(limit, request)
        .await
        .unwrap_or(Err(BackendError::Timeout(limit)))
}

/// Session clock reading; follows tokio's clock so paused-time tests work.
fn now() -> std::time::Instant {
    Instant::now().into_std()
}
