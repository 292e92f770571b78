use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::EncodedAudio;
use crate::error::PlaybackError;

/// Plays AI prompt audio. Completion is reported through [`Playback`].
pub trait PromptPlayer: Send + Sync + 'static {
    fn play(&self, audio: &EncodedAudio) -> Result<Playback, PlaybackError>;
}

/// A prompt that is playing. Dropping it lets playback run to the end;
/// `stop` cuts it short and suppresses the completion signal.
pub struct Playback {
    finished: Option<oneshot::Receiver<()>>,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl Playback {
    pub fn new(finished: oneshot::Receiver<()>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            finished: Some(finished),
            stop: Some(Box::new(stop)),
        }
    }

    /// Resolves with `Ok(())` when the audio played to its end.
    pub fn take_finished(&mut self) -> Option<oneshot::Receiver<()>> {
        self.finished.take()
    }

    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// Default output device through `rodio`. Each prompt gets its own thread
/// holding the output stream, which is not `Send`.
#[derive(Debug, Default)]
pub struct RodioPlayer;

impl RodioPlayer {
    pub fn new() -> Self {
        Self
    }
}

impl PromptPlayer for RodioPlayer {
    fn play(&self, audio: &EncodedAudio) -> Result<Playback, PlaybackError> {
        let bytes = audio.bytes().to_vec();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_thread = Arc::clone(&stopped);

        std::thread::Builder::new()
            .name("interviq-playback".to_string())
            .spawn(move || {
                let (_stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(output) => output,
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlaybackError::Output(e.to_string())));
                        return;
                    }
                };
                let sink = match rodio::Sink::try_new(&handle) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlaybackError::Output(e.to_string())));
                        return;
                    }
                };
                let source = match rodio::Decoder::new(Cursor::new(bytes)) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlaybackError::Decode(e.to_string())));
                        return;
                    }
                };

                sink.append(source);
                let _ = ready_tx.send(Ok(Arc::clone(&sink)));
                sink.sleep_until_end();

                if !stopped_thread.load(Ordering::SeqCst) {
                    let _ = finished_tx.send(());
                }
            })
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        let sink = ready_rx
            .recv()
            .map_err(|_| PlaybackError::Output("playback thread exited".to_string()))??;

        tracing::debug!("Playing prompt audio ({} bytes)", audio.len());

        Ok(Playback::new(finished_rx, move || {
            stopped.store(true, Ordering::SeqCst);
            sink.stop();
            tracing::debug!("Prompt playback stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_suppresses_completion() {
        let (finished_tx, finished_rx) = oneshot::channel::<()>();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);

        let mut playback = Playback::new(finished_rx, move || {
            flag.store(true, Ordering::SeqCst);
            // the player drops its sender instead of signalling
            drop(finished_tx);
        });

        let finished = playback.take_finished().unwrap();
        playback.stop();

        assert!(stopped.load(Ordering::SeqCst));
        assert!(finished.await.is_err());
    }

    #[tokio::test]
    async fn test_completion_signal() {
        let (finished_tx, finished_rx) = oneshot::channel::<()>();
        let mut playback = Playback::new(finished_rx, || {});

        let finished = playback.take_finished().unwrap();
        assert!(playback.take_finished().is_none());

        finished_tx.send(()).unwrap();
        assert!(finished.await.is_ok());
    }
}
