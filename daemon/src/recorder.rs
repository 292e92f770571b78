use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::{AnalysisWindow, CaptureRelease, CaptureStream, ChunkReceiver, EncodedAudio};
use crate::error::RecordError;

/// One finished user answer, ready for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAnswer {
    pub audio: EncodedAudio,
    pub duration_ms: u64,
}

struct Buffers {
    samples: Vec<f32>,
    window: AnalysisWindow,
}

impl Buffers {
    fn push(&mut self, chunk: &[f32]) {
        self.window.push(chunk);
        self.samples.extend_from_slice(chunk);
    }
}

/// Buffers one user turn from a capture stream. Must be started inside a
/// tokio runtime.
pub struct TurnRecorder {
    buffers: Arc<Mutex<Buffers>>,
    chunks: Arc<Mutex<ChunkReceiver>>,
    release: Mutex<Option<CaptureRelease>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    muted: Arc<AtomicBool>,
    sample_rate: u32,
}

impl TurnRecorder {
    pub fn start(stream: CaptureStream, window_len: usize) -> Self {
        let sample_rate = stream.sample_rate;
        let muted = stream.muted_flag();
        let (chunks, release) = stream.split();
        let chunks = Arc::new(Mutex::new(chunks));

        let buffers = Arc::new(Mutex::new(Buffers {
            samples: Vec::new(),
            window: AnalysisWindow::new(window_len),
        }));

        let sink = Arc::clone(&buffers);
        let source = Arc::clone(&chunks);
        let pump = tokio::spawn(async move {
            // The receiver lock is held while a chunk is buffered so `stop`
            // never sees a chunk in flight.
            let closed = std::future::poll_fn(|cx| {
                let mut chunks = source.lock();
                loop {
                    match chunks.poll_recv(cx) {
                        Poll::Ready(Some(chunk)) => sink.lock().push(&chunk),
                        Poll::Ready(None) => return Poll::Ready(()),
                        Poll::Pending => return Poll::Pending,
                    }
                }
            });
            closed.await;
            debug!("Capture stream closed");
        });

        info!("Recording started at {}Hz", sample_rate);

        Self {
            buffers,
            chunks,
            release: Mutex::new(Some(release)),
            pump: Mutex::new(Some(pump)),
            muted,
            sample_rate,
        }
    }

    /// RMS of the latest analysis window.
    pub fn rms(&self) -> f32 {
        self.buffers.lock().window.rms()
    }

    pub fn level(&self) -> f32 {
        if self.is_stopped() {
            return 0.0;
        }
        self.buffers.lock().window.level()
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffers.lock().samples.len()
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.release.lock().is_none()
    }

    /// Finalizes the turn into a WAV blob. Only the first call yields the
    /// answer; the capture device is released either way.
    pub fn stop(&self) -> Result<Option<RecordedAnswer>, RecordError> {
        let Some(release) = self.release.lock().take() else {
            debug!("Recorder already stopped");
            return Ok(None);
        };
        release.release();

        let samples = {
            let mut chunks = self.chunks.lock();
            self.abort_pump();

            let mut buffers = self.buffers.lock();
            let mut drained = 0;
            while let Some(chunk) = chunks.try_recv() {
                buffers.push(&chunk);
                drained += 1;
            }
            if drained > 0 {
                debug!("Buffered {} trailing chunks", drained);
            }
            buffers.window.clear();
            std::mem::take(&mut buffers.samples)
        };

        let duration_ms = samples.len() as u64 * 1000 / self.sample_rate.max(1) as u64;
        let wav = encode_wav(&samples, self.sample_rate)?;

        info!(
            "Recording finalized: {} ms, {} samples, {} bytes",
            duration_ms,
            samples.len(),
            wav.len()
        );

        Ok(Some(RecordedAnswer {
            audio: EncodedAudio::wav(wav),
            duration_ms,
        }))
    }

    fn abort_pump(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

impl Drop for TurnRecorder {
    fn drop(&mut self) {
        self.abort_pump();
    }
}

/// 16-bit mono WAV of `samples`.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, RecordError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
