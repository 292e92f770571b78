use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::config::AudioConfig;
use crate::error::MediaAccessError;

/// Source of microphone streams. One stream is held per user turn.
pub trait Microphone: Send + Sync + 'static {
    fn open(&self) -> Result<CaptureStream, MediaAccessError>;
}

/// Releases the underlying capture device exactly once, on `release` or drop.
pub struct CaptureRelease {
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureRelease {
    pub fn new(on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_release: Some(Box::new(on_release)),
        }
    }

    /// A guard with nothing to release.
    pub fn detached() -> Self {
        Self { on_release: None }
    }

    pub fn release(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(on_release) = self.on_release.take() {
            on_release();
        }
    }
}

impl Drop for CaptureRelease {
    fn drop(&mut self) {
        self.run();
    }
}

/// Live microphone stream: mono `f32` chunks in [-1, 1].
pub struct CaptureStream {
    pub sample_rate: u32,
    chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    muted: Arc<AtomicBool>,
    release: CaptureRelease,
}

impl CaptureStream {
    pub fn new(
        sample_rate: u32,
        chunks: mpsc::UnboundedReceiver<Vec<f32>>,
        release: CaptureRelease,
    ) -> Self {
        Self {
            sample_rate,
            chunks,
            muted: Arc::new(AtomicBool::new(false)),
            release,
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn muted_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.muted)
    }

    pub fn split(self) -> (ChunkReceiver, CaptureRelease) {
        (
            ChunkReceiver {
                chunks: self.chunks,
                muted: self.muted,
            },
            self.release,
        )
    }
}

pub struct ChunkReceiver {
    chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    muted: Arc<AtomicBool>,
}

impl ChunkReceiver {
    /// Next chunk, zeroed while muted. `None` once the device side is gone.
    pub async fn recv(&mut self) -> Option<Vec<f32>> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Vec<f32>>> {
        self.chunks
            .poll_recv(cx)
            .map(|chunk| chunk.map(|chunk| self.apply_mute(chunk)))
    }

    /// A chunk that has already arrived, if any.
    pub fn try_recv(&mut self) -> Option<Vec<f32>> {
        let chunk = self.chunks.try_recv().ok()?;
        Some(self.apply_mute(chunk))
    }

    fn apply_mute(&self, mut chunk: Vec<f32>) -> Vec<f32> {
        if self.muted.load(Ordering::Relaxed) {
            chunk.iter_mut().for_each(|s| *s = 0.0);
        }
        chunk
    }
}

/// `cpal` input device. The stream is created and dropped on its own thread
/// because `cpal::Stream` is not `Send` on every host.
pub struct CpalMicrophone {
    device: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalMicrophone {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            device: config.device.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self) -> Result<CaptureStream, MediaAccessError> {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let device = self.device.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        std::thread::Builder::new()
            .name("interviq-capture".to_string())
            .spawn(move || {
                match AudioCapture::open(&device, sample_rate, channels, chunk_tx) {
                    Ok(capture) => {
                        let _ = ready_tx.send(Ok(capture.sample_rate));
                        // Blocks until the release guard fires or is dropped.
                        let _ = stop_rx.recv();
                        drop(capture);
                        tracing::info!("Microphone released");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| MediaAccessError::Stream(e.to_string()))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| MediaAccessError::Stream("capture thread exited".to_string()))??;

        let release = CaptureRelease::new(move || {
            let _ = stop_tx.send(());
        });
        Ok(CaptureStream::new(sample_rate, chunk_rx, release))
    }
}

pub struct AudioCapture {
    _stream: Stream,
    pub sample_rate: u32,
}

impl AudioCapture {
    pub fn open(
        device_name: &str,
        sample_rate: u32,
        channels: u16,
        chunk_tx: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Self, MediaAccessError> {
        let host = cpal::default_host();
        let device = Self::select_device(&host, device_name)?;

        tracing::info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let (config, sample_format) = Self::select_config(&device, sample_rate, channels)?;
        let device_channels = config.channels as usize;
        let actual_rate = config.sample_rate.0;

        tracing::info!(
            "Configuring audio stream: {}Hz, {} channel(s), {:?}",
            actual_rate,
            device_channels,
            sample_format
        );

        let error_callback = |err: cpal::StreamError| {
            tracing::error!("Audio stream error: {}", err);
        };

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = chunk_tx.send(downmix(data, device_channels));
                },
                error_callback,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    let _ = chunk_tx.send(downmix(&converted, device_channels));
                },
                error_callback,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0)
                        .collect();
                    let _ = chunk_tx.send(downmix(&converted, device_channels));
                },
                error_callback,
                None,
            ),
            format => {
                return Err(MediaAccessError::UnsupportedConfig(format!(
                    "sample format {:?}",
                    format
                )));
            }
        }
        .map_err(|e| MediaAccessError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MediaAccessError::Stream(e.to_string()))?;

        tracing::info!("Audio capture started");
        Ok(Self {
            _stream: stream,
            sample_rate: actual_rate,
        })
    }

    fn select_device(host: &cpal::Host, device_name: &str) -> Result<Device, MediaAccessError> {
        if device_name.is_empty() || device_name == "default" {
            return host
                .default_input_device()
                .ok_or(MediaAccessError::NoInputDevice);
        }

        let mut devices = host
            .input_devices()
            .map_err(|e| MediaAccessError::Stream(e.to_string()))?;
        devices
            .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
            .ok_or_else(|| MediaAccessError::DeviceNotFound(device_name.to_string()))
    }

    fn select_config(
        device: &Device,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(StreamConfig, SampleFormat), MediaAccessError> {
        let supported_configs = device
            .supported_input_configs()
            .map_err(|e| MediaAccessError::UnsupportedConfig(e.to_string()))?;

        for supported in supported_configs {
            tracing::debug!("Supported config: {:?}", supported);
            if supported.channels() == channels
                && supported.min_sample_rate().0 <= sample_rate
                && supported.max_sample_rate().0 >= sample_rate
            {
                let format = supported.sample_format();
                let config: StreamConfig =
                    supported.with_sample_rate(cpal::SampleRate(sample_rate)).into();
                return Ok((config, format));
            }
        }

        // Fall back to whatever the device prefers; chunks are downmixed to mono.
        let default = device
            .default_input_config()
            .map_err(|e| MediaAccessError::UnsupportedConfig(e.to_string()))?;
        tracing::warn!(
            "No {}Hz/{}ch input config, falling back to device default {:?}",
            sample_rate,
            channels,
            default
        );
        let format = default.sample_format();
        Ok((default.into(), format))
    }
}

/// Averages interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
