pub mod capture;
pub mod pcm;
pub mod playback;
pub mod window;

pub use capture::{
    AudioCapture, CaptureRelease, CaptureStream, ChunkReceiver, CpalMicrophone, Microphone,
};
pub use pcm::{pcm_to_wav, PcmFormat};
pub use playback::{Playback, PromptPlayer, RodioPlayer};
pub use window::AnalysisWindow;

use std::fmt;
use std::sync::Arc;

pub const WAV_MIME: &str = "audio/wav";

/// Self-contained encoded audio held in memory. Cloning shares the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    bytes: Arc<[u8]>,
    mime: &'static str,
}

impl EncodedAudio {
    pub fn new(bytes: Vec<u8>, mime: &'static str) -> Self {
        Self {
            bytes: bytes.into(),
            mime,
        }
    }

    pub fn wav(bytes: Vec<u8>) -> Self {
        Self::new(bytes, WAV_MIME)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for EncodedAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedAudio")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}
