//! Wraps raw PCM from the speech backend in a canonical 44-byte WAV header.
//!
//! Layout (all integers little-endian):
//!
//! | offset | field           | value                                 |
//! |--------|-----------------|---------------------------------------|
//! | 0      | `RIFF`          |                                       |
//! | 4      | chunk size      | 36 + data length                      |
//! | 8      | `WAVE`          |                                       |
//! | 12     | `fmt `          |                                       |
//! | 16     | subchunk1 size  | 16                                    |
//! | 20     | audio format    | 1 (PCM)                               |
//! | 22     | channels        |                                       |
//! | 24     | sample rate     |                                       |
//! | 28     | byte rate       | rate × channels × bits / 8            |
//! | 32     | block align     | channels × bits / 8                   |
//! | 34     | bits per sample |                                       |
//! | 36     | `data`          |                                       |
//! | 40     | subchunk2 size  | data length                           |

use base64::Engine;

use super::EncodedAudio;
use crate::config::PlaybackConfig;
use crate::error::DecodeError;

pub const WAV_HEADER_LEN: usize = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// 16-bit signed mono at 24 kHz, as produced by the interview backend.
    pub const BACKEND_SPEECH: PcmFormat = PcmFormat {
        sample_rate: 24000,
        channels: 1,
        bits_per_sample: 16,
    };

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * self.bits_per_sample as u32 / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::BACKEND_SPEECH
    }
}

impl From<&PlaybackConfig> for PcmFormat {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            bits_per_sample: config.bits_per_sample,
        }
    }
}

/// Decodes a base64 PCM payload and returns it as a playable WAV clip.
pub fn pcm_to_wav(base64_pcm: &str, format: PcmFormat) -> Result<EncodedAudio, DecodeError> {
    let compact: String = base64_pcm
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let pcm = base64::engine::general_purpose::STANDARD.decode(compact)?;
    let wav = wav_from_pcm(&pcm, format)?;

    tracing::debug!(
        "Converted {} PCM bytes to WAV ({} Hz, {} ch, {} bit)",
        pcm.len(),
        format.sample_rate,
        format.channels,
        format.bits_per_sample
    );

    Ok(EncodedAudio::wav(wav))
}

pub fn wav_from_pcm(pcm: &[u8], format: PcmFormat) -> Result<Vec<u8>, DecodeError> {
    let block_align = format.block_align() as usize;
    if block_align > 0 && pcm.len() % block_align != 0 {
        return Err(DecodeError::PartialFrame {
            len: pcm.len(),
            block_align,
        });
    }

    let data_len = u32::try_from(pcm.len())
        .ok()
        .filter(|len| len.checked_add(36).is_some())
        .ok_or(DecodeError::TooLarge(pcm.len()))?;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&format.channels.to_le_bytes());
    wav.extend_from_slice(&format.sample_rate.to_le_bytes());
    wav.extend_from_slice(&format.byte_rate().to_le_bytes());
    wav.extend_from_slice(&format.block_align().to_le_bytes());
    wav.extend_from_slice(&format.bits_per_sample.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);

    Ok(wav)
}
