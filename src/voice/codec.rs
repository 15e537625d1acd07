//! Audio encoding helpers: base64, PCM16 decoding and WAV clips

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Sample rate of synthesized speech (PCM16 mono)
pub const TTS_SAMPLE_RATE: u32 = 24000;

/// Decoded mono audio ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap mono samples at the given rate
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Mono samples in [-1.0, 1.0]
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Always one; buffers are mono
    #[must_use]
    pub const fn channels(&self) -> u16 {
        1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Play length at normal speed
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Encode arbitrary bytes as standard padded base64
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 little-endian PCM16 mono into a playable buffer
///
/// Each sample is divided by 32768 so output lies in [-1.0, 1.0].
/// A trailing odd byte is ignored.
///
/// # Errors
///
/// Returns error if the input is not valid base64
pub fn decode_pcm_to_buffer(data: &str, sample_rate: u32) -> Result<AudioBuffer> {
    let bytes = STANDARD.decode(data.trim())?;
    Ok(pcm16_to_buffer(&bytes, sample_rate))
}

/// Interpret raw little-endian PCM16 bytes as a mono buffer
#[must_use]
pub fn pcm16_to_buffer(bytes: &[u8], sample_rate: u32) -> AudioBuffer {
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();
    AudioBuffer::new(samples, sample_rate)
}

/// Convert f32 samples to WAV bytes for the analysis request
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Codec(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Codec(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Codec(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
