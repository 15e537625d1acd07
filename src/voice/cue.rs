//! Short synthesized tones: recording cues and the unlock probe

use super::codec::AudioBuffer;

/// Sample rate used for generated tones
pub const CUE_SAMPLE_RATE: u32 = 24000;

/// Audible feedback around recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Rising blip when capture begins
    Start,
    /// Falling blip when capture ends
    Stop,
}

impl Cue {
    /// Render the cue as a mono buffer
    #[must_use]
    pub fn buffer(self) -> AudioBuffer {
        let (from, to) = match self {
            Self::Start => (660.0, 990.0),
            Self::Stop => (990.0, 660.0),
        };
        sweep(from, to, 0.09, 0.25)
    }
}

/// Near-silent tone used to confirm the output is actually running
#[must_use]
pub fn probe_tone() -> AudioBuffer {
    sweep(440.0, 440.0, 0.05, 0.0001)
}

/// Linear frequency sweep with a short fade in and out
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sweep(from_hz: f32, to_hz: f32, seconds: f32, amplitude: f32) -> AudioBuffer {
    let rate = CUE_SAMPLE_RATE as f32;
    let total = (rate * seconds) as usize;
    let fade = (total / 10).max(1);
    let mut phase = 0.0f32;

    let samples = (0..total)
        .map(|i| {
            let progress = i as f32 / total as f32;
            let freq = (to_hz - from_hz).mul_add(progress, from_hz);
            phase += 2.0 * std::f32::consts::PI * freq / rate;

            let envelope = if i < fade {
                i as f32 / fade as f32
            } else if i >= total - fade {
                (total - i) as f32 / fade as f32
            } else {
                1.0
            };
            phase.sin() * amplitude * envelope
        })
        .collect();

    AudioBuffer::new(samples, CUE_SAMPLE_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cues_are_short_and_bounded() {
        for cue in [Cue::Start, Cue::Stop] {
            let buffer = cue.buffer();
            assert!(!buffer.is_empty());
            assert!(buffer.duration().as_millis() <= 100);
            assert!(buffer.samples().iter().all(|s| s.abs() <= 0.25));
        }
    }

    #[test]
    fn probe_is_inaudible() {
        let probe = probe_tone();
        assert_eq!(probe.duration().as_millis(), 50);
        assert!(probe.samples().iter().all(|s| s.abs() <= 0.0001));
    }
}
