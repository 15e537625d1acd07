//! Recording session controller
//!
//! Owns the capture lifecycle (`Idle -> Recording -> Finalizing -> Idle`) and
//! turns one session's buffered chunks into a single [`Clip`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::codec::{encode_base64, samples_to_wav};
use super::cue::Cue;
use super::meter::{LevelSource, VoiceActivityMeter};
use super::output::AudioOutput;
use crate::Result;

/// Microphone access
pub trait Microphone: Send + Sync {
    /// Request access and open a capture stream
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PermissionDenied`] when access is refused
    fn open(&self) -> Result<Box<dyn CaptureStream>>;
}

/// A live capture stream
pub trait CaptureStream: Send {
    /// Capture sample rate
    fn sample_rate(&self) -> u32;

    /// Analyser reading the same stream
    fn level_source(&self) -> Box<dyn LevelSource>;

    /// Stop capture, release the device and hand back buffered chunks
    fn finish(self: Box<Self>) -> Vec<Vec<f32>>;
}

/// One finalized recording, ready for transmission
#[derive(Debug, Clone)]
pub struct Clip {
    /// WAV-encoded mono PCM16
    pub wav: Vec<u8>,
    pub sample_rate: u32,
    /// Length of the captured audio
    pub duration: Duration,
    /// Wall time between start and stop
    pub elapsed: Duration,
}

impl Clip {
    /// MIME type of [`Clip::wav`]
    pub const MIME_TYPE: &'static str = "audio/wav";

    #[must_use]
    pub fn to_base64(&self) -> String {
        encode_base64(&self.wav)
    }
}

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Finalizing,
}

struct Session {
    stream: Box<dyn CaptureStream>,
    started_at: Instant,
}

/// Controls microphone capture sessions
pub struct RecordingController {
    microphone: Arc<dyn Microphone>,
    cues: Option<Arc<dyn AudioOutput>>,
    meter: VoiceActivityMeter,
    state: RecorderState,
    session: Option<Session>,
}

impl RecordingController {
    /// `cues` plays start/stop blips when set
    #[must_use]
    pub fn new(microphone: Arc<dyn Microphone>, cues: Option<Arc<dyn AudioOutput>>) -> Self {
        Self {
            microphone,
            cues,
            meter: VoiceActivityMeter::new(true),
            state: RecorderState::Idle,
            session: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> RecorderState {
        self.state
    }

    #[must_use]
    pub const fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording)
    }

    /// Live meter levels
    #[must_use]
    pub fn levels(&self) -> watch::Receiver<f32> {
        self.meter.subscribe()
    }

    /// Toggle noise calibration for future sessions
    pub const fn set_noise_calibration(&mut self, enabled: bool) {
        self.meter.set_calibration(enabled);
    }

    /// Enable or disable audible cues
    pub fn set_cues(&mut self, cues: Option<Arc<dyn AudioOutput>>) {
        self.cues = cues;
    }

    /// Open the microphone and begin buffering
    ///
    /// A call while already recording is ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened; the controller stays idle
    pub fn start(&mut self) -> Result<()> {
        if self.state != RecorderState::Idle {
            tracing::debug!(state = ?self.state, "start ignored, recorder busy");
            return Ok(());
        }

        let stream = self.microphone.open().inspect_err(|e| {
            tracing::warn!(error = %e, "microphone unavailable");
        })?;

        self.play_cue(Cue::Start);
        self.meter.start(stream.level_source());
        self.session = Some(Session {
            stream,
            started_at: Instant::now(),
        });
        self.state = RecorderState::Recording;
        tracing::info!("recording started");
        Ok(())
    }

    /// Stop capture and return the finished clip
    ///
    /// Returns `Ok(None)` when idle or when nothing was captured.
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be encoded
    pub fn stop(&mut self) -> Result<Option<Clip>> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };

        let sample_rate = session.stream.sample_rate();
        let chunks = session.stream.finish();
        self.meter.stop();
        self.play_cue(Cue::Stop);
        self.state = RecorderState::Finalizing;

        let result = assemble(&chunks, sample_rate, session.started_at.elapsed());
        self.state = RecorderState::Idle;

        match &result {
            Ok(Some(clip)) => tracing::info!(
                duration_ms = clip.duration.as_millis(),
                bytes = clip.wav.len(),
                "recording finished"
            ),
            Ok(None) => tracing::debug!("recording discarded, no audio captured"),
            Err(e) => tracing::error!(error = %e, "failed to encode recording"),
        }
        result
    }

    fn play_cue(&self, cue: Cue) {
        if let Some(output) = &self.cues {
            // Cues are best-effort; a suspended output simply stays quiet
            if let Err(e) = output.play_effect(&cue.buffer()) {
                tracing::trace!(error = %e, ?cue, "cue skipped");
            }
        }
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session.stream.finish());
        }
    }
}

/// Flatten chunks into one clip; `None` when empty
fn assemble(chunks: &[Vec<f32>], sample_rate: u32, elapsed: Duration) -> Result<Option<Clip>> {
    let samples: Vec<f32> = chunks.iter().flatten().copied().collect();
    if samples.is_empty() {
        return Ok(None);
    }

    #[allow(clippy::cast_precision_loss)]
    let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(sample_rate.max(1)));
    let wav = samples_to_wav(&samples, sample_rate)?;

    Ok(Some(Clip {
        wav,
        sample_rate,
        duration,
        elapsed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chunks_discard() {
        assert!(assemble(&[], 16000, Duration::ZERO).unwrap().is_none());
        assert!(
            assemble(&[Vec::new(), Vec::new()], 16000, Duration::ZERO)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn chunks_flatten_into_one_clip() {
        let chunks = vec![vec![0.1; 8000], vec![0.2; 8000]];
        let clip = assemble(&chunks, 16000, Duration::from_secs(1)).unwrap().unwrap();

        assert_eq!(clip.duration, Duration::from_secs(1));
        assert_eq!(clip.wav.len(), 44 + 16000 * 2);
        assert!(!clip.to_base64().is_empty());
    }
}
