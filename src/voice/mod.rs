//! Voice processing module
//!
//! Handles microphone capture, level metering, clip encoding and playback.
//! Device backends ([`AudioCapture`], [`AudioPlayback`]) sit behind the
//! [`Microphone`] and [`AudioOutput`] traits.

mod capture;
mod codec;
mod coordinator;
mod cue;
mod meter;
mod output;
mod playback;
mod recorder;
mod scheduler;

pub use capture::{AudioCapture, SAMPLE_RATE};
pub use codec::{
    AudioBuffer, TTS_SAMPLE_RATE, decode_pcm_to_buffer, encode_base64, pcm16_to_buffer,
    samples_to_wav,
};
pub use coordinator::{
    GestureOutcome, MAX_PENDING_ATTEMPTS, PENDING_RETRY_DELAY, PlaybackCoordinator,
    SHADOW_RESTART_DELAY, SessionState, SharedState, UNLOCK_TIMEOUT,
};
pub use cue::{CUE_SAMPLE_RATE, Cue, probe_tone};
pub use meter::{
    ANALYSER_WINDOW, CALIBRATION_SAMPLES, LevelSource, MeterState, NoiseFloorCalibrator,
    POLL_INTERVAL, VoiceActivityMeter, frequency_bins, mean_amplitude,
};
pub use output::{AudioOutput, OutputState, SourceId, StartedSource};
pub use playback::AudioPlayback;
pub use recorder::{CaptureStream, Clip, Microphone, RecorderState, RecordingController};
pub use scheduler::{TaskKey, TaskScheduler};
