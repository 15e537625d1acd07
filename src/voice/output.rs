//! Audio output abstraction
//!
//! Mirrors a browser audio context: the output may be suspended until it is
//! explicitly resumed, plays at most one tracked voice source at a time and can
//! mix short fire-and-forget effects (cues, probe tones) on top.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::codec::AudioBuffer;
use crate::Result;

/// Running state of an audio output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Not producing sound until resumed
    Suspended,
    /// Producing sound
    Running,
    /// Torn down
    Closed,
}

/// Identifier of a started voice source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// A started voice source
///
/// `ended` resolves with `Ok(())` when playback completes naturally. If the
/// source is stopped early the sender is dropped and `ended` resolves with an
/// error instead.
#[derive(Debug)]
pub struct StartedSource {
    pub id: SourceId,
    pub ended: oneshot::Receiver<()>,
}

/// Audio output device
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Current state without side effects
    fn state(&self) -> OutputState;

    /// Try to move to [`OutputState::Running`], returning the resulting state
    async fn resume(&self) -> OutputState;

    /// Start `buffer` as the voice source at `rate` (1.0 = normal speed)
    ///
    /// # Errors
    ///
    /// Returns error if the output is not running or the device fails
    fn start(&self, buffer: Arc<AudioBuffer>, rate: f32) -> Result<StartedSource>;

    /// Stop a voice source early; unknown ids are ignored
    fn stop(&self, id: SourceId);

    /// Mix a short effect over whatever is playing
    ///
    /// The receiver resolves when the effect has finished.
    ///
    /// # Errors
    ///
    /// Returns error if the output is not running
    fn play_effect(&self, buffer: &AudioBuffer) -> Result<oneshot::Receiver<()>>;
}
