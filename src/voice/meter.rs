//! Voice activity meter
//!
//! Polls microphone levels every [`POLL_INTERVAL`], calibrates a noise floor
//! over the first [`CALIBRATION_SAMPLES`] readings and publishes a denoised
//! 0.0-1.0 level for UI feedback. It never gates recording.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Interval between level readings
pub const POLL_INTERVAL: Duration = Duration::from_millis(75);

/// Number of readings averaged into the noise floor
pub const CALIBRATION_SAMPLES: usize = 12;

/// Amplitude that maps to a full-scale meter
const FULL_SCALE: f32 = 100.0;

/// Analyser window, matching a browser analyser with `fftSize = 256`
pub const ANALYSER_WINDOW: usize = 256;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Source of byte-scaled frequency energy (0-255 per bin)
pub trait LevelSource: Send + 'static {
    /// Current frequency-domain energy
    fn frequency_bins(&mut self) -> Vec<u8>;
}

/// Mean amplitude across all bins
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_amplitude(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| u32::from(b)).sum();
    sum as f32 / bins.len() as f32
}

/// Byte-scaled magnitude spectrum of the most recent samples
///
/// Applies a Blackman window, takes a DFT over `samples` and maps each bin's
/// level from [-100 dB, -30 dB] onto [0, 255]. Returns `samples.len() / 2` bins.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn frequency_bins(samples: &[f32]) -> Vec<u8> {
    let n = samples.len();
    if n < 2 {
        return Vec::new();
    }

    let nf = n as f32;
    let windowed: Vec<f32> = samples
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / nf;
            let w = 0.08f32.mul_add((2.0 * x).cos(), 0.5f32.mul_add(-x.cos(), 0.42));
            s * w
        })
        .collect();

    (0..n / 2)
        .map(|k| {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (i, &s) in windowed.iter().enumerate() {
                let angle = 2.0 * std::f32::consts::PI * (k * i) as f32 / nf;
                re += s * angle.cos();
                im -= s * angle.sin();
            }
            let magnitude = re.hypot(im) / nf;
            if magnitude <= 0.0 {
                return 0;
            }
            let db = 20.0 * magnitude.log10();
            let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
            scaled.clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Noise-floor calibration and level normalization
#[derive(Debug, Clone)]
pub struct NoiseFloorCalibrator {
    enabled: bool,
    count: usize,
    sum: f32,
    floor: Option<f32>,
}

impl NoiseFloorCalibrator {
    /// `enabled = false` keeps the floor at zero
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            count: 0,
            sum: 0.0,
            floor: None,
        }
    }

    /// Calibrated floor, once the window has filled
    #[must_use]
    pub const fn floor(&self) -> Option<f32> {
        self.floor
    }

    /// Feed one amplitude reading and return `max(0, amplitude - floor)`
    pub fn adjust(&mut self, amplitude: f32) -> f32 {
        if self.enabled && self.floor.is_none() {
            self.count += 1;
            self.sum += amplitude;
            if self.count == CALIBRATION_SAMPLES {
                #[allow(clippy::cast_precision_loss)]
                let floor = self.sum / CALIBRATION_SAMPLES as f32;
                self.floor = Some(floor);
                tracing::debug!(floor, "noise floor calibrated");
            }
        }

        let floor = if self.enabled {
            self.floor.unwrap_or(0.0)
        } else {
            0.0
        };
        (amplitude - floor).max(0.0)
    }

    /// Feed one reading and return the 0.0-1.0 meter level
    pub fn level(&mut self, amplitude: f32) -> f32 {
        (self.adjust(amplitude) / FULL_SCALE).min(1.0)
    }
}

/// Meter lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterState {
    Idle,
    Sampling,
    Stopped,
}

/// Polls a [`LevelSource`] on a timer and publishes levels on a watch channel
pub struct VoiceActivityMeter {
    calibrate: bool,
    state: MeterState,
    level_tx: watch::Sender<f32>,
    task: Option<JoinHandle<()>>,
}

impl VoiceActivityMeter {
    #[must_use]
    pub fn new(calibrate: bool) -> Self {
        let (level_tx, _) = watch::channel(0.0);
        Self {
            calibrate,
            state: MeterState::Idle,
            level_tx,
            task: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> MeterState {
        self.state
    }

    /// Toggle noise calibration for the next session
    pub const fn set_calibration(&mut self, enabled: bool) {
        self.calibrate = enabled;
    }

    /// Receive level updates
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.level_tx.subscribe()
    }

    /// Begin sampling `source`, replacing any previous session
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&mut self, mut source: Box<dyn LevelSource>) {
        self.stop();

        let level_tx = self.level_tx.clone();
        let mut calibrator = NoiseFloorCalibrator::new(self.calibrate);
        level_tx.send_replace(0.0);

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                let amplitude = mean_amplitude(&source.frequency_bins());
                level_tx.send_replace(calibrator.level(amplitude));
            }
        }));
        self.state = MeterState::Sampling;
        tracing::trace!("voice meter sampling");
    }

    /// Stop polling and release the source; safe to call repeatedly
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.level_tx.send_replace(0.0);
            self.state = MeterState::Stopped;
            tracing::trace!("voice meter stopped");
        }
    }
}

impl Drop for VoiceActivityMeter {
    fn drop(&mut self) {
        self.stop();
    }
}
