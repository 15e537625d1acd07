//! Audio playback to speakers
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated thread and
//! is opened or closed through a command channel. The output callback pulls
//! from a shared [`Mixer`].

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::oneshot;

use super::codec::AudioBuffer;
use super::output::{AudioOutput, OutputState, SourceId, StartedSource};
use crate::{Error, Result};

const STATE_SUSPENDED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// One buffer being read at a fractional position
struct Voice {
    id: SourceId,
    buffer: Arc<AudioBuffer>,
    position: f64,
    step: f64,
    done: Option<oneshot::Sender<()>>,
}

impl Voice {
    fn new(id: SourceId, buffer: Arc<AudioBuffer>, rate: f32, device_rate: u32) -> Self {
        let step = f64::from(rate.max(0.05)) * f64::from(buffer.sample_rate())
            / f64::from(device_rate.max(1));
        Self {
            id,
            buffer,
            position: 0.0,
            step,
            done: None,
        }
    }

    /// Next linearly interpolated sample, `None` once exhausted
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn next_sample(&mut self) -> Option<f32> {
        let samples = self.buffer.samples();
        let index = self.position as usize;
        if index >= samples.len() {
            return None;
        }
        let frac = (self.position - self.position.floor()) as f32;
        let a = samples[index];
        let b = samples.get(index + 1).copied().unwrap_or(a);
        self.position += self.step;
        Some((b - a).mul_add(frac, a))
    }

    fn finish(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Voice slot plus overlaid effects
#[derive(Default)]
struct Mixer {
    voice: Option<Voice>,
    effects: Vec<Voice>,
}

impl Mixer {
    fn next_sample(&mut self) -> f32 {
        let mut out = 0.0;

        if let Some(voice) = self.voice.as_mut() {
            match voice.next_sample() {
                Some(s) => out += s,
                None => {
                    if let Some(voice) = self.voice.take() {
                        voice.finish();
                    }
                }
            }
        }

        let mut i = 0;
        while i < self.effects.len() {
            if let Some(s) = self.effects[i].next_sample() {
                out += s;
                i += 1;
            } else {
                self.effects.swap_remove(i).finish();
            }
        }

        out.clamp(-1.0, 1.0)
    }
}

enum Command {
    Open(std_mpsc::Sender<Result<u32>>),
    Close,
}

/// Plays audio to the default output device
///
/// Starts suspended; the device is opened on the first [`AudioOutput::resume`].
pub struct AudioPlayback {
    mixer: Arc<Mutex<Mixer>>,
    state: Arc<AtomicU8>,
    device_rate: Arc<AtomicU64>,
    next_id: AtomicU64,
    commands: Mutex<std_mpsc::Sender<Command>>,
}

impl AudioPlayback {
    /// Create a playback handle and its device thread
    ///
    /// # Errors
    ///
    /// Returns error if the device thread cannot be spawned
    pub fn new() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let state = Arc::new(AtomicU8::new(STATE_SUSPENDED));
        let (tx, rx) = std_mpsc::channel();

        let thread_mixer = Arc::clone(&mixer);
        let thread_state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || run_device_thread(&rx, &thread_mixer, &thread_state))?;

        Ok(Self {
            mixer,
            state,
            device_rate: Arc::new(AtomicU64::new(0)),
            next_id: AtomicU64::new(1),
            commands: Mutex::new(tx),
        })
    }

    /// Release the device; a later resume reopens it
    pub fn close(&self) {
        if let Ok(commands) = self.commands.lock() {
            let _ = commands.send(Command::Close);
        }
    }

    fn lock_mixer(&self) -> std::sync::MutexGuard<'_, Mixer> {
        self.mixer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn device_rate(&self) -> u32 {
        self.device_rate.load(Ordering::Acquire) as u32
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state() == OutputState::Running {
            Ok(())
        } else {
            Err(Error::Audio("output is not running".to_string()))
        }
    }
}

#[async_trait]
impl AudioOutput for AudioPlayback {
    fn state(&self) -> OutputState {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => OutputState::Running,
            STATE_CLOSED => OutputState::Closed,
            _ => OutputState::Suspended,
        }
    }

    async fn resume(&self) -> OutputState {
        if self.state() == OutputState::Running {
            return OutputState::Running;
        }

        let (reply_tx, reply_rx) = std_mpsc::channel();
        let sent = self
            .commands
            .lock()
            .map(|c| c.send(Command::Open(reply_tx)).is_ok())
            .unwrap_or(false);
        if !sent {
            return self.state();
        }

        let reply = tokio::task::spawn_blocking(move || reply_rx.recv()).await;
        match reply {
            Ok(Ok(Ok(rate))) => {
                self.device_rate.store(u64::from(rate), Ordering::Release);
            }
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "failed to resume audio output"),
            _ => tracing::warn!("audio output thread unavailable"),
        }
        self.state()
    }

    fn start(&self, buffer: Arc<AudioBuffer>, rate: f32) -> Result<StartedSource> {
        self.ensure_running()?;

        let id = SourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (done_tx, done_rx) = oneshot::channel();
        let mut voice = Voice::new(id, buffer, rate, self.device_rate());
        voice.done = Some(done_tx);

        // Replacing drops the old sender, so its listener sees an early stop
        self.lock_mixer().voice = Some(voice);
        tracing::debug!(source = id.0, rate, "playback started");

        Ok(StartedSource { id, ended: done_rx })
    }

    fn stop(&self, id: SourceId) {
        let mut mixer = self.lock_mixer();
        if mixer.voice.as_ref().is_some_and(|v| v.id == id) {
            mixer.voice = None;
            tracing::debug!(source = id.0, "playback stopped");
        }
    }

    fn play_effect(&self, buffer: &AudioBuffer) -> Result<oneshot::Receiver<()>> {
        self.ensure_running()?;

        let (done_tx, done_rx) = oneshot::channel();
        let mut effect = Voice::new(
            SourceId(0),
            Arc::new(buffer.clone()),
            1.0,
            self.device_rate(),
        );
        effect.done = Some(done_tx);
        self.lock_mixer().effects.push(effect);

        Ok(done_rx)
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owns the cpal stream for the lifetime of the playback handle
fn run_device_thread(
    commands: &std_mpsc::Receiver<Command>,
    mixer: &Arc<Mutex<Mixer>>,
    state: &Arc<AtomicU8>,
) {
    let mut stream: Option<(cpal::Stream, u32)> = None;

    while let Ok(command) = commands.recv() {
        match command {
            Command::Open(reply) => {
                let result = match &stream {
                    Some((_, rate)) => Ok(*rate),
                    None => match open_stream(mixer, state) {
                        Ok((s, rate)) => {
                            stream = Some((s, rate));
                            Ok(rate)
                        }
                        Err(e) => Err(e),
                    },
                };
                if result.is_ok() {
                    state.store(STATE_RUNNING, Ordering::Release);
                }
                let _ = reply.send(result);
            }
            Command::Close => {
                stream = None;
                state.store(STATE_SUSPENDED, Ordering::Release);
            }
        }
    }

    drop(stream);
    state.store(STATE_CLOSED, Ordering::Release);
    tracing::debug!("audio output thread exited");
}

fn open_stream(mixer: &Arc<Mutex<Mixer>>, state: &Arc<AtomicU8>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(Error::Audio(format!(
            "unsupported output sample format: {:?}",
            supported.sample_format()
        )));
    }

    let config: cpal::StreamConfig = supported.config();
    let channels = usize::from(config.channels);
    let sample_rate = config.sample_rate.0;

    let callback_mixer = Arc::clone(mixer);
    let error_state = Arc::clone(state);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut mixer) = callback_mixer.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    let sample = mixer.next_sample();
                    frame.fill(sample);
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                error_state.store(STATE_SUSPENDED, Ordering::Release);
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    Ok((stream, sample_rate))
}
