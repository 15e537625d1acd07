//! Audio capture from microphone

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::meter::{ANALYSER_WINDOW, LevelSource, frequency_bins};
use super::recorder::{CaptureStream, Microphone};
use crate::{Error, Result};

/// Preferred capture sample rate (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Opens the default input device
#[derive(Debug, Default)]
pub struct AudioCapture;

impl AudioCapture {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Microphone for AudioCapture {
    fn open(&self) -> Result<Box<dyn CaptureStream>> {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let window = Arc::new(Mutex::new(VecDeque::with_capacity(ANALYSER_WINDOW)));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let thread_chunks = Arc::clone(&chunks);
        let thread_window = Arc::clone(&window);
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(&thread_chunks, &thread_window) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while !thread_stop.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited".to_string()))??;

        Ok(Box::new(CpalCaptureStream {
            sample_rate,
            chunks,
            window,
            stop,
            thread: Some(handle),
        }))
    }
}

/// Capture stream owned by a background thread
struct CpalCaptureStream {
    sample_rate: u32,
    chunks: Arc<Mutex<Vec<Vec<f32>>>>,
    window: Arc<Mutex<VecDeque<f32>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCaptureStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn level_source(&self) -> Box<dyn LevelSource> {
        Box::new(AnalyserSource {
            window: Arc::clone(&self.window),
        })
    }

    fn finish(mut self: Box<Self>) -> Vec<Vec<f32>> {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.chunks
            .lock()
            .map(|mut c| std::mem::take(&mut *c))
            .unwrap_or_default()
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Frequency analyser over the most recent capture window
struct AnalyserSource {
    window: Arc<Mutex<VecDeque<f32>>>,
}

impl LevelSource for AnalyserSource {
    fn frequency_bins(&mut self) -> Vec<u8> {
        let samples: Vec<f32> = self
            .window
            .lock()
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default();
        if samples.len() < ANALYSER_WINDOW {
            return vec![0; ANALYSER_WINDOW / 2];
        }
        frequency_bins(&samples)
    }
}

fn build_stream(
    chunks: &Arc<Mutex<Vec<Vec<f32>>>>,
    window: &Arc<Mutex<VecDeque<f32>>>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::PermissionDenied("no input device available".to_string()))?;

    // Prefer mono 16kHz, otherwise take the device default and downmix
    let config = device
        .supported_input_configs()
        .map_err(|e| Error::PermissionDenied(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= cpal::SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= cpal::SampleRate(SAMPLE_RATE)
        })
        .map(|c| c.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)))
        .map_or_else(|| device.default_input_config(), Ok)
        .map_err(|e| Error::PermissionDenied(e.to_string()))?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(Error::Audio(format!(
            "unsupported input sample format: {:?}",
            config.sample_format()
        )));
    }

    let config: cpal::StreamConfig = config.config();
    let channels = usize::from(config.channels);
    let sample_rate = config.sample_rate.0;

    let chunks = Arc::clone(chunks);
    let window = Arc::clone(window);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                #[allow(clippy::cast_precision_loss)]
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                    .collect();

                if let Ok(mut w) = window.lock() {
                    for &s in &mono {
                        if w.len() == ANALYSER_WINDOW {
                            w.pop_front();
                        }
                        w.push_back(s);
                    }
                }
                if let Ok(mut c) = chunks.lock() {
                    c.push(mono);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::PermissionDenied(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::PermissionDenied(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio capture initialized"
    );

    Ok((stream, sample_rate))
}
