//! On-device speech fallback
//!
//! Used when remote synthesis is unavailable. Speaks through an installed
//! command-line synthesizer instead of the session's audio output.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::{Error, Result};

/// Longest a single utterance may take
const SPEAK_TIMEOUT: Duration = Duration::from_secs(60);

/// Baseline speaking rate in words per minute
const BASE_WPM: f32 = 160.0;

/// Speaks text locally
#[async_trait]
pub trait LocalSpeech: Send + Sync {
    /// Speak `text` in `language` at `rate` (1.0 = normal)
    ///
    /// Returns `Ok(false)` when no synthesizer is available.
    ///
    /// # Errors
    ///
    /// Returns error if the synthesizer fails
    async fn speak(&self, text: &str, language: &str, rate: f32) -> Result<bool>;

    /// Silence the utterance in progress, if any
    ///
    /// The interrupted `speak` call returns `Ok(false)`.
    fn cancel(&self);
}

/// Supported synthesizer programs, in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    EspeakNg,
    Espeak,
    Say,
}

impl Engine {
    const ALL: [Self; 3] = [Self::EspeakNg, Self::Espeak, Self::Say];

    const fn program(self) -> &'static str {
        match self {
            Self::EspeakNg => "espeak-ng",
            Self::Espeak => "espeak",
            Self::Say => "say",
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn args(self, text: &str, language: &str, rate: f32) -> Vec<String> {
        let wpm = (BASE_WPM * rate.clamp(0.5, 2.0)).round() as u32;
        match self {
            Self::EspeakNg | Self::Espeak => {
                let mut args = vec!["-s".to_string(), wpm.to_string()];
                if let Some(code) = language_code(language) {
                    args.push("-v".to_string());
                    args.push(code.to_string());
                }
                args.push(text.to_string());
                args
            }
            Self::Say => vec!["-r".to_string(), wpm.to_string(), text.to_string()],
        }
    }
}

/// Utterance currently holding the synthesizer
type ActiveUtterance = Arc<Mutex<Option<(u64, oneshot::Sender<()>)>>>;

/// Speech through `espeak-ng`, `espeak` or `say`
///
/// One utterance at a time; starting another cancels the previous one.
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    engine: Option<(Engine, PathBuf)>,
    active: ActiveUtterance,
    next_id: Arc<AtomicU64>,
}

impl CommandSpeech {
    /// Find the first installed synthesizer
    #[must_use]
    pub fn detect() -> Self {
        let engine = Engine::ALL
            .into_iter()
            .find_map(|engine| which::which(engine.program()).ok().map(|path| (engine, path)));

        match &engine {
            Some((engine, path)) => {
                tracing::debug!(engine = engine.program(), path = %path.display(), "local speech available");
            }
            None => tracing::info!("no local speech synthesizer found"),
        }
        Self::with_engine(engine)
    }

    fn with_engine(engine: Option<(Engine, PathBuf)>) -> Self {
        Self {
            engine,
            active: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Claim the synthesizer, cancelling whatever held it
    fn begin(&self) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((id, tx));
        if let Some((_, previous)) = previous {
            let _ = previous.send(());
        }
        (id, rx)
    }

    /// Release the synthesizer if `id` still holds it
    fn finish(&self, id: u64) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|(current, _)| *current == id) {
            active.take();
        }
    }

    /// Whether a synthesizer was found
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.engine.is_some()
    }
}

#[async_trait]
impl LocalSpeech for CommandSpeech {
    async fn speak(&self, text: &str, language: &str, rate: f32) -> Result<bool> {
        let Some((engine, path)) = &self.engine else {
            tracing::warn!("local speech requested but no synthesizer is installed");
            return Ok(false);
        };

        let (id, cancelled) = self.begin();
        let mut child = Command::new(path)
            .args(engine.args(text, language, rate))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .inspect_err(|_| self.finish(id))?;

        let waited = tokio::select! {
            waited = timeout(SPEAK_TIMEOUT, child.wait()) => Some(waited),
            _ = cancelled => None,
        };
        self.finish(id);

        let Some(waited) = waited else {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "local speech already exited");
            }
            tracing::debug!(engine = engine.program(), "local speech cancelled");
            return Ok(false);
        };

        let status = waited
            .map_err(|_| Error::Tts(format!("local speech timed out after {SPEAK_TIMEOUT:?}")))??;
        if !status.success() {
            return Err(Error::Tts(format!("{} exited with {status}", engine.program())));
        }

        tracing::debug!(engine = engine.program(), chars = text.len(), "spoke locally");
        Ok(true)
    }

    fn cancel(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((_, tx)) = active {
            let _ = tx.send(());
        }
    }
}

/// Voice code for a language name, as `espeak` expects
fn language_code(language: &str) -> Option<&'static str> {
    let code = match language.trim().to_lowercase().as_str() {
        "spanish" | "español" => "es",
        "french" | "français" => "fr",
        "german" | "deutsch" => "de",
        "italian" | "italiano" => "it",
        "portuguese" | "português" => "pt",
        "japanese" | "日本語" => "ja",
        "chinese" | "mandarin" | "中文" => "cmn",
        "korean" | "한국어" => "ko",
        "russian" | "русский" => "ru",
        "hindi" | "हिन्दी" => "hi",
        "arabic" => "ar",
        "dutch" => "nl",
        "english" => "en",
        _ => return None,
    };
    Some(code)
}
