//! Interactive settings wizard (`tutor settings`)

use std::fmt::Write as _;
use std::path::Path;

use dialoguer::{Confirm, Input, Select};

use crate::config::file::{
    ApiFileConfig, AudioFileConfig, ModelsFileConfig, SessionFileConfig, TutorConfigFile,
};
use crate::config::{Config, DEFAULT_ANALYSIS_MODEL, DEFAULT_TTS_MODEL};
use crate::settings::{MAX_SPEECH_RATE, MIN_SPEECH_RATE, Settings};

/// Languages offered in the picker; anything else can be typed in
const LANGUAGES: &[&str] = &[
    "Spanish", "French", "German", "Italian", "Portuguese", "Japanese", "Chinese", "Korean",
    "Other...",
];

/// Prebuilt voices of the speech model
const VOICES: &[&str] = &["Kore", "Puck", "Charon", "Fenrir", "Aoede", "Leda", "Orus", "Zephyr"];

/// Run the interactive settings wizard
///
/// # Errors
///
/// Returns error if user input fails or a file cannot be written
pub fn run_setup(config: &Config) -> anyhow::Result<()> {
    println!("Voice Tutor Setup\n");

    // Load existing config if present
    let existing = crate::config::file::load_config_file();
    let config_path = crate::config::file::config_file_path()
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. API key
    let existing_key = existing.api.key.as_deref();
    let masked = existing_key.map(|k| {
        if k.len() > 8 {
            format!("{}...{}", &k[..4], &k[k.len() - 4..])
        } else {
            "****".to_string()
        }
    });
    let prompt = masked.as_ref().map_or_else(
        || "Gemini API key (GEMINI_API_KEY)".to_string(),
        |m| format!("Gemini API key (current: {m}, leave blank to keep)"),
    );
    let key_input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;
    let api_key = if key_input.trim().is_empty() {
        existing_key.map(str::to_string)
    } else {
        Some(key_input.trim().to_string())
    };

    // 2. Models
    let analysis: String = Input::new()
        .with_prompt("Analysis model")
        .default(
            existing
                .models
                .analysis
                .clone()
                .unwrap_or_else(|| DEFAULT_ANALYSIS_MODEL.to_string()),
        )
        .interact_text()?;
    let tts: String = Input::new()
        .with_prompt("Speech model")
        .default(
            existing
                .models
                .tts
                .clone()
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
        )
        .interact_text()?;

    let config_file = TutorConfigFile {
        api: ApiFileConfig {
            key: api_key,
            base_url: existing.api.base_url,
        },
        models: ModelsFileConfig {
            analysis: Some(analysis),
            tts: Some(tts),
        },
        audio: AudioFileConfig {
            tts_sample_rate: existing.audio.tts_sample_rate,
        },
        session: SessionFileConfig {
            data_dir: existing.session.data_dir,
            context_turns: existing.session.context_turns,
        },
    };
    write_config(&config_path, &config_file)?;
    println!("\nConfig written to {}\n", config_path.display());

    // 3. Learner preferences
    let settings_path = config.settings_path();
    let settings = prompt_settings(Settings::load(&settings_path))?;
    settings.save(&settings_path)?;
    println!("\nSettings written to {}", settings_path.display());

    println!("\nSetup complete! Run `tutor chat` to start practicing.");
    Ok(())
}

fn prompt_settings(current: Settings) -> anyhow::Result<Settings> {
    let default_language = LANGUAGES
        .iter()
        .position(|l| l.eq_ignore_ascii_case(&current.target_language))
        .unwrap_or(LANGUAGES.len() - 1);
    let language_idx = Select::new()
        .with_prompt("Language to practice")
        .items(LANGUAGES)
        .default(default_language)
        .interact()?;
    let target_language = if language_idx == LANGUAGES.len() - 1 {
        Input::new()
            .with_prompt("Language")
            .default(current.target_language.clone())
            .interact_text()?
    } else {
        LANGUAGES[language_idx].to_string()
    };

    let voice_idx = Select::new()
        .with_prompt("Tutor voice")
        .items(VOICES)
        .default(VOICES.iter().position(|v| *v == current.voice).unwrap_or(0))
        .interact()?;

    let speech_rate: f32 = Input::new()
        .with_prompt(format!("Speech rate ({MIN_SPEECH_RATE}-{MAX_SPEECH_RATE})"))
        .default(current.speech_rate)
        .interact_text()?;

    let learning_goal: String = Input::new()
        .with_prompt("Learning goal")
        .default(current.learning_goal.clone())
        .interact_text()?;
    let accent: String = Input::new()
        .with_prompt("Accent (blank for default)")
        .default(current.accent.clone())
        .allow_empty(true)
        .interact_text()?;
    let learner_name: String = Input::new()
        .with_prompt("Your name (blank to skip)")
        .default(current.learner_name.clone())
        .allow_empty(true)
        .interact_text()?;

    let confirm = |prompt: &str, default: bool| {
        Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
    };

    let mut settings = Settings {
        target_language,
        voice: VOICES[voice_idx].to_string(),
        learning_goal,
        accent,
        learner_name,
        native_mode: confirm("Explain in your own language?", current.native_mode)?,
        shadow_mode: confirm("Shadow mode (record again after each reply)?", current.shadow_mode)?,
        adaptive_pacing: confirm("Match reply speed to your pace?", current.adaptive_pacing)?,
        noise_calibration: confirm("Calibrate for background noise?", current.noise_calibration)?,
        audio_cues: confirm("Beep when recording starts/stops?", current.audio_cues)?,
        prefetch_vocabulary: confirm("Pre-load vocabulary audio?", current.prefetch_vocabulary)?,
        ..current
    };
    settings.set_speech_rate(speech_rate);
    Ok(settings)
}

/// Serialize and write the config file
fn write_config(path: &Path, config: &TutorConfigFile) -> anyhow::Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, serialize_config(config))?;

    Ok(())
}

/// Serialize config to a readable TOML string
fn serialize_config(config: &TutorConfigFile) -> String {
    let mut out = String::new();

    // [api]
    if config.api.key.is_some() || config.api.base_url.is_some() {
        out.push_str("[api]\n");
        if let Some(ref key) = config.api.key {
            let _ = writeln!(out, "key = {}", quote(key));
        }
        if let Some(ref url) = config.api.base_url {
            let _ = writeln!(out, "base_url = {}", quote(url));
        }
        out.push('\n');
    }

    // [models]
    if config.models.analysis.is_some() || config.models.tts.is_some() {
        out.push_str("[models]\n");
        if let Some(ref m) = config.models.analysis {
            let _ = writeln!(out, "analysis = {}", quote(m));
        }
        if let Some(ref m) = config.models.tts {
            let _ = writeln!(out, "tts = {}", quote(m));
        }
        out.push('\n');
    }

    // [audio]
    if let Some(rate) = config.audio.tts_sample_rate {
        let _ = writeln!(out, "[audio]\ntts_sample_rate = {rate}\n");
    }

    // [session]
    let session = &config.session;
    if session.data_dir.is_some() || session.context_turns.is_some() {
        out.push_str("[session]\n");
        if let Some(ref dir) = session.data_dir {
            let _ = writeln!(out, "data_dir = {}", quote(dir));
        }
        if let Some(turns) = session.context_turns {
            let _ = writeln!(out, "context_turns = {turns}");
        }
        out.push('\n');
    }

    out
}

/// TOML basic string
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::file::load_config_file_from;

    #[test]
    fn serialized_config_parses_back() {
        let config = TutorConfigFile {
            api: ApiFileConfig {
                key: Some("abc\"123".to_string()),
                base_url: None,
            },
            models: ModelsFileConfig {
                analysis: Some("gemini-2.5-flash".to_string()),
                tts: None,
            },
            audio: AudioFileConfig {
                tts_sample_rate: Some(24000),
            },
            session: SessionFileConfig {
                data_dir: Some(r"C:\tutor".to_string()),
                context_turns: Some(6),
            },
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        write_config(&path, &config).unwrap();

        let back = load_config_file_from(&path);
        assert_eq!(back.api.key.as_deref(), Some("abc\"123"));
        assert_eq!(back.models.analysis.as_deref(), Some("gemini-2.5-flash"));
        assert!(back.models.tts.is_none());
        assert_eq!(back.audio.tts_sample_rate, Some(24000));
        assert_eq!(back.session.data_dir.as_deref(), Some(r"C:\tutor"));
        assert_eq!(back.session.context_turns, Some(6));
    }

    #[test]
    fn empty_config_serializes_empty() {
        assert!(serialize_config(&TutorConfigFile::default()).is_empty());
    }
}
