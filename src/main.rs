use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voice_tutor::chat::{MessageContent, OrchestratorOptions, export_html};
use voice_tutor::speech::CommandSpeech;
use voice_tutor::tutor::{GeminiClient, RephraseStyle, RetryPolicy, TutorService};
use voice_tutor::voice::{
    AudioBuffer, AudioCapture, AudioOutput, AudioPlayback, OutputState, RecordingController,
    decode_pcm_to_buffer,
};
use voice_tutor::{Config, Conversation, EventSender, ResponseOrchestrator, Settings, TutorEvent};

/// Voice Tutor - practice a language by talking to an AI tutor
#[derive(Parser)]
#[command(name = "tutor", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a spoken conversation (default)
    Chat,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "¡Hola! Esta es una prueba de voz.")]
        text: String,
    },
    /// Export the saved conversation as HTML
    Export {
        /// Output file (defaults to the data directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Interactive settings wizard
    Settings,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,voice_tutor=info",
        1 => "info,voice_tutor=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        analysis_model = %config.analysis_model,
        tts_model = %config.tts_model,
        "loaded configuration"
    );

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(&config).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
        Command::Export { output } => export(&config, output),
        Command::Settings => voice_tutor::setup::run_setup(&config),
    }
}

const HELP: &str = "\
  <Enter>        start / stop recording
  p              replay the last reply
  v <word>       hear a vocabulary word
  r [style]      rephrase the last reply (natural, casual, formal)
  h              show this help
  q              quit";

/// Interactive conversation loop
async fn chat(config: &Config) -> anyhow::Result<()> {
    let settings_path = config.settings_path();
    let conversation_path = config.conversation_path();

    let settings = Settings::load(&settings_path).shared();
    let conversation = Conversation::load(&conversation_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load conversation history, starting fresh");
        Conversation::new()
    });

    let service: Arc<dyn TutorService> = Arc::new(GeminiClient::new(config)?);
    let (events, rx) = EventSender::channel();
    let orchestrator = ResponseOrchestrator::new(
        service,
        Arc::new(CommandSpeech::detect()),
        Arc::new(AudioCapture::new()),
        Arc::new(AudioPlayback::new()?),
        conversation.shared(),
        Arc::clone(&settings),
        events,
        OrchestratorOptions {
            context_turns: config.context_turns,
            tts_sample_rate: config.tts_sample_rate,
            retry: RetryPolicy::default(),
        },
    );

    let printer = tokio::spawn(print_events(rx, orchestrator.clone()));

    {
        let s = settings.read().unwrap_or_else(PoisonError::into_inner);
        println!("Practicing {} with {} ({})", s.target_language, s.voice, s.learning_goal);
    }
    println!("{HELP}\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));

        // Any input counts as a user gesture
        let gesture = orchestrator.on_user_gesture().await;
        if gesture.consumes_input() && !matches!(cmd, "q" | "quit") {
            println!("(playing reply)");
            continue;
        }

        match cmd {
            "" => toggle_recording(&orchestrator).await,
            "q" | "quit" => break,
            "h" | "help" => println!("{HELP}"),
            "p" => match last_bot_id(&orchestrator) {
                Some(id) => {
                    orchestrator.play_message(id).await;
                }
                None => println!("Nothing to replay yet."),
            },
            "v" if !arg.trim().is_empty() => {
                if let Err(e) = orchestrator.play_vocabulary(arg.trim()).await {
                    println!("Could not play \"{}\": {e}", arg.trim());
                }
            }
            "r" => {
                let style = if arg.trim().is_empty() {
                    Ok(RephraseStyle::Natural)
                } else {
                    arg.parse::<RephraseStyle>()
                };
                match (style, last_bot_id(&orchestrator)) {
                    (Ok(style), Some(id)) => {
                        if let Err(e) = orchestrator.rephrase(id, style).await {
                            println!("Rephrase failed: {e}");
                        }
                    }
                    (Err(e), _) => println!("{e}"),
                    (_, None) => println!("Nothing to rephrase yet."),
                }
            }
            _ => println!("Unknown command. Type h for help."),
        }
    }

    orchestrator.shutdown();
    printer.abort();

    {
        let convo = orchestrator
            .conversation()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        convo.save(&conversation_path)?;
    }
    settings
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .save(&settings_path)?;
    println!("Conversation saved. ¡Hasta luego!");
    Ok(())
}

async fn toggle_recording(orchestrator: &ResponseOrchestrator) {
    if orchestrator.is_recording() {
        match orchestrator.stop_recording().await {
            Ok(Some(_)) => {}
            Ok(None) => println!("(nothing recorded)"),
            Err(e) => println!("Turn failed: {e}"),
        }
    } else if orchestrator.start_recording().is_ok() {
        println!("Recording... press Enter to stop.");
    }
}

fn last_bot_id(orchestrator: &ResponseOrchestrator) -> Option<voice_tutor::MessageId> {
    orchestrator
        .conversation()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .last_bot()
        .map(|m| m.id)
}

/// Render session events on the terminal
async fn print_events(mut rx: mpsc::UnboundedReceiver<TutorEvent>, orchestrator: ResponseOrchestrator) {
    while let Some(event) = rx.recv().await {
        match event {
            TutorEvent::Loading(true) => println!("Thinking..."),
            TutorEvent::MessageAdded(message) => match &message.content {
                MessageContent::User { transcript, .. } => println!("\nYou:   {transcript}"),
                MessageContent::Bot(reply) => {
                    println!("Tutor: {}", reply.target_text);
                    if let Some(t) = &reply.transliteration {
                        println!("       {t}");
                    }
                    if let Some(t) = &reply.translation {
                        println!("       ({t})");
                    }
                    if let Some(fb) = reply.feedback.as_ref().filter(|f| f.has_error) {
                        let correction = fb.correction.as_deref().unwrap_or_default();
                        let explanation = fb.explanation.as_deref().unwrap_or_default();
                        println!("  fix: {correction} {explanation}");
                    }
                    for item in &reply.vocabulary {
                        println!("  vocab: {} - {}", item.term, item.meaning);
                    }
                    for note in &reply.cultural_notes {
                        println!("  note: {}", note.content);
                    }
                }
            },
            TutorEvent::NeedsUnlock => println!("(audio is waiting; press Enter to play)"),
            TutorEvent::UnlockPrompt => println!("(audio is blocked; press Enter to enable sound)"),
            TutorEvent::ShadowRestart => {
                if orchestrator.start_recording().is_ok() {
                    println!("Recording... press Enter to stop.");
                }
            }
            TutorEvent::Command(command) => println!("(tutor: {command:?})"),
            TutorEvent::Alert(message) => println!("! {message}"),
            TutorEvent::RecordingStarted
            | TutorEvent::RecordingStopped
            | TutorEvent::Loading(false)
            | TutorEvent::AudioAttached(_)
            | TutorEvent::PlaybackStarted(_)
            | TutorEvent::PlaybackFinished(_) => {}
        }
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut recorder = RecordingController::new(Arc::new(AudioCapture::new()), None);
    let levels = recorder.levels();
    recorder.start()?;

    for i in 0..duration * 4 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let level = *levels.borrow();

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (level * 50.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
        #[allow(clippy::cast_precision_loss)]
        let secs = (i + 1) as f32 / 4.0;
        println!("[{secs:5.2}s] level {level:.2} [{meter}]");
    }

    match recorder.stop()? {
        Some(clip) => println!(
            "\nCaptured {:.1}s at {} Hz ({} bytes WAV)",
            clip.duration.as_secs_f32(),
            clip.sample_rate,
            clip.wav.len()
        ),
        None => println!("\nNo audio captured"),
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If the level stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Play a buffer to completion on a fresh output
async fn play_to_end(buffer: AudioBuffer) -> anyhow::Result<()> {
    let playback = AudioPlayback::new()?;
    if playback.resume().await != OutputState::Running {
        anyhow::bail!("audio output could not be started");
    }
    let started = playback.start(Arc::new(buffer), 1.0)?;
    let _ = started.ended.await;
    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    play_to_end(AudioBuffer::new(samples, sample_rate)).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test remote speech synthesis
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let settings = Settings::load(&config.settings_path());
    let client = GeminiClient::new(config)?;

    println!("Synthesizing speech with voice {}...", settings.voice);
    let data = client.synthesize(text, &settings.voice).await?;
    let buffer = decode_pcm_to_buffer(&data, config.tts_sample_rate)?;
    println!(
        "Got {} samples ({:.1}s)",
        buffer.len(),
        buffer.duration().as_secs_f32()
    );

    println!("Playing audio...");
    play_to_end(buffer).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Write the saved conversation as HTML
fn export(config: &Config, output: Option<PathBuf>) -> anyhow::Result<()> {
    let conversation = Conversation::load(&config.conversation_path())?;
    if conversation.is_empty() {
        anyhow::bail!("no saved conversation to export");
    }
    let settings = Settings::load(&config.settings_path());

    let path = output.unwrap_or_else(|| config.data_dir.join("conversation.html"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, export_html(&conversation, &settings))?;

    println!("Exported {} messages to {}", conversation.len(), path.display());
    Ok(())
}
