//! Response orchestrator
//!
//! Drives one conversational turn: analysis of the recorded clip, immediate
//! rendering of both messages, background speech synthesis with retry and
//! on-device fallback, then playback through the [`PlaybackCoordinator`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::cache::VocabularyCache;
use super::message::{Message, MessageId, SharedConversation};
use super::pacing::pacing_rate;
use super::repeat::{RepeatRequest, detect_repeat};
use crate::config::DEFAULT_CONTEXT_TURNS;
use crate::events::{EventSender, TutorEvent};
use crate::settings::SharedSettings;
use crate::speech::LocalSpeech;
use crate::tutor::{
    Analysis, RephraseStyle, RetryPolicy, SystemCommand, TutorParams, TutorReply, TutorService,
};
use crate::voice::{
    AudioBuffer, AudioOutput, Clip, GestureOutcome, Microphone, PlaybackCoordinator,
    RecordingController, SessionState, SharedState, TTS_SAMPLE_RATE, decode_pcm_to_buffer,
};
use crate::{Error, Result};

/// Vocabulary terms synthesized ahead of time per reply
pub const MAX_PREFETCH_TERMS: usize = 3;

/// Tunables for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Prior turns sent with each analysis
    pub context_turns: usize,
    /// Sample rate of synthesized PCM
    pub tts_sample_rate: u32,
    /// Remote synthesis retry policy
    pub retry: RetryPolicy,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            context_turns: DEFAULT_CONTEXT_TURNS,
            tts_sample_rate: TTS_SAMPLE_RATE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Messages produced by one turn
#[derive(Debug)]
pub struct Turn {
    pub user_id: MessageId,
    pub bot_id: MessageId,
    /// Background synthesis and playback of the reply
    pub speech: JoinHandle<()>,
}

/// Outcome of speaking a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Remote audio attached (and played if the output allowed)
    Attached,
    /// Spoken through the on-device synthesizer
    Local,
    /// No audio; the message stays text-only
    TextOnly,
}

/// Coordinates recording, analysis, synthesis and playback for a session
#[derive(Clone)]
pub struct ResponseOrchestrator {
    service: Arc<dyn TutorService>,
    local_speech: Arc<dyn LocalSpeech>,
    output: Arc<dyn AudioOutput>,
    recorder: Arc<Mutex<RecordingController>>,
    coordinator: PlaybackCoordinator,
    conversation: SharedConversation,
    settings: SharedSettings,
    state: SharedState,
    cache: VocabularyCache,
    events: EventSender,
    options: OrchestratorOptions,
}

impl ResponseOrchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<dyn TutorService>,
        local_speech: Arc<dyn LocalSpeech>,
        microphone: Arc<dyn Microphone>,
        output: Arc<dyn AudioOutput>,
        conversation: SharedConversation,
        settings: SharedSettings,
        events: EventSender,
        options: OrchestratorOptions,
    ) -> Self {
        let state: SharedState = Arc::new(Mutex::new(SessionState::default()));
        let coordinator = PlaybackCoordinator::new(
            Arc::clone(&output),
            Arc::clone(&state),
            Arc::clone(&conversation),
            Arc::clone(&settings),
            events.clone(),
        )
        .with_local_speech(Arc::clone(&local_speech));
        let recorder = RecordingController::new(microphone, None);

        Self {
            service,
            local_speech,
            output,
            recorder: Arc::new(Mutex::new(recorder)),
            coordinator,
            conversation,
            settings,
            state,
            cache: VocabularyCache::new(),
            events,
            options,
        }
    }

    #[must_use]
    pub const fn coordinator(&self) -> &PlaybackCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub const fn conversation(&self) -> &SharedConversation {
        &self.conversation
    }

    #[must_use]
    pub const fn cache(&self) -> &VocabularyCache {
        &self.cache
    }

    /// Whether remote speech has been given up on for this session
    #[must_use]
    pub fn is_quota_exhausted(&self) -> bool {
        self.lock_state().quota_exhausted
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.lock_state().recording
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock_state().loading
    }

    /// Live microphone levels
    #[must_use]
    pub fn levels(&self) -> watch::Receiver<f32> {
        self.lock_recorder().levels()
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_recorder(&self) -> MutexGuard<'_, RecordingController> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn params(&self) -> TutorParams {
        self.settings
            .read()
            .map(|s| s.tutor_params())
            .unwrap_or_else(|_| crate::settings::Settings::default().tutor_params())
    }

    fn voice(&self) -> String {
        self.settings
            .read()
            .map_or_else(|_| crate::settings::Settings::default().voice, |s| s.voice.clone())
    }

    fn target_language(&self) -> String {
        self.settings.read().map_or_else(
            |_| crate::settings::Settings::default().target_language,
            |s| s.target_language.clone(),
        )
    }

    // -- Recording ------------------------------------------------------------

    /// Begin capturing a learner utterance
    ///
    /// Cancels a pending shadow restart and stops playback first.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened; an alert is emitted
    pub fn start_recording(&self) -> Result<()> {
        self.coordinator.cancel_shadow_restart();
        self.coordinator.stop();

        let (calibrate, cues) = self
            .settings
            .read()
            .map_or((true, true), |s| (s.noise_calibration, s.audio_cues));

        let result = {
            let mut recorder = self.lock_recorder();
            recorder.set_noise_calibration(calibrate);
            recorder.set_cues(cues.then(|| Arc::clone(&self.output)));
            if recorder.is_recording() {
                return Ok(());
            }
            recorder.start()
        };

        match result {
            Ok(()) => {
                self.lock_state().recording = true;
                self.events.emit(TutorEvent::RecordingStarted);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not start recording");
                self.events
                    .emit(TutorEvent::Alert(format!("Microphone unavailable: {e}")));
                Err(e)
            }
        }
    }

    /// Stop capturing and run the turn
    ///
    /// Returns `Ok(None)` when nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be encoded or analysis fails
    pub async fn stop_recording(&self) -> Result<Option<Turn>> {
        let clip = {
            let result = self.lock_recorder().stop();
            self.lock_state().recording = false;
            result
        };
        self.events.emit(TutorEvent::RecordingStopped);

        match clip? {
            Some(clip) => self.process_clip(&clip).await.map(Some),
            None => Ok(None),
        }
    }

    // -- Turn pipeline --------------------------------------------------------

    /// Analyze a clip, render the turn and start speaking the reply
    ///
    /// Both messages are in the conversation when this returns; synthesis
    /// continues on [`Turn::speech`].
    ///
    /// # Errors
    ///
    /// Returns error if analysis fails; no message is added
    pub async fn process_clip(&self, clip: &Clip) -> Result<Turn> {
        let context = self
            .conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent_context(self.options.context_turns);
        let params = self.params();

        self.set_loading(true);
        let result = self.service.analyze(clip, &context, &params).await;
        self.set_loading(false);

        let analysis = result.inspect_err(|e| {
            tracing::warn!(error = %e, "analysis failed, turn aborted");
            self.events
                .emit(TutorEvent::Alert(format!("Could not analyze recording: {e}")));
        })?;

        Ok(self.render_turn(analysis, clip))
    }

    fn set_loading(&self, loading: bool) {
        self.lock_state().loading = loading;
        self.events.emit(TutorEvent::Loading(loading));
    }

    fn render_turn(&self, analysis: Analysis, clip: &Clip) -> Turn {
        let Analysis {
            user_transcript,
            user_transliteration,
            detected_language,
            reply,
        } = analysis;

        let (user, bot) = {
            let mut convo = self.conversation.lock().unwrap_or_else(PoisonError::into_inner);
            let reply = substitute_repeat(&user_transcript, reply, convo.last_bot().and_then(Message::reply));

            let rate = self
                .settings
                .read()
                .is_ok_and(|s| s.adaptive_pacing)
                .then(|| pacing_rate(&user_transcript, clip.duration))
                .flatten();

            let user = Message::user(user_transcript, user_transliteration);
            let bot = Message::bot(reply).with_playback_rate(rate);
            convo.push(user.clone());
            convo.push(bot.clone());
            (user, bot)
        };

        tracing::info!(
            user_id = %user.id,
            bot_id = %bot.id,
            detected_language = ?detected_language,
            playback_rate = ?bot.playback_rate,
            "turn rendered"
        );

        let (user_id, bot_id) = (user.id, bot.id);
        let command = bot.reply().and_then(|r| r.command.clone());
        let vocabulary: Vec<String> = bot
            .reply()
            .map(|r| r.vocabulary.iter().map(|v| v.term.clone()).collect())
            .unwrap_or_default();

        self.events.emit(TutorEvent::MessageAdded(Box::new(user)));
        self.events.emit(TutorEvent::MessageAdded(Box::new(bot)));

        if let Some(command) = command {
            self.apply_command(command);
        }

        self.coordinator.defer_if_locked(bot_id);

        let this = self.clone();
        tokio::spawn(async move { this.prefetch_vocabulary(vocabulary).await });

        let this = self.clone();
        let speech = tokio::spawn(async move {
            this.speak_message(bot_id).await;
        });

        Turn {
            user_id,
            bot_id,
            speech,
        }
    }

    // -- Speech ---------------------------------------------------------------

    /// Synthesize, attach and play the audio for a message
    pub async fn speak_message(&self, id: MessageId) -> SpeechOutcome {
        let Some((text, rate)) = self.message_text(id) else {
            tracing::debug!(%id, "speak requested for unknown message");
            return SpeechOutcome::TextOnly;
        };
        let voice = self.voice();

        if self.is_quota_exhausted() {
            tracing::debug!(%id, "speech quota exhausted, speaking locally");
            self.coordinator.forget(id);
            return self.speak_locally(&text, rate).await;
        }

        match self.synthesize_with_retry(&text, &voice).await {
            Ok(audio) => {
                self.attach_and_play(id, audio).await;
                SpeechOutcome::Attached
            }
            Err(e) if e.is_quota() => {
                tracing::warn!(%id, error = %e, "speech quota exhausted, switching to local speech");
                self.lock_state().quota_exhausted = true;
                self.coordinator.forget(id);
                self.speak_locally(&text, rate).await
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "speech synthesis failed, reply stays text-only");
                self.coordinator.forget(id);
                SpeechOutcome::TextOnly
            }
        }
    }

    /// Remote synthesis with the configured retry policy
    async fn synthesize_with_retry(&self, text: &str, voice: &str) -> Result<Arc<AudioBuffer>> {
        let policy = &self.options.retry;
        let mut attempt = 0;
        loop {
            match self.synthesize_once(text, voice).await {
                Ok(audio) => return Ok(audio),
                Err(e) if attempt < policy.max_retries => {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::debug!(attempt, error = %e, delay_ms = delay.as_millis(), "retrying synthesis");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn synthesize_once(&self, text: &str, voice: &str) -> Result<Arc<AudioBuffer>> {
        let data = self.service.synthesize(text, voice).await?;
        let audio = decode_pcm_to_buffer(&data, self.options.tts_sample_rate)?;
        if audio.is_empty() {
            return Err(Error::Tts("synthesized audio is empty".to_string()));
        }
        Ok(Arc::new(audio))
    }

    async fn attach_and_play(&self, id: MessageId, audio: Arc<AudioBuffer>) {
        let attached = self
            .conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .attach_audio(id, audio);

        match attached {
            Ok(true) => {
                tracing::debug!(%id, "audio attached");
                self.events.emit(TutorEvent::AudioAttached(id));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(%id, error = %e, "could not attach audio");
                return;
            }
        }

        // A pending retry may already have picked it up
        if self.coordinator.current() != Some(id) {
            self.coordinator.play(id, None, None).await;
        }
    }

    async fn speak_locally(&self, text: &str, rate: Option<f32>) -> SpeechOutcome {
        let rate = rate.unwrap_or_else(|| self.settings.read().map_or(1.0, |s| s.speech_rate));
        // Local speech takes the output slot like any other playback
        self.coordinator.stop();
        match self
            .local_speech
            .speak(text, &self.target_language(), rate)
            .await
        {
            Ok(true) => SpeechOutcome::Local,
            Ok(false) => SpeechOutcome::TextOnly,
            Err(e) => {
                tracing::warn!(error = %e, "local speech failed");
                SpeechOutcome::TextOnly
            }
        }
    }

    fn message_text(&self, id: MessageId) -> Option<(String, Option<f32>)> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|m| (m.text().to_string(), m.playback_rate))
    }

    // -- Vocabulary -----------------------------------------------------------

    /// Synthesize up to [`MAX_PREFETCH_TERMS`] terms into the cache
    ///
    /// Skipped while the quota is exhausted or the learner is busy.
    pub async fn prefetch_vocabulary(&self, terms: Vec<String>) {
        if !self.settings.read().is_ok_and(|s| s.prefetch_vocabulary) {
            return;
        }
        let voice = self.voice();

        for term in terms.into_iter().take(MAX_PREFETCH_TERMS) {
            {
                let state = self.lock_state();
                if state.quota_exhausted || !state.is_idle() {
                    tracing::trace!(%term, "vocabulary prefetch skipped");
                    return;
                }
            }
            if self.cache.contains(&voice, &term) {
                continue;
            }

            match self.synthesize_once(&term, &voice).await {
                Ok(audio) => {
                    self.cache.insert(&voice, &term, audio);
                    tracing::debug!(%term, "vocabulary audio cached");
                }
                Err(e) if e.is_quota() => {
                    tracing::warn!(error = %e, "speech quota exhausted during prefetch");
                    self.lock_state().quota_exhausted = true;
                    return;
                }
                Err(e) => tracing::debug!(%term, error = %e, "vocabulary prefetch failed"),
            }
        }
    }

    /// Play a vocabulary term, synthesizing it if it is not cached
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails for a reason other than quota
    pub async fn play_vocabulary(&self, term: &str) -> Result<bool> {
        let voice = self.voice();
        let audio = match self.cache.get(&voice, term) {
            Some(audio) => audio,
            None if self.is_quota_exhausted() => {
                return Ok(self.speak_locally(term, None).await == SpeechOutcome::Local);
            }
            None => match self.synthesize_once(term, &voice).await {
                Ok(audio) => self.cache.insert(&voice, term, audio),
                Err(e) if e.is_quota() => {
                    self.lock_state().quota_exhausted = true;
                    return Ok(self.speak_locally(term, None).await == SpeechOutcome::Local);
                }
                Err(e) => return Err(e),
            },
        };
        Ok(self.coordinator.play_buffer(audio, None).await)
    }

    // -- Side actions ---------------------------------------------------------

    /// Replay a message, synthesizing its audio first if needed
    pub async fn play_message(&self, id: MessageId) -> bool {
        let has_audio = self
            .conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(Message::has_audio);

        if has_audio {
            self.coordinator.play(id, None, None).await
        } else {
            self.speak_message(id).await != SpeechOutcome::TextOnly
        }
    }

    /// Restyle a tutor reply and append the result
    ///
    /// Leaves recording and playback state alone.
    ///
    /// # Errors
    ///
    /// Returns error if the message is unknown, is not a tutor reply, or the
    /// request fails
    pub async fn rephrase(&self, id: MessageId, style: RephraseStyle) -> Result<MessageId> {
        let text = {
            let convo = self.conversation.lock().unwrap_or_else(PoisonError::into_inner);
            let message = convo
                .get(id)
                .ok_or_else(|| Error::MessageNotFound(id.to_string()))?;
            message
                .reply()
                .map(|r| r.target_text.clone())
                .ok_or_else(|| Error::Validation("only tutor replies can be rephrased".to_string()))?
        };

        let reply = self
            .service
            .rephrase(&text, style, &self.params())
            .await
            .inspect_err(|e| tracing::warn!(%id, error = %e, "rephrase failed"))?;

        let message = Message::bot(reply);
        let new_id = self
            .conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        tracing::info!(%id, %new_id, style = style.as_str(), "reply rephrased");
        self.events.emit(TutorEvent::MessageAdded(Box::new(message)));
        Ok(new_id)
    }

    /// Apply a tutor-issued command to the settings
    pub fn apply_command(&self, command: SystemCommand) {
        match &command {
            SystemCommand::SetSpeed(rate) => {
                if let Ok(mut settings) = self.settings.write() {
                    settings.set_speech_rate(*rate);
                    tracing::info!(rate = settings.speech_rate, "speech rate changed by tutor");
                }
            }
            SystemCommand::SetVoice(voice) if !voice.trim().is_empty() => {
                if let Ok(mut settings) = self.settings.write() {
                    settings.voice = voice.trim().to_string();
                    tracing::info!(voice = %settings.voice, "voice changed by tutor");
                }
            }
            SystemCommand::SetVoice(_) => return,
            SystemCommand::OpenSettings | SystemCommand::CloseSettings => {}
        }
        self.events.emit(TutorEvent::Command(command));
    }

    /// A key press or click: unlock audio and play the pending head
    pub async fn on_user_gesture(&self) -> GestureOutcome {
        self.coordinator.on_user_gesture().await
    }

    /// Stop capture, playback and timers
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        let mut recorder = self.lock_recorder();
        if recorder.is_recording() {
            drop(recorder.stop());
        }
        self.lock_state().recording = false;
    }
}

/// Replace the reply when the learner asked for a repeat
///
/// Annotations are cleared on the substituted reply.
fn substitute_repeat(
    transcript: &str,
    reply: TutorReply,
    previous: Option<&TutorReply>,
) -> TutorReply {
    match detect_repeat(transcript) {
        Some(RepeatRequest::Literal(text)) => {
            tracing::debug!(%text, "repeating requested text");
            TutorReply::text(text)
        }
        Some(RepeatRequest::Last) => match previous {
            Some(previous) => {
                tracing::debug!("repeating previous reply");
                TutorReply {
                    transliteration: previous.transliteration.clone(),
                    translation: previous.translation.clone(),
                    ..TutorReply::text(previous.target_text.clone())
                }
            }
            None => reply,
        },
        None => reply,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tutor::{CulturalNote, Feedback, VocabularyItem};

    fn annotated(text: &str) -> TutorReply {
        TutorReply {
            feedback: Some(Feedback {
                has_error: true,
                category: None,
                correction: None,
                explanation: None,
            }),
            vocabulary: vec![VocabularyItem {
                term: "x".to_string(),
                transliteration: None,
                meaning: String::new(),
                part_of_speech: None,
                source_term: None,
                examples: vec![],
            }],
            cultural_notes: vec![CulturalNote {
                title: None,
                content: "n".to_string(),
            }],
            translation: Some("translated".to_string()),
            ..TutorReply::text(text)
        }
    }

    #[test]
    fn repeat_last_copies_previous_text_only() {
        let previous = annotated("¿Cómo estás?");
        let reply = substitute_repeat("repeat", annotated("Claro"), Some(&previous));

        assert_eq!(reply.target_text, "¿Cómo estás?");
        assert_eq!(reply.translation.as_deref(), Some("translated"));
        assert!(reply.vocabulary.is_empty());
        assert!(reply.cultural_notes.is_empty());
        assert!(reply.feedback.is_none());
    }

    #[test]
    fn repeat_literal_uses_trailing_text() {
        let reply = substitute_repeat("repeat after me: buenas noches", annotated("Claro"), None);
        assert_eq!(reply, TutorReply::text("buenas noches"));
    }

    #[test]
    fn repeat_without_history_keeps_reply() {
        let reply = substitute_repeat("repeat", annotated("Claro"), None);
        assert_eq!(reply.target_text, "Claro");
        assert_eq!(reply.vocabulary.len(), 1);
    }

    #[test]
    fn ordinary_turn_keeps_reply() {
        let reply = substitute_repeat("hola", annotated("¡Hola!"), Some(&annotated("old")));
        assert_eq!(reply.target_text, "¡Hola!");
        assert!(reply.feedback.is_some());
    }
}
