//! Playback coordinator
//!
//! Owns the single audio output slot, the autoplay-unlock gate and the
//! pending-playback queue. All shared flags live in one [`SessionState`];
//! every check-then-act runs under a single lock acquisition.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::codec::AudioBuffer;
use super::cue::probe_tone;
use super::output::{AudioOutput, OutputState, SourceId, StartedSource};
use super::scheduler::{TaskKey, TaskScheduler};
use crate::chat::{MessageId, SharedConversation};
use crate::events::{EventSender, TutorEvent};
use crate::settings::SharedSettings;
use crate::speech::LocalSpeech;

/// Pending retries before giving up and prompting for an unlock
pub const MAX_PENDING_ATTEMPTS: u32 = 20;

/// Wait before re-checking a pending message that has no audio yet
pub const PENDING_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Pause between the end of a reply and the shadow-mode recording
pub const SHADOW_RESTART_DELAY: Duration = Duration::from_millis(900);

/// Longest wait for the unlock probe tone
pub const UNLOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Mutable session flags shared by the coordinator and orchestrator
#[derive(Debug, Default)]
pub struct SessionState {
    /// Microphone capture in progress
    pub recording: bool,
    /// Analysis request in flight
    pub loading: bool,
    /// Remote speech quota used up; sticky for the session
    pub quota_exhausted: bool,
    /// Output is blocked until a user gesture
    pub needs_unlock: bool,
    /// Message and source currently playing
    pub current: Option<(Option<MessageId>, SourceId)>,
    /// Messages waiting for the output to unlock
    pub pending: VecDeque<MessageId>,
    /// Consecutive retries on the pending head
    pub pending_attempts: u32,
}

impl SessionState {
    /// Neither recording nor waiting on analysis
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        !self.recording && !self.loading
    }

    /// Queue `id` unless already present
    pub fn enqueue(&mut self, id: MessageId) {
        if !self.pending.contains(&id) {
            self.pending.push_back(id);
        }
    }
}

/// Shared handle to the session state
pub type SharedState = Arc<Mutex<SessionState>>;

/// What a user gesture did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureOutcome {
    /// Output is still blocked
    Locked,
    /// Output is running; nothing pending was started
    Unlocked,
    /// Output is running and the pending head started playing
    PlayedPending(MessageId),
}

impl GestureOutcome {
    #[must_use]
    pub const fn is_unlocked(self) -> bool {
        !matches!(self, Self::Locked)
    }

    /// Whether the gesture was spent on starting playback
    ///
    /// Input that released a waiting reply is not also a command.
    #[must_use]
    pub const fn consumes_input(self) -> bool {
        matches!(self, Self::PlayedPending(_))
    }
}

/// Coordinates audio output for the session
#[derive(Clone)]
pub struct PlaybackCoordinator {
    output: Arc<dyn AudioOutput>,
    state: SharedState,
    conversation: SharedConversation,
    settings: SharedSettings,
    scheduler: TaskScheduler,
    events: EventSender,
    local_speech: Option<Arc<dyn LocalSpeech>>,
}

impl PlaybackCoordinator {
    #[must_use]
    pub fn new(
        output: Arc<dyn AudioOutput>,
        state: SharedState,
        conversation: SharedConversation,
        settings: SharedSettings,
        events: EventSender,
    ) -> Self {
        Self {
            output,
            state,
            conversation,
            settings,
            scheduler: TaskScheduler::new(),
            events,
            local_speech: None,
        }
    }

    /// Treat on-device speech as part of the output slot
    ///
    /// Stopping playback then also silences the local synthesizer.
    #[must_use]
    pub fn with_local_speech(mut self, speech: Arc<dyn LocalSpeech>) -> Self {
        self.local_speech = Some(speech);
        self
    }

    #[must_use]
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Message currently playing
    #[must_use]
    pub fn current(&self) -> Option<MessageId> {
        self.lock().current.and_then(|(id, _)| id)
    }

    /// Snapshot of the pending queue, head first
    #[must_use]
    pub fn pending(&self) -> Vec<MessageId> {
        self.lock().pending.iter().copied().collect()
    }

    #[must_use]
    pub fn needs_unlock(&self) -> bool {
        self.lock().needs_unlock
    }

    /// Stop whatever is playing, including on-device speech
    pub fn stop(&self) {
        {
            let mut state = self.lock();
            if let Some((id, source)) = state.current.take() {
                self.output.stop(source);
                tracing::debug!(id = ?id, "playback stopped");
            }
        }
        if let Some(speech) = &self.local_speech {
            speech.cancel();
        }
    }

    /// Play a message, or queue it if the output is blocked
    ///
    /// Uses `buffer` when given, otherwise the message's attached audio. The
    /// rate is `rate` if given, then the message's own rate, then the global
    /// speech rate. Returns whether playback started.
    pub async fn play(
        &self,
        id: MessageId,
        buffer: Option<Arc<AudioBuffer>>,
        rate: Option<f32>,
    ) -> bool {
        self.play_inner(Some(id), buffer, rate).await
    }

    /// Queue `id` ahead of its audio when the output is currently blocked
    ///
    /// Returns whether the message was queued.
    pub fn defer_if_locked(&self, id: MessageId) -> bool {
        if self.output.state() == OutputState::Running {
            return false;
        }
        let mut state = self.lock();
        state.enqueue(id);
        state.needs_unlock = true;
        true
    }

    /// Drop `id` from the pending queue; its audio will never arrive
    pub fn forget(&self, id: MessageId) {
        let mut state = self.lock();
        if state.pending.front() == Some(&id) {
            state.pending_attempts = 0;
        }
        state.pending.retain(|p| *p != id);
    }

    /// Play a buffer that belongs to no message (vocabulary audio)
    ///
    /// A blocked output raises the unlock flag but nothing is queued.
    pub async fn play_buffer(&self, buffer: Arc<AudioBuffer>, rate: Option<f32>) -> bool {
        self.play_inner(None, Some(buffer), rate).await
    }

    async fn play_inner(
        &self,
        id: Option<MessageId>,
        buffer: Option<Arc<AudioBuffer>>,
        rate: Option<f32>,
    ) -> bool {
        self.stop();

        if self.output.state() != OutputState::Running
            && self.output.resume().await != OutputState::Running
        {
            {
                let mut state = self.lock();
                if let Some(id) = id {
                    state.enqueue(id);
                }
                state.needs_unlock = true;
            }
            tracing::info!(id = ?id, "audio output locked, playback deferred");
            self.events.emit(TutorEvent::NeedsUnlock);
            return false;
        }

        let attached = id.and_then(|id| self.audio_for(id));
        let (buffer, message_rate) = match (buffer, attached) {
            (Some(buffer), attached) => (buffer, attached.and_then(|(_, r)| r)),
            (None, Some((buffer, r))) => (buffer, r),
            (None, None) => {
                tracing::debug!(id = ?id, "nothing to play, no audio attached");
                return false;
            }
        };
        let rate = rate.or(message_rate).unwrap_or_else(|| self.global_rate());

        let started = {
            let mut state = self.lock();
            // Another play may have started while we awaited resume
            if let Some((_, source)) = state.current.take() {
                self.output.stop(source);
            }
            match self.output.start(buffer, rate) {
                Ok(started) => {
                    state.current = Some((id, started.id));
                    state.needs_unlock = false;
                    if let Some(id) = id {
                        state.pending.retain(|p| *p != id);
                    }
                    started
                }
                Err(e) => {
                    tracing::warn!(error = %e, id = ?id, "failed to start playback");
                    return false;
                }
            }
        };

        tracing::debug!(id = ?id, rate, "playback started");
        if let Some(id) = id {
            self.events.emit(TutorEvent::PlaybackStarted(id));
        }
        self.watch_for_end(id, started);
        true
    }

    /// Wait for natural completion on a background task
    fn watch_for_end(&self, id: Option<MessageId>, started: StartedSource) {
        let this = self.clone();
        let StartedSource { id: source, ended } = started;
        tokio::spawn(async move {
            if ended.await.is_ok() {
                this.on_ended(id, source);
            }
        });
    }

    fn on_ended(&self, id: Option<MessageId>, source: SourceId) {
        let (shadow_ready, has_pending) = {
            let mut state = self.lock();
            if state.current.is_some_and(|(_, s)| s == source) {
                state.current = None;
            }
            let shadow = self.settings.read().is_ok_and(|s| s.shadow_mode);
            (shadow && state.is_idle(), !state.pending.is_empty())
        };

        if let Some(id) = id {
            tracing::debug!(%id, "playback finished");
            self.events.emit(TutorEvent::PlaybackFinished(id));
        }

        if has_pending {
            self.schedule_pending_retry(Duration::ZERO);
        } else if shadow_ready {
            self.schedule_shadow_restart();
        }
    }

    /// Queue a shadow-mode restart, replacing any pending one
    fn schedule_shadow_restart(&self) {
        let this = self.clone();
        self.scheduler
            .schedule(TaskKey::ShadowRestart, SHADOW_RESTART_DELAY, async move {
                // Conditions may have changed while waiting
                let enabled = this.settings.read().is_ok_and(|s| s.shadow_mode);
                let idle = this.lock().is_idle();
                if enabled && idle {
                    tracing::debug!("shadow mode restarting capture");
                    this.events.emit(TutorEvent::ShadowRestart);
                } else {
                    tracing::trace!(enabled, idle, "shadow restart skipped");
                }
            });
    }

    /// Cancel a scheduled shadow restart
    pub fn cancel_shadow_restart(&self) {
        self.scheduler.cancel(TaskKey::ShadowRestart);
    }

    fn schedule_pending_retry(&self, delay: Duration) {
        let this = self.clone();
        self.scheduler
            .schedule(TaskKey::PendingRetry, delay, async move {
                this.try_play_pending().await;
            });
    }

    /// Service the head of the pending queue
    ///
    /// A head without audio is retried after [`PENDING_RETRY_DELAY`] until
    /// [`MAX_PENDING_ATTEMPTS`] is exceeded, after which the unlock prompt is
    /// raised and retries stop. Returns whether the head started playing.
    pub async fn try_play_pending(&self) -> bool {
        let Some(head) = self.lock().pending.front().copied() else {
            return false;
        };

        let Some((buffer, _)) = self.audio_for(head) else {
            let gave_up = {
                let mut state = self.lock();
                state.pending_attempts += 1;
                if state.pending_attempts > MAX_PENDING_ATTEMPTS {
                    state.pending_attempts = 0;
                    state.needs_unlock = true;
                    true
                } else {
                    false
                }
            };
            if gave_up {
                tracing::warn!(id = %head, "pending audio never arrived, prompting for unlock");
                self.events.emit(TutorEvent::UnlockPrompt);
            } else {
                self.schedule_pending_retry(PENDING_RETRY_DELAY);
            }
            return false;
        };

        // A successful play removes the head from the queue
        if self.play(head, Some(buffer), None).await {
            let mut state = self.lock();
            state.pending_attempts = 0;
            tracing::debug!(id = %head, remaining = state.pending.len(), "pending playback started");
            true
        } else {
            self.lock().needs_unlock = true;
            false
        }
    }

    /// Resume the output and confirm it with an inaudible probe tone
    ///
    /// Resolves once the probe finishes or [`UNLOCK_TIMEOUT`] elapses.
    /// Returns whether the output is running.
    pub async fn unlock(&self) -> bool {
        let resumed = self.output.resume().await;
        if resumed == OutputState::Running {
            match self.output.play_effect(&probe_tone()) {
                Ok(done) => {
                    if tokio::time::timeout(UNLOCK_TIMEOUT, done).await.is_err() {
                        tracing::debug!("unlock probe timed out");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "unlock probe failed"),
            }
        }

        let running = self.output.state() == OutputState::Running;
        if running {
            self.lock().needs_unlock = false;
        }
        tracing::debug!(running, "audio unlock attempted");
        running
    }

    /// Treat a key press or click as a user gesture: unlock, then play the
    /// pending head
    pub async fn on_user_gesture(&self) -> GestureOutcome {
        if !self.unlock().await {
            return GestureOutcome::Locked;
        }

        let head = {
            let mut state = self.lock();
            state.pending_attempts = 0;
            state.pending.front().copied()
        };
        match head {
            Some(id) if self.try_play_pending().await => GestureOutcome::PlayedPending(id),
            _ => GestureOutcome::Unlocked,
        }
    }

    /// Cancel timers and stop playback
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
        self.stop();
    }

    fn audio_for(&self, id: MessageId) -> Option<(Arc<AudioBuffer>, Option<f32>)> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .audio_for(id)
    }

    fn global_rate(&self) -> f32 {
        self.settings.read().map_or(1.0, |s| s.speech_rate)
    }
}
