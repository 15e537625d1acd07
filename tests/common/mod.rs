//! Shared test utilities
//!
//! In-memory stand-ins for the audio devices, the tutor service and the local
//! synthesizer, so the pipeline runs without hardware or network.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, oneshot};

use voice_tutor::chat::{Conversation, Message, MessageId, OrchestratorOptions, SharedConversation};
use voice_tutor::settings::{Settings, SharedSettings};
use voice_tutor::speech::LocalSpeech;
use voice_tutor::tutor::{
    Analysis, ContextTurn, RephraseStyle, RetryPolicy, TutorParams, TutorReply, TutorService,
};
use voice_tutor::voice::{
    AudioBuffer, AudioOutput, CaptureStream, Clip, LevelSource, Microphone, OutputState,
    PlaybackCoordinator, SessionState, SourceId, StartedSource, encode_base64, samples_to_wav,
};
use voice_tutor::{Error, EventSender, ResponseOrchestrator, Result, TutorEvent};

// -- Output -------------------------------------------------------------------

/// Output whose lock state and source endings are driven by the test
pub struct FakeOutput {
    state: Mutex<OutputState>,
    resumable: AtomicBool,
    next_id: AtomicU64,
    started: Mutex<Vec<(SourceId, f32, usize)>>,
    stopped: Mutex<Vec<SourceId>>,
    endings: Mutex<HashMap<SourceId, oneshot::Sender<()>>>,
    effects: AtomicUsize,
}

impl FakeOutput {
    /// Output that is already running
    pub fn running() -> Arc<Self> {
        Arc::new(Self::with_state(OutputState::Running, true))
    }

    /// Suspended output that refuses to resume until [`FakeOutput::allow_resume`]
    pub fn locked() -> Arc<Self> {
        Arc::new(Self::with_state(OutputState::Suspended, false))
    }

    /// Suspended output that starts running on the first resume
    pub fn suspended() -> Arc<Self> {
        Arc::new(Self::with_state(OutputState::Suspended, true))
    }

    fn with_state(state: OutputState, resumable: bool) -> Self {
        Self {
            state: Mutex::new(state),
            resumable: AtomicBool::new(resumable),
            next_id: AtomicU64::new(1),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            endings: Mutex::new(HashMap::new()),
            effects: AtomicUsize::new(0),
        }
    }

    /// Let the next resume succeed (a user gesture happened)
    pub fn allow_resume(&self) {
        self.resumable.store(true, Ordering::SeqCst);
    }

    /// Sources started so far: id, rate and sample count
    pub fn started(&self) -> Vec<(SourceId, f32, usize)> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.stopped.lock().unwrap().clone()
    }

    /// Sources started and neither stopped nor finished
    pub fn active(&self) -> usize {
        self.endings.lock().unwrap().len()
    }

    pub fn effects(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Complete every active source naturally
    pub fn finish_all(&self) {
        let endings: Vec<_> = self.endings.lock().unwrap().drain().collect();
        for (_, tx) in endings {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    fn state(&self) -> OutputState {
        *self.state.lock().unwrap()
    }

    async fn resume(&self) -> OutputState {
        // Resuming a real device is asynchronous; let other callers interleave
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        if self.resumable.load(Ordering::SeqCst) && *state == OutputState::Suspended {
            *state = OutputState::Running;
        }
        *state
    }

    fn start(&self, buffer: Arc<AudioBuffer>, rate: f32) -> Result<StartedSource> {
        if self.state() != OutputState::Running {
            return Err(Error::Audio("output suspended".to_string()));
        }
        let id = SourceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, ended) = oneshot::channel();
        self.started.lock().unwrap().push((id, rate, buffer.len()));
        self.endings.lock().unwrap().insert(id, tx);
        Ok(StartedSource { id, ended })
    }

    fn stop(&self, id: SourceId) {
        // Dropping the sender signals an early stop
        if self.endings.lock().unwrap().remove(&id).is_some() {
            self.stopped.lock().unwrap().push(id);
        }
    }

    fn play_effect(&self, _buffer: &AudioBuffer) -> Result<oneshot::Receiver<()>> {
        if self.state() != OutputState::Running {
            return Err(Error::Audio("output suspended".to_string()));
        }
        self.effects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Ok(rx)
    }
}

// -- Microphone ---------------------------------------------------------------

/// Microphone that replays fixed chunks, or refuses access
pub struct FakeMicrophone {
    chunks: Vec<Vec<f32>>,
    deny: bool,
}

impl FakeMicrophone {
    pub fn with_chunks(chunks: Vec<Vec<f32>>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            deny: false,
        })
    }

    pub fn silent() -> Arc<Self> {
        Self::with_chunks(Vec::new())
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            chunks: Vec::new(),
            deny: true,
        })
    }
}

impl Microphone for FakeMicrophone {
    fn open(&self) -> Result<Box<dyn CaptureStream>> {
        if self.deny {
            return Err(Error::PermissionDenied("denied by test".to_string()));
        }
        Ok(Box::new(FakeStream {
            chunks: self.chunks.clone(),
        }))
    }
}

struct FakeStream {
    chunks: Vec<Vec<f32>>,
}

impl CaptureStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn level_source(&self) -> Box<dyn LevelSource> {
        Box::new(FlatLevels)
    }

    fn finish(self: Box<Self>) -> Vec<Vec<f32>> {
        self.chunks
    }
}

struct FlatLevels;

impl LevelSource for FlatLevels {
    fn frequency_bins(&mut self) -> Vec<u8> {
        vec![0; 128]
    }
}

// -- Tutor service ------------------------------------------------------------

/// Scripted tutor service
#[derive(Default)]
pub struct FakeService {
    analyses: Mutex<VecDeque<Result<Analysis>>>,
    synth_failures: Mutex<VecDeque<Error>>,
    synth_texts: Mutex<Vec<String>>,
    rephrases: AtomicUsize,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the next analysis result
    pub fn push_analysis(&self, result: Result<Analysis>) {
        self.analyses.lock().unwrap().push_back(result);
    }

    /// Make the next synthesis call fail with `error`
    pub fn fail_next_synthesis(&self, error: Error) {
        self.synth_failures.lock().unwrap().push_back(error);
    }

    pub fn synth_calls(&self) -> usize {
        self.synth_texts.lock().unwrap().len()
    }

    pub fn synth_texts(&self) -> Vec<String> {
        self.synth_texts.lock().unwrap().clone()
    }

    pub fn rephrase_calls(&self) -> usize {
        self.rephrases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TutorService for FakeService {
    async fn analyze(
        &self,
        _clip: &Clip,
        _context: &[ContextTurn],
        _params: &TutorParams,
    ) -> Result<Analysis> {
        self.analyses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Tutor("no scripted analysis".to_string())))
    }

    async fn synthesize(&self, text: &str, _voice: &str) -> Result<String> {
        self.synth_texts.lock().unwrap().push(text.to_string());
        if let Some(error) = self.synth_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(pcm_base64(2400))
    }

    async fn rephrase(
        &self,
        text: &str,
        style: RephraseStyle,
        _params: &TutorParams,
    ) -> Result<TutorReply> {
        self.rephrases.fetch_add(1, Ordering::SeqCst);
        Ok(TutorReply::text(format!("{text} ({})", style.as_str())))
    }
}

// -- Local speech -------------------------------------------------------------

/// Records what it was asked to say
#[derive(Default)]
pub struct FakeSpeech {
    spoken: Mutex<Vec<(String, String, f32)>>,
    hold: bool,
    speaking: AtomicUsize,
    cancels: AtomicUsize,
    cancelled: Notify,
}

impl FakeSpeech {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Speech that keeps talking until cancelled
    pub fn holding() -> Arc<Self> {
        Arc::new(Self {
            hold: true,
            ..Self::default()
        })
    }

    /// Utterances in progress
    pub fn speaking(&self) -> usize {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Texts spoken so far
    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _, _)| text.clone())
            .collect()
    }

    pub fn languages(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(_, lang, _)| lang.clone())
            .collect()
    }
}

#[async_trait]
impl LocalSpeech for FakeSpeech {
    async fn speak(&self, text: &str, language: &str, rate: f32) -> Result<bool> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), language.to_string(), rate));
        if !self.hold {
            return Ok(true);
        }

        self.speaking.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notified().await;
        self.speaking.fetch_sub(1, Ordering::SeqCst);
        Ok(false)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.speaking() > 0 {
            self.cancelled.notify_waiters();
        }
    }
}

// -- Builders -----------------------------------------------------------------

/// Base64 PCM16 of a quiet ramp, `samples` long
pub fn pcm_base64(samples: usize) -> String {
    let bytes: Vec<u8> = (0..samples)
        .flat_map(|i| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let s = (i % 200) as i16 * 10;
            s.to_le_bytes()
        })
        .collect();
    encode_base64(&bytes)
}

/// One second of 16 kHz audio as a finished clip
pub fn clip() -> Clip {
    let samples = vec![0.1; 16000];
    Clip {
        wav: samples_to_wav(&samples, 16000).unwrap(),
        sample_rate: 16000,
        duration: Duration::from_secs(1),
        elapsed: Duration::from_secs(1),
    }
}

/// Analysis with a plain reply
pub fn analysis(transcript: &str, reply: &str) -> Analysis {
    Analysis {
        user_transcript: transcript.to_string(),
        user_transliteration: None,
        detected_language: Some("es".to_string()),
        reply: TutorReply::text(reply),
    }
}

/// Short buffer for direct playback
pub fn buffer() -> Arc<AudioBuffer> {
    Arc::new(AudioBuffer::new(vec![0.1; 240], 24000))
}

/// Drain everything published so far
pub fn drain(rx: &mut mpsc::UnboundedReceiver<TutorEvent>) -> Vec<TutorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Let spawned tasks run (time is paused in most tests)
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Orchestrator wired to fakes
pub struct Harness {
    pub orchestrator: ResponseOrchestrator,
    pub service: Arc<FakeService>,
    pub speech: Arc<FakeSpeech>,
    pub output: Arc<FakeOutput>,
    pub settings: SharedSettings,
    pub events: mpsc::UnboundedReceiver<TutorEvent>,
}

impl Harness {
    pub fn new(output: Arc<FakeOutput>, settings: Settings) -> Self {
        Self::with_parts(output, settings, FakeMicrophone::silent(), FakeSpeech::new())
    }

    pub fn with_microphone(
        output: Arc<FakeOutput>,
        settings: Settings,
        microphone: Arc<FakeMicrophone>,
    ) -> Self {
        Self::with_parts(output, settings, microphone, FakeSpeech::new())
    }

    pub fn with_parts(
        output: Arc<FakeOutput>,
        settings: Settings,
        microphone: Arc<FakeMicrophone>,
        speech: Arc<FakeSpeech>,
    ) -> Self {
        let service = FakeService::new();
        let settings = settings.shared();
        let (events, rx) = EventSender::channel();

        let orchestrator = ResponseOrchestrator::new(
            Arc::clone(&service) as Arc<dyn TutorService>,
            Arc::clone(&speech) as Arc<dyn LocalSpeech>,
            microphone,
            Arc::clone(&output) as Arc<dyn AudioOutput>,
            Conversation::new().shared(),
            Arc::clone(&settings),
            events,
            OrchestratorOptions {
                retry: RetryPolicy::default(),
                ..OrchestratorOptions::default()
            },
        );

        Self {
            orchestrator,
            service,
            speech,
            output,
            settings,
            events: rx,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.orchestrator
            .conversation()
            .lock()
            .unwrap()
            .messages()
            .to_vec()
    }
}

/// Bare coordinator over a fresh conversation
pub struct CoordinatorHarness {
    pub coordinator: PlaybackCoordinator,
    pub conversation: SharedConversation,
    pub output: Arc<FakeOutput>,
    pub events: mpsc::UnboundedReceiver<TutorEvent>,
}

impl CoordinatorHarness {
    pub fn new(output: Arc<FakeOutput>, settings: Settings) -> Self {
        let conversation = Conversation::new().shared();
        let (events, rx) = EventSender::channel();
        let coordinator = PlaybackCoordinator::new(
            Arc::clone(&output) as Arc<dyn AudioOutput>,
            Arc::new(Mutex::new(SessionState::default())),
            Arc::clone(&conversation),
            settings.shared(),
            events,
        );
        Self {
            coordinator,
            conversation,
            output,
            events: rx,
        }
    }

    /// Add a tutor message, with audio attached when `audio` is set
    pub fn add_reply(&self, text: &str, audio: bool) -> MessageId {
        let mut convo = self.conversation.lock().unwrap();
        let id = convo.push(Message::bot(TutorReply::text(text)));
        if audio {
            convo.attach_audio(id, buffer()).unwrap();
        }
        id
    }

    pub fn attach(&self, id: MessageId) {
        self.conversation
            .lock()
            .unwrap()
            .attach_audio(id, buffer())
            .unwrap();
    }
}
