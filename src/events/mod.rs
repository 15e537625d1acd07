//! Session events for the front end
//!
//! Components publish through an [`EventSender`]. Publishing is best-effort;
//! a closed receiver never fails the caller.

use tokio::sync::mpsc;

use crate::chat::{Message, MessageId};
use crate::tutor::SystemCommand;

/// Something the UI should reflect
#[derive(Debug, Clone)]
pub enum TutorEvent {
    /// Microphone capture began
    RecordingStarted,
    /// Microphone capture ended
    RecordingStopped,
    /// Waiting on the analysis service
    Loading(bool),
    /// A message was appended and can be rendered
    MessageAdded(Box<Message>),
    /// Synthesized audio was attached to a message
    AudioAttached(MessageId),
    /// A message started playing
    PlaybackStarted(MessageId),
    /// A message finished playing naturally
    PlaybackFinished(MessageId),
    /// Output is blocked; a user gesture is needed
    NeedsUnlock,
    /// Pending retries gave up; ask the user to unlock explicitly
    UnlockPrompt,
    /// Shadow mode wants a new recording
    ShadowRestart,
    /// The tutor asked for a client-side change
    Command(SystemCommand),
    /// User-facing error
    Alert(String),
}

/// Sending half of the event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<TutorEvent>>,
}

impl EventSender {
    /// New channel pair
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TutorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sender that drops every event
    #[must_use]
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish an event
    pub fn emit(&self, event: TutorEvent) {
        tracing::trace!(?event, "event");
        if let Some(tx) = &self.tx
            && tx.send(event).is_err()
        {
            tracing::trace!("event receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_in_order() {
        let (events, mut rx) = EventSender::channel();
        events.emit(TutorEvent::Loading(true));
        events.emit(TutorEvent::Loading(false));

        assert!(matches!(rx.try_recv(), Ok(TutorEvent::Loading(true))));
        assert!(matches!(rx.try_recv(), Ok(TutorEvent::Loading(false))));
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (events, rx) = EventSender::channel();
        drop(rx);
        events.emit(TutorEvent::NeedsUnlock);
        EventSender::disabled().emit(TutorEvent::NeedsUnlock);
    }
}
