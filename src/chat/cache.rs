//! Vocabulary audio cache
//!
//! Keyed by voice and term. Populated speculatively and never evicted
//! within a session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::voice::AudioBuffer;

/// Shared `(voice, term) -> audio` cache
#[derive(Debug, Clone, Default)]
pub struct VocabularyCache {
    entries: Arc<Mutex<HashMap<(String, String), Arc<AudioBuffer>>>>,
}

impl VocabularyCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(voice: &str, term: &str) -> (String, String) {
        (voice.to_string(), term.trim().to_lowercase())
    }

    #[must_use]
    pub fn get(&self, voice: &str, term: &str) -> Option<Arc<AudioBuffer>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(voice, term))
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, voice: &str, term: &str) -> bool {
        self.get(voice, term).is_some()
    }

    /// Store audio for a term; an existing entry is kept
    pub fn insert(&self, voice: &str, term: &str, audio: Arc<AudioBuffer>) -> Arc<AudioBuffer> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(Self::key(voice, term))
            .or_insert(audio)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
