//! Adaptive reply pacing
//!
//! Replies are slowed down for slow speakers and sped up for fast ones,
//! based on the learner's words per minute.

use std::time::Duration;

/// Speaking rate that maps to normal playback speed
pub const REFERENCE_WPM: f32 = 130.0;

/// Slowest pacing rate
pub const MIN_PACING_RATE: f32 = 0.8;

/// Fastest pacing rate
pub const MAX_PACING_RATE: f32 = 1.2;

/// Words per minute of `transcript` spoken over `duration`
///
/// Returns `None` for an empty transcript or zero-length clip.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn words_per_minute(transcript: &str, duration: Duration) -> Option<f32> {
    let words = transcript.split_whitespace().count();
    let minutes = duration.as_secs_f32() / 60.0;
    if words == 0 || minutes <= 0.0 {
        return None;
    }
    Some(words as f32 / minutes)
}

/// Playback rate for a reply to `transcript`
#[must_use]
pub fn pacing_rate(transcript: &str, duration: Duration) -> Option<f32> {
    words_per_minute(transcript, duration)
        .map(|wpm| (wpm / REFERENCE_WPM).clamp(MIN_PACING_RATE, MAX_PACING_RATE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn reference_pace_is_normal_speed() {
        // 13 words in 6 seconds = 130 wpm
        let text = "uno dos tres cuatro cinco seis siete ocho nueve diez once doce trece";
        let rate = pacing_rate(text, Duration::from_secs(6)).unwrap();
        assert!(close(rate, 1.0));
    }

    #[test]
    fn rate_is_clamped() {
        let slow = pacing_rate("hola", Duration::from_secs(10)).unwrap();
        assert!(close(slow, MIN_PACING_RATE));

        let fast = pacing_rate("uno dos tres cuatro cinco", Duration::from_secs(1)).unwrap();
        assert!(close(fast, MAX_PACING_RATE));
    }

    #[test]
    fn in_range_rate_is_proportional() {
        // 2 words in 1 second = 120 wpm
        let rate = pacing_rate("buenos días", Duration::from_secs(1)).unwrap();
        assert!(close(rate, 120.0 / 130.0));
    }

    #[test]
    fn nothing_to_measure() {
        assert!(pacing_rate("", Duration::from_secs(2)).is_none());
        assert!(pacing_rate("hola", Duration::ZERO).is_none());
    }
}
