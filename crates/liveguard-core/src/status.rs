//! Debounced user-facing status.
//!
//! The session phase changes immediately on every frame; what the user sees
//! does not. A new status is only shown once the previous one has been
//! visible for the debounce window of the new status's tone. Lifecycle
//! transitions (session start, terminal outcomes) bypass the window.

use serde::{Deserialize, Serialize};

use crate::session::Phase;

/// Whether a status encourages or corrects the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub phase: Phase,
    pub text: String,
    pub hint: Option<String>,
    pub tone: Tone,
    /// `(live frames so far, live frames required)`.
    pub progress: Option<(u32, u32)>,
}

impl StatusUpdate {
    pub fn new(phase: Phase, tone: Tone, text: impl Into<String>) -> Self {
        Self {
            phase,
            text: text.into(),
            hint: None,
            tone,
            progress: None,
        }
    }

    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_progress(mut self, done: u32, required: u32) -> Self {
        self.progress = Some((done, required));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub negative_ms: u64,
    pub positive_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            negative_ms: 1000,
            positive_ms: 300,
        }
    }
}

impl DebounceConfig {
    fn window(&self, tone: Tone) -> u64 {
        match tone {
            Tone::Positive => self.positive_ms,
            Tone::Negative => self.negative_ms,
        }
    }
}

/// The status currently shown, and when it was last changed.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    config: DebounceConfig,
    current: Option<StatusUpdate>,
    changed_at: Option<u64>,
}

impl StatusBoard {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            current: None,
            changed_at: None,
        }
    }

    pub fn current(&self) -> Option<&StatusUpdate> {
        self.current.as_ref()
    }

    pub fn changed_at(&self) -> Option<u64> {
        self.changed_at
    }

    /// Offer a frame-driven status. Returns whether it became visible.
    pub fn request(&mut self, update: StatusUpdate, now_ms: u64) -> bool {
        if self.current.as_ref() == Some(&update) {
            return false;
        }
        if update.phase == Phase::Authenticated {
            return self.force(update, now_ms);
        }
        if let Some(at) = self.changed_at {
            let elapsed = now_ms.saturating_sub(at);
            let window = self.config.window(update.tone);
            if elapsed < window {
                tracing::trace!(elapsed, window, text = %update.text, "status debounced");
                return false;
            }
        }
        self.force(update, now_ms)
    }

    /// Show a status regardless of the debounce window.
    pub fn force(&mut self, update: StatusUpdate, now_ms: u64) -> bool {
        if self.current.as_ref() == Some(&update) {
            return false;
        }
        self.current = Some(update);
        self.changed_at = Some(now_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negative(text: &str) -> StatusUpdate {
        StatusUpdate::new(Phase::Monitoring, Tone::Negative, text)
    }

    #[test]
    fn test_first_update_always_applies() {
        let mut board = StatusBoard::new(DebounceConfig::default());
        assert!(board.request(negative("no face"), 0));
        assert_eq!(board.current().unwrap().text, "no face");
    }

    #[test]
    fn test_second_update_inside_window_suppressed() {
        let mut board = StatusBoard::new(DebounceConfig::default());
        assert!(board.request(negative("no face"), 0));
        assert!(!board.request(negative("move closer"), 400));
        assert_eq!(board.current().unwrap().text, "no face");
        assert!(board.request(negative("move closer"), 1000));
        assert_eq!(board.current().unwrap().text, "move closer");
    }

    #[test]
    fn test_positive_window_is_shorter() {
        let mut board = StatusBoard::new(DebounceConfig::default());
        board.request(negative("no face"), 0);
        let hold = StatusUpdate::new(Phase::Analyzing, Tone::Positive, "hold still");
        assert!(!board.request(hold.clone(), 200));
        assert!(board.request(hold, 300));
    }

    #[test]
    fn test_authenticated_never_suppressed() {
        let mut board = StatusBoard::new(DebounceConfig::default());
        board.request(negative("no face"), 0);
        let done = StatusUpdate::new(Phase::Authenticated, Tone::Positive, "welcome");
        assert!(board.request(done, 1));
        assert_eq!(board.current().unwrap().phase, Phase::Authenticated);
    }

    #[test]
    fn test_same_update_is_idempotent() {
        let mut board = StatusBoard::new(DebounceConfig::default());
        assert!(board.request(negative("no face"), 0));
        assert!(!board.request(negative("no face"), 5000));
        assert_eq!(board.changed_at(), Some(0));
    }
}
