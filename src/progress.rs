//! Progress counters and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

/// Byte counters for one extract or archive operation.
///
/// `loaded` never exceeds `total` and never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    loaded: u64,
    total: u64,
}

impl ProgressState {
    pub fn new(total: u64) -> Self {
        Self { loaded: 0, total }
    }

    pub fn loaded(&self) -> u64 {
        self.loaded
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Add `bytes` to `loaded`, saturating at `total`.
    pub fn advance(&mut self, bytes: u64) {
        self.loaded = self.loaded.saturating_add(bytes).min(self.total);
    }

    /// Mark the operation as fully processed.
    pub fn complete(&mut self) {
        self.loaded = self.total;
    }

    pub fn is_complete(&self) -> bool {
        self.loaded == self.total
    }

    pub fn event(&self) -> ProgressEvent {
        ProgressEvent {
            loaded: self.loaded,
            total: self.total,
        }
    }
}

/// Wire form of a progress update: `{"loaded": n, "total": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub loaded: u64,
    pub total: u64,
}

impl ProgressEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Cancellation flag shared between an operation and its caller.
///
/// Checked between entries; an entry in flight always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_saturates_at_total() {
        let mut p = ProgressState::new(10);
        p.advance(4);
        p.advance(4);
        assert_eq!(p.loaded(), 8);
        p.advance(100);
        assert_eq!(p.loaded(), 10);
        assert!(p.is_complete());
    }

    #[test]
    fn event_json_shape() {
        let mut p = ProgressState::new(42);
        p.advance(7);
        assert_eq!(p.event().to_json(), r#"{"loaded":7,"total":42}"#);
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
