//! Shared status line consumed by the host UI.

use std::sync::{Arc, Mutex};

/// A cloneable, single-line status cell.
///
/// The delivery loop writes to it synchronously before yielding control;
/// the host UI polls [`StatusLine::get`] whenever it redraws. Empty text
/// means idle.
#[derive(Debug, Clone, Default)]
pub struct StatusLine {
    text: Arc<Mutex<String>>,
}

impl StatusLine {
    /// Create an empty status line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status text.
    pub fn set(&self, text: impl Into<String>) {
        *self.text.lock().expect("lock poisoned") = text.into();
    }

    /// Clear the status text (idle).
    pub fn clear(&self) {
        self.set("");
    }

    /// Current status text.
    pub fn get(&self) -> String {
        self.text.lock().expect("lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let status = StatusLine::new();
        assert_eq!(status.get(), "");

        status.set("Sending data to Starlog...");
        assert_eq!(status.get(), "Sending data to Starlog...");

        status.clear();
        assert_eq!(status.get(), "");
    }

    #[test]
    fn clones_share_state() {
        let status = StatusLine::new();
        let other = status.clone();

        status.set("busy");
        assert_eq!(other.get(), "busy");
    }
}
