//! Interrupt handling for an in-flight measurement.
//!
//! A SIGINT (Ctrl+C) while the subject is running must kill the subject
//! before the supervisor returns. The handler only flips a flag; the
//! supervisor polls it from its bounded wait loop and does the killing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{MeterError, Result};

/// Shared interrupt flag, optionally wired to SIGINT.
///
/// Clones share the same flag, so the binary can keep one copy and hand
/// another to [`ProcessSupervisor`](crate::ProcessSupervisor).
///
/// # Example
///
/// ```ignore
/// let handler = SignalHandler::new()?;
/// let supervisor = ProcessSupervisor::new(options).with_interrupt(handler.clone());
/// ```
#[derive(Clone, Debug)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Creates a new `SignalHandler` and registers it for SIGINT.
    ///
    /// # Errors
    ///
    /// Returns an error if a process-wide handler is already registered.
    pub fn new() -> Result<Self> {
        let handler = Self::detached();
        let flag_clone = Arc::clone(&handler.shutdown_flag);

        ctrlc::set_handler(move || {
            flag_clone.store(true, Ordering::SeqCst);
        })
        .map_err(|e| MeterError::SignalHandler(e.to_string()))?;

        Ok(handler)
    }

    /// Creates a flag that is not connected to any OS signal.
    ///
    /// Useful when the embedding program has its own interrupt story and
    /// only needs to cancel a run via [`request_shutdown`](Self::request_shutdown).
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Checks if a shutdown has been requested (non-blocking).
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    /// Requests shutdown as if SIGINT had been received.
    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_starts_clear() {
        let handler = SignalHandler::detached();
        assert!(!handler.is_shutdown_requested());
    }

    #[test]
    fn test_request_shutdown_sets_flag() {
        let handler = SignalHandler::detached();
        handler.request_shutdown();
        assert!(handler.is_shutdown_requested());
    }

    #[test]
    fn test_clone_shares_state() {
        let handler1 = SignalHandler::detached();
        let handler2 = handler1.clone();

        assert!(!handler2.is_shutdown_requested());
        handler1.request_shutdown();
        assert!(handler2.is_shutdown_requested());
    }

    #[test]
    fn test_flag_visible_across_threads() {
        let handler = SignalHandler::detached();
        let remote = handler.clone();

        std::thread::spawn(move || remote.request_shutdown())
            .join()
            .unwrap();

        assert!(handler.is_shutdown_requested());
    }
}
