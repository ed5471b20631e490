//! Termination signal for the capture loop.
//!
//! The loop asks `is_signaled()` once per cycle, before acquiring a frame.
//! Nothing interrupts a cycle in flight.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait TerminationSignal {
    fn is_signaled(&self) -> bool;
}

/// Closures make convenient ad-hoc signals.
impl<F: Fn() -> bool> TerminationSignal for F {
    fn is_signaled(&self) -> bool {
        self()
    }
}

/// Shared stop flag, raised by Ctrl-C / SIGTERM or by hand.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag {
    raised: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag on SIGINT or SIGTERM.
    ///
    /// Only one process-wide handler can exist; a second call fails.
    pub fn install_signal_handler(&self) -> Result<()> {
        let raised = Arc::clone(&self.raised);
        ctrlc::set_handler(move || {
            raised.store(true, Ordering::SeqCst);
        })
        .context("install shutdown signal handler")
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }
}

impl TerminationSignal for ShutdownFlag {
    fn is_signaled(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}
