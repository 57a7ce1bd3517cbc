// src/progress.rs

//! Progress reporting capability
//!
//! Service control can block for seconds per unit (graceful-stop waits),
//! so noteworthy events are surfaced through an injected reporter rather
//! than logged ad hoc. The controller uses it exactly once per unit that
//! refuses a graceful stop.
//!
//! Implementations must be thread-safe: callers may parallelize removal
//! of independent units.

use tracing::info;

/// Side channel for user-visible progress messages.
pub trait ProgressReporter: Send + Sync {
    fn notify(&self, message: &str);
}

/// No-op reporter for quiet or scripted use.
#[derive(Debug, Default)]
pub struct SilentProgress;

impl SilentProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for SilentProgress {
    fn notify(&self, _message: &str) {}
}

/// Reporter that forwards messages to tracing at info level.
#[derive(Debug, Default)]
pub struct LogProgress;

impl LogProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for LogProgress {
    fn notify(&self, message: &str) {
        info!("{}", message);
    }
}
