//! Progress and diagnostic events emitted by the build engine.
//!
//! The core never prints: every user-visible line is an [`Event`] handed to
//! a [`Reporter`]. Concrete rendering (colors, quiet mode, progress
//! formatting) lives with whoever owns the terminal, normally the `brisk`
//! binary.

use std::sync::Arc;

/// How a diagnostic line should be classified by the renderer.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Severity {
    /// Informational output, suppressed in quiet mode.
    Info,

    /// An external or built-in command about to run, suppressed in quiet mode.
    Command,

    /// A reversed built-in verb running in undo mode.
    Undo,

    /// A non-fatal problem; the build continues.
    Warn,

    /// A fatal problem; the build is about to stop.
    Error,

    /// A file or directory removal during remove mode.
    Remove,
}

/// A single event emitted by the engine.
#[derive(Clone, Debug)]
pub enum Event {
    /// A severity-tagged diagnostic line.
    Message { severity: Severity, text: String },

    /// A compile step was submitted for the `iteration`-th source
    /// (1-based) out of `total`.
    ///
    /// Iteration numbers follow submission order, not completion order, so
    /// a renderer may observe them out of sequence under parallelism.
    Compile {
        iteration: usize,
        total: usize,
        name: String,
    },
}

/// Receives engine events. Implementations decide rendering.
pub trait Reporter: Send + Sync {
    fn emit(&self, event: Event);
}

/// Convenience handle used throughout the engine.
pub type ReporterHandle = Arc<dyn Reporter>;

/// A sink that discards every event. Useful in tests.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn emit(&self, _event: Event) {}
}

/// Emit a [`Event::Message`] with less ceremony at call sites.
pub fn message(reporter: &ReporterHandle, severity: Severity, text: impl Into<String>) {
    reporter.emit(Event::Message {
        severity,
        text: text.into(),
    });
}
