//! Failure classification types shared by the whole pipeline.
//!
//! Every fallible domain operation produces an error that maps onto exactly
//! one [`ErrorCategory`]; the orchestrator wraps it into a [`FailureReport`]
//! at the failure site.  Reports are immutable and consumed exactly once:
//! `Infrastructure` reports go to the recovery supervisor, `Process` and
//! `Logic` reports are surfaced to event listeners only.

use crate::pipeline::Phase;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Closed classification of pipeline failures.
///
/// | Category         | Meaning                         | Recovery |
/// |------------------|---------------------------------|----------|
/// | `Infrastructure` | dependency unusable             | yes      |
/// | `Process`        | one operation failed            | no       |
/// | `Logic`          | programming invariant violated  | no       |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A dependency (device, engine backend) is unusable; the recovery
    /// supervisor must run.
    Infrastructure,
    /// A single operation failed; the current session aborts, the
    /// dependency stays in place.
    Process,
    /// An internal invariant was violated.  Logged at error level and
    /// treated as a defect, never recovered from at runtime.
    Logic,
}

impl ErrorCategory {
    /// Short lowercase label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::Infrastructure => "infrastructure",
            ErrorCategory::Process => "process",
            ErrorCategory::Logic => "logic",
        }
    }
}

// ---------------------------------------------------------------------------
// FailureSource
// ---------------------------------------------------------------------------

/// Which pipeline component produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    Capture,
    Transcription,
    PostProcessor,
}

impl FailureSource {
    pub fn label(&self) -> &'static str {
        match self {
            FailureSource::Capture => "capture",
            FailureSource::Transcription => "transcription",
            FailureSource::PostProcessor => "post-processor",
        }
    }
}

// ---------------------------------------------------------------------------
// FailureReport
// ---------------------------------------------------------------------------

/// Immutable record of one classified failure, built where it happened.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub category: ErrorCategory,
    pub source: FailureSource,
    /// Human-readable description (the underlying error's `Display` output).
    pub message: String,
    /// Which phase the session was in when the failure occurred.
    pub occurred_during: Phase,
}

impl FailureReport {
    pub fn new(
        category: ErrorCategory,
        source: FailureSource,
        message: impl Into<String>,
        occurred_during: Phase,
    ) -> Self {
        Self {
            category,
            source,
            message: message.into(),
            occurred_during,
        }
    }
}

impl std::fmt::Display for FailureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failure in {} during {}: {}",
            self.category.label(),
            self.source.label(),
            self.occurred_during.label(),
            self.message
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
