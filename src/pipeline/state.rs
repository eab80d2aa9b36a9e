//! Session lifecycle state.
//!
//! [`Phase`] drives the orchestrator's state machine; [`Session`] is the
//! orchestrator's exclusively-owned record of one capture-to-text run.
//!
//! ```text
//! Idle ──start──▶ Capturing ──stop──▶ Transcribing ──▶ PostProcessing ──▶ Idle
//! any active phase ──fatal failure──▶ Idle
//! ```

use std::time::Instant;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Position of the orchestrator in the session lifecycle.
///
/// Exactly one session is active at a time; a start request while any
/// active phase is in progress is rejected, never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a start trigger.
    Idle,
    /// The capture source is filling the session's buffer.
    Capturing,
    /// The transcription engine is running on the blocking thread pool.
    Transcribing,
    /// The best-effort post-processor is running.
    PostProcessing,
}

impl Phase {
    /// Returns `true` while a session is in progress.
    ///
    /// ```
    /// use voice_pipeline::pipeline::Phase;
    ///
    /// assert!(!Phase::Idle.is_active());
    /// assert!(Phase::Capturing.is_active());
    /// assert!(Phase::Transcribing.is_active());
    /// assert!(Phase::PostProcessing.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        !matches!(self, Phase::Idle)
    }

    /// A short human-readable label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Capturing => "Capturing",
            Phase::Transcribing => "Transcribing",
            Phase::PostProcessing => "PostProcessing",
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Idle
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One capture-to-text lifecycle instance.
///
/// Created on the start trigger and discarded when the orchestrator returns
/// to [`Phase::Idle`], successfully or not.  The raw audio buffer is owned
/// by the session between capture stop and transcription, then released.
#[derive(Debug, Clone)]
pub struct Session {
    /// Monotonically increasing identifier, unique per orchestrator.
    pub id: u64,
    /// Current lifecycle phase.
    pub phase: Phase,
    /// When the session was created.
    pub started_at: Instant,
    /// Final text, set just before the session is emitted.
    pub text: Option<String>,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            phase: Phase::Idle,
            started_at: Instant::now(),
            text: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
