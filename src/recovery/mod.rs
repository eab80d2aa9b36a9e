//! Recovery supervision for the pipeline's swappable dependencies.
//!
//! This module provides:
//! * [`RecoverySupervisor`] — classifies forwarded failure reports, polls
//!   dependency health, and hot-swaps replacements into the orchestrator.
//! * [`CaptureSourceFactory`] / [`TranscriptionEngineFactory`] — the
//!   construction seam the supervisor owns (and tests fake).
//! * [`build_capture_with_fallback`] / [`build_engine_with_fallback`] — the
//!   preferred-then-fallback construction ladders, shared between startup
//!   wiring and recovery.
//! * [`RecoveryAttempt`] — the per-cycle record used for retry bounds and
//!   notifications.

pub mod factory;
pub mod supervisor;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use factory::{
    CaptureSourceFactory, DeviceCaptureFactory, TranscriptionEngineFactory, WhisperEngineFactory,
};
pub use supervisor::{
    build_capture_with_fallback, build_engine_with_fallback, MonitorHandle, RecoveryAttempt,
    RecoveryOutcome, RecoverySupervisor, RecoveryTarget,
};

#[cfg(test)]
pub use factory::{MockCaptureFactory, MockEngineFactory};
