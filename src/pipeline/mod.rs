//! Recording pipeline orchestration.
//!
//! This module wires the capture → transcribe → post-process lifecycle and
//! exposes the channels external collaborators talk to.
//!
//! # Architecture
//!
//! ```text
//! SessionCommand (mpsc, from PipelineTrigger)
//!        │
//!        ▼
//! RecordingOrchestrator::run()  ← async tokio task, transitions serialized
//!        │
//!        ├─ Start → SwapSlot<dyn CaptureSource>.get() → start_capture
//!        │
//!        └─ Stop
//!              ├─ stop_capture → RecordedAudio
//!              ├─ spawn_blocking(TranscriptionEngine::transcribe)
//!              └─ PostProcessor::process (best-effort)
//!
//! SessionEvent (mpsc) ──▶ external listeners, in transition order
//! FailureReport{Infrastructure} ──▶ RecoverySupervisor (before Idle reset)
//! ```

pub mod orchestrator;
pub mod slot;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use orchestrator::{
    command_channel, PipelineTrigger, RecordingOrchestrator, SessionCommand, SessionEvent,
};
pub use slot::SwapSlot;
pub use state::{Phase, Session};
