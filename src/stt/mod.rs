//! Speech-to-text engine module.
//!
//! [`TranscriptionEngine`] is the trait the orchestrator transcribes
//! through and the recovery supervisor hot-swaps; [`WhisperEngine`] is the
//! production implementation on a chosen [`ComputeBackend`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use voice_pipeline::audio::RecordedAudio;
//! use voice_pipeline::stt::{ComputeBackend, TranscribeParams, TranscriptionEngine, WhisperEngine};
//!
//! let engine = WhisperEngine::load(
//!     "models/ggml-base.bin",
//!     ComputeBackend::Cpu,
//!     TranscribeParams::default(),
//! )
//! .expect("model not found");
//!
//! let audio = RecordedAudio::new(vec![0.0; 16_000], 16_000); // 1 s of silence
//! let text = engine.transcribe(&audio).unwrap();
//! println!("{text}");
//! ```

pub mod engine;
pub mod transcribe;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use engine::{
    ComputeBackend, TranscribeError, TranscriptionEngine, UnavailableEngine, WhisperEngine,
};
pub use transcribe::{SamplingStrategy, Segment, TranscribeParams, TranscriptionResult};

// test-only re-export so other test modules can import the mock without
// `use voice_pipeline::stt::engine::MockTranscriptionEngine`.
#[cfg(test)]
pub use engine::MockTranscriptionEngine;
