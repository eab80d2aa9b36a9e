//! Audio capture side of the pipeline.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → raw chunks (mpsc) → downmix_to_mono
//!           → resample_to_16k → CaptureBuffer → RecordedAudio
//! ```
//!
//! [`CaptureSource`] is the swappable seam the orchestrator records through;
//! [`DeviceCaptureSource`] is the production implementation.  Each session
//! fills one bounded [`CaptureBuffer`]; overflow fails the session rather
//! than silently truncating it.

pub mod buffer;
pub mod device;
pub mod resample;
pub mod source;

pub use buffer::CaptureBuffer;
pub use device::DeviceCaptureSource;
pub use resample::{downmix_to_mono, resample_to_16k};
pub use source::{CaptureError, CaptureSource, DeviceSelection, RecordedAudio};

// test-only re-export so other test modules can import the mock without the
// full path.
#[cfg(test)]
pub use source::MockCaptureSource;
