//! Capture source contract and error taxonomy.
//!
//! [`CaptureSource`] is the domain trait for the audio side of the pipeline:
//! one exclusive capture per session, a finite in-memory buffer, and errors
//! that classify onto [`ErrorCategory`] at the failure site.  It extends
//! [`Capability`] so the recovery supervisor can poll device health without
//! knowing anything about audio.
//!
//! [`MockCaptureSource`] (available under `#[cfg(test)]`) enforces the same
//! session-exclusivity contract as the production device source so callers
//! are tested against it.

use thiserror::Error;

use crate::capability::Capability;
use crate::report::ErrorCategory;

// ---------------------------------------------------------------------------
// DeviceSelection
// ---------------------------------------------------------------------------

/// Which input device a capture source should bind to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    /// The platform default input device.
    SystemDefault,
    /// A device matched by its reported name.
    Named(String),
}

impl DeviceSelection {
    /// Build from the config value; `None` or `"default"` selects the
    /// system default device.
    pub fn from_config(name: Option<&str>) -> Self {
        match name {
            None | Some("default") | Some("") => Self::SystemDefault,
            Some(n) => Self::Named(n.to_string()),
        }
    }

    /// Human-readable label for log lines and notices.
    pub fn label(&self) -> &str {
        match self {
            Self::SystemDefault => "system default",
            Self::Named(n) => n.as_str(),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordedAudio
// ---------------------------------------------------------------------------

/// The finite audio buffer produced by one capture session.
///
/// Samples are 16 kHz mono `f32` in `[-1.0, 1.0]` — the contract the
/// transcription engine expects.
#[derive(Debug, Clone)]
pub struct RecordedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl RecordedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Recording length in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// All errors the capture side can produce, each with a fixed classification.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// No usable input device could be found.
    #[error("no input device found for {0}")]
    NoDevice(String),

    /// The device vanished while a capture was running.
    #[error("input device lost during capture: {0}")]
    DeviceLost(String),

    /// The platform rejected the stream configuration or the stream died on
    /// startup.
    #[error("failed to open input stream: {0}")]
    Stream(String),

    /// The bounded session buffer filled up before the capture was stopped.
    #[error("capture buffer overflowed (limit {0} samples)")]
    BufferOverflow(usize),

    /// `start_capture` was called while a capture is already active.
    #[error("capture already active for session {0}")]
    CaptureActive(u64),

    /// `stop_capture` was called with no capture running.
    #[error("no capture active to stop")]
    NoCaptureActive,

    /// `stop_capture` was called for a session that is not the active one.
    #[error("stop requested for session {requested} but session {active} is capturing")]
    SessionMismatch { requested: u64, active: u64 },
}

impl CaptureError {
    /// Fixed classification of each variant.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CaptureError::NoDevice(_)
            | CaptureError::DeviceLost(_)
            | CaptureError::Stream(_) => ErrorCategory::Infrastructure,
            CaptureError::BufferOverflow(_) => ErrorCategory::Process,
            CaptureError::CaptureActive(_)
            | CaptureError::NoCaptureActive
            | CaptureError::SessionMismatch { .. } => ErrorCategory::Logic,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureSource trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for audio capture sources.
///
/// # Contract
///
/// - At most one capture is active at a time; `start_capture` while active
///   returns [`CaptureError::CaptureActive`] (a `Logic` failure).
/// - `stop_capture` finalises and returns the session's buffer.  A device
///   that disappeared mid-capture surfaces as
///   [`CaptureError::DeviceLost`] (`Infrastructure`), a full buffer as
///   [`CaptureError::BufferOverflow`] (`Process`).
/// - The inherited [`Capability::is_healthy`] checks device presence and
///   parameter validity without opening the device.
pub trait CaptureSource: Capability {
    /// Begin filling an exclusive buffer for `session_id`.
    fn start_capture(&self, session_id: u64) -> Result<(), CaptureError>;

    /// Finalise the capture for `session_id` and return its buffer.
    fn stop_capture(&self, session_id: u64) -> Result<RecordedAudio, CaptureError>;
}

// Compile-time assertion: Box<dyn CaptureSource> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn CaptureSource>) {}
};

// ---------------------------------------------------------------------------
// MockCaptureSource  (test-only)
// ---------------------------------------------------------------------------

/// A test double that produces a pre-configured buffer without touching any
/// audio hardware.
#[cfg(test)]
pub struct MockCaptureSource {
    samples: Vec<f32>,
    fail_start: std::sync::Mutex<Option<CaptureError>>,
    fail_stop: std::sync::Mutex<Option<CaptureError>>,
    fail_stop_once: std::sync::atomic::AtomicBool,
    healthy: std::sync::atomic::AtomicBool,
    active: std::sync::Mutex<Option<u64>>,
    starts: std::sync::atomic::AtomicU32,
    stops: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl MockCaptureSource {
    /// A source that yields one second of quiet 16 kHz audio per session.
    pub fn ok() -> Self {
        Self::with_samples(vec![0.01_f32; 16_000])
    }

    pub fn with_samples(samples: Vec<f32>) -> Self {
        Self {
            samples,
            fail_start: std::sync::Mutex::new(None),
            fail_stop: std::sync::Mutex::new(None),
            fail_stop_once: std::sync::atomic::AtomicBool::new(false),
            healthy: std::sync::atomic::AtomicBool::new(true),
            active: std::sync::Mutex::new(None),
            starts: std::sync::atomic::AtomicU32::new(0),
            stops: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Every `start_capture` fails with `error`.
    pub fn failing_start(error: CaptureError) -> Self {
        let mock = Self::ok();
        *mock.fail_start.lock().unwrap() = Some(error);
        mock
    }

    /// Every `stop_capture` fails with `error`.
    pub fn failing_stop(error: CaptureError) -> Self {
        let mock = Self::ok();
        *mock.fail_stop.lock().unwrap() = Some(error);
        mock
    }

    /// Only the first `stop_capture` fails with `error`; later sessions
    /// succeed.  Models a device that vanished once.
    pub fn failing_stop_once(error: CaptureError) -> Self {
        let mock = Self::failing_stop(error);
        mock.fail_stop_once
            .store(true, std::sync::atomic::Ordering::SeqCst);
        mock
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy
            .store(healthy, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn start_count(&self) -> u32 {
        self.starts.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Capability for MockCaptureSource {
    fn is_healthy(&self) -> bool {
        self.healthy.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn status(&self) -> crate::capability::CapabilityStatus {
        crate::capability::CapabilityStatus::new(self.is_healthy()).with_detail("device", "mock")
    }
}

#[cfg(test)]
impl CaptureSource for MockCaptureSource {
    fn start_capture(&self, session_id: u64) -> Result<(), CaptureError> {
        self.starts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(err) = self.fail_start.lock().unwrap().clone() {
            return Err(err);
        }
        let mut active = self.active.lock().unwrap();
        if let Some(current) = *active {
            return Err(CaptureError::CaptureActive(current));
        }
        *active = Some(session_id);
        Ok(())
    }

    fn stop_capture(&self, session_id: u64) -> Result<RecordedAudio, CaptureError> {
        self.stops.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut active = self.active.lock().unwrap();
        match *active {
            None => return Err(CaptureError::NoCaptureActive),
            Some(current) if current != session_id => {
                return Err(CaptureError::SessionMismatch {
                    requested: session_id,
                    active: current,
                });
            }
            Some(_) => {}
        }
        *active = None;

        let mut fail = self.fail_stop.lock().unwrap();
        if let Some(err) = fail.clone() {
            if self
                .fail_stop_once
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                *fail = None;
            }
            return Err(err);
        }
        Ok(RecordedAudio::new(self.samples.clone(), 16_000))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
