//! Dependency factories owned by the recovery supervisor.
//!
//! The supervisor owns the *lifecycle* of the pipeline's two critical
//! dependencies: it constructs replacements through these factories and
//! swaps them into the orchestrator's slots.  The factory seam is what the
//! tests inject doubles through.

use std::sync::Arc;

use crate::audio::{CaptureError, CaptureSource, DeviceCaptureSource, DeviceSelection};
use crate::config::AudioConfig;
use crate::stt::{ComputeBackend, TranscribeError, TranscribeParams, TranscriptionEngine, WhisperEngine};

// ---------------------------------------------------------------------------
// Factory traits
// ---------------------------------------------------------------------------

/// Builds capture sources for a given device selection.
///
/// Construction may block (device probing); the supervisor always calls it
/// from the blocking thread pool.
pub trait CaptureSourceFactory: Send + Sync {
    fn build(&self, selection: &DeviceSelection) -> Result<Arc<dyn CaptureSource>, CaptureError>;
}

/// Builds transcription engines on a given compute backend.
///
/// Construction may block for seconds (model loading); the supervisor
/// always calls it from the blocking thread pool.
pub trait TranscriptionEngineFactory: Send + Sync {
    fn build(
        &self,
        backend: ComputeBackend,
    ) -> Result<Arc<dyn TranscriptionEngine>, TranscribeError>;
}

// ---------------------------------------------------------------------------
// Production factories
// ---------------------------------------------------------------------------

/// Builds [`DeviceCaptureSource`]s from the application's audio settings.
pub struct DeviceCaptureFactory {
    config: AudioConfig,
}

impl DeviceCaptureFactory {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl CaptureSourceFactory for DeviceCaptureFactory {
    fn build(&self, selection: &DeviceSelection) -> Result<Arc<dyn CaptureSource>, CaptureError> {
        let source = DeviceCaptureSource::new(selection.clone(), &self.config)?;
        log::info!("built capture source on device '{}'", source.device_name());
        Ok(Arc::new(source))
    }
}

/// Builds [`WhisperEngine`]s for a fixed model file.
pub struct WhisperEngineFactory {
    model_path: std::path::PathBuf,
    params: TranscribeParams,
}

impl WhisperEngineFactory {
    pub fn new(model_path: impl Into<std::path::PathBuf>, params: TranscribeParams) -> Self {
        Self {
            model_path: model_path.into(),
            params,
        }
    }
}

impl TranscriptionEngineFactory for WhisperEngineFactory {
    fn build(
        &self,
        backend: ComputeBackend,
    ) -> Result<Arc<dyn TranscriptionEngine>, TranscribeError> {
        let engine = WhisperEngine::load(&self.model_path, backend, self.params.clone())?;
        log::info!(
            "loaded whisper model {} on {} backend",
            self.model_path.display(),
            backend.label()
        );
        Ok(Arc::new(engine))
    }
}

// ---------------------------------------------------------------------------
// Mock factories  (test-only)
// ---------------------------------------------------------------------------

/// Hands out a scripted sequence of build results and records every request.
#[cfg(test)]
pub struct MockCaptureFactory {
    results: std::sync::Mutex<std::collections::VecDeque<Result<Arc<dyn CaptureSource>, CaptureError>>>,
    selections: std::sync::Mutex<Vec<DeviceSelection>>,
    builds: std::sync::atomic::AtomicU32,
    build_delay: Option<std::time::Duration>,
}

#[cfg(test)]
impl MockCaptureFactory {
    /// Results are consumed front-to-back; once exhausted every build fails.
    pub fn with_results(results: Vec<Result<Arc<dyn CaptureSource>, CaptureError>>) -> Self {
        Self {
            results: std::sync::Mutex::new(results.into()),
            selections: std::sync::Mutex::new(Vec::new()),
            builds: std::sync::atomic::AtomicU32::new(0),
            build_delay: None,
        }
    }

    /// Every build fails.
    pub fn failing() -> Self {
        Self::with_results(Vec::new())
    }

    /// Make each build take at least `delay` of wall time (runs on the
    /// blocking pool).
    pub fn with_build_delay(mut self, delay: std::time::Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    pub fn build_count(&self) -> u32 {
        self.builds.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// The device selections requested, in order.
    pub fn selections(&self) -> Vec<DeviceSelection> {
        self.selections.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl CaptureSourceFactory for MockCaptureFactory {
    fn build(&self, selection: &DeviceSelection) -> Result<Arc<dyn CaptureSource>, CaptureError> {
        self.builds
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.selections.lock().unwrap().push(selection.clone());
        if let Some(delay) = self.build_delay {
            std::thread::sleep(delay);
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CaptureError::NoDevice(selection.label().to_string())))
    }
}

/// Engine-side counterpart of [`MockCaptureFactory`].
#[cfg(test)]
pub struct MockEngineFactory {
    results: std::sync::Mutex<
        std::collections::VecDeque<Result<Arc<dyn TranscriptionEngine>, TranscribeError>>,
    >,
    backends: std::sync::Mutex<Vec<ComputeBackend>>,
    builds: std::sync::atomic::AtomicU32,
    build_delay: Option<std::time::Duration>,
}

#[cfg(test)]
impl MockEngineFactory {
    pub fn with_results(
        results: Vec<Result<Arc<dyn TranscriptionEngine>, TranscribeError>>,
    ) -> Self {
        Self {
            results: std::sync::Mutex::new(results.into()),
            backends: std::sync::Mutex::new(Vec::new()),
            builds: std::sync::atomic::AtomicU32::new(0),
            build_delay: None,
        }
    }

    pub fn failing() -> Self {
        Self::with_results(Vec::new())
    }

    pub fn with_build_delay(mut self, delay: std::time::Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    pub fn build_count(&self) -> u32 {
        self.builds.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// The backends requested, in order.
    pub fn backends(&self) -> Vec<ComputeBackend> {
        self.backends.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl TranscriptionEngineFactory for MockEngineFactory {
    fn build(
        &self,
        backend: ComputeBackend,
    ) -> Result<Arc<dyn TranscriptionEngine>, TranscribeError> {
        self.builds
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.backends.lock().unwrap().push(backend);
        if let Some(delay) = self.build_delay {
            std::thread::sleep(delay);
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(TranscribeError::BackendFault(format!(
                    "no engine available on {} backend",
                    backend.label()
                )))
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
