//! Transcription engine trait and implementations.
//!
//! # Overview
//!
//! [`TranscriptionEngine`] is the swappable seam the pipeline transcribes
//! through.  It is object-safe and `Send + Sync` so it can be held behind an
//! `Arc<dyn TranscriptionEngine>` and replaced by the recovery supervisor
//! without restarting the pipeline.
//!
//! [`WhisperEngine`] is the production implementation that wraps a
//! `whisper_rs::WhisperContext` on a chosen [`ComputeBackend`].
//!
//! [`UnavailableEngine`] is a degraded stand-in used when no model file is
//! present at startup; it reports healthy as soon as the file appears so the
//! supervisor's next poll can build the real engine.
//!
//! [`MockTranscriptionEngine`] (under `#[cfg(test)]`) returns pre-configured
//! responses and enforces the same audio-length contract.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use whisper_rs::{FullParams, WhisperContext, WhisperContextParameters};

use crate::audio::RecordedAudio;
use crate::capability::{Capability, CapabilityStatus};
use crate::report::ErrorCategory;
use crate::stt::transcribe::{SamplingStrategy, Segment, TranscribeParams, TranscriptionResult};

// ---------------------------------------------------------------------------
// Audio length constants (16 kHz mono f32)
// ---------------------------------------------------------------------------

/// Minimum audio length: 0.5 s × 16 000 Hz = 8 000 samples.
const MIN_AUDIO_SAMPLES: usize = 8_000;
/// Maximum audio length: 60 s × 16 000 Hz = 960 000 samples.
const MAX_AUDIO_SAMPLES: usize = 960_000;

// ---------------------------------------------------------------------------
// ComputeBackend
// ---------------------------------------------------------------------------

/// Which compute backend the engine runs inference on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeBackend {
    /// GPU / accelerator-backed inference.
    Accelerator,
    /// General-purpose CPU inference.
    Cpu,
}

impl ComputeBackend {
    /// The backend to try first for a given configuration.
    pub fn preferred(use_gpu: bool) -> Self {
        if use_gpu {
            Self::Accelerator
        } else {
            Self::Cpu
        }
    }

    /// The next-lower-capability backend to fall back to, if any.
    pub fn fallback(&self) -> Option<Self> {
        match self {
            Self::Accelerator => Some(Self::Cpu),
            Self::Cpu => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Accelerator => "accelerator",
            Self::Cpu => "cpu",
        }
    }
}

// ---------------------------------------------------------------------------
// TranscribeError
// ---------------------------------------------------------------------------

/// All errors the transcription subsystem can produce, each with a fixed
/// classification.
#[derive(Debug, Clone, Error)]
pub enum TranscribeError {
    /// The GGML model file was not found at the given path.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The engine or its compute backend faulted (context init failure,
    /// inference fault, accelerator error).
    #[error("transcription backend fault: {0}")]
    BackendFault(String),

    /// The supplied buffer contained no samples at all.
    #[error("no audio captured")]
    EmptyAudio,

    /// The supplied audio is shorter than the minimum 0.5 s.
    #[error("audio too short — minimum 0.5 s (8 000 samples at 16 kHz)")]
    AudioTooShort,

    /// The supplied audio exceeds the maximum 60 s.
    #[error("audio too long — maximum 60 s (960 000 samples at 16 kHz)")]
    AudioTooLong,

    /// An internal invariant broke.  A defect, not a runtime condition.
    #[error("transcription invariant violated: {0}")]
    Invariant(String),
}

impl TranscribeError {
    /// Fixed classification of each variant.
    pub fn category(&self) -> ErrorCategory {
        match self {
            TranscribeError::ModelNotFound(_) | TranscribeError::BackendFault(_) => {
                ErrorCategory::Infrastructure
            }
            TranscribeError::EmptyAudio
            | TranscribeError::AudioTooShort
            | TranscribeError::AudioTooLong => ErrorCategory::Process,
            TranscribeError::Invariant(_) => ErrorCategory::Logic,
        }
    }
}

// ---------------------------------------------------------------------------
// TranscriptionEngine trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for speech-to-text engines.
///
/// # Contract
///
/// - `audio` must be **16 kHz, mono, f32** PCM samples.
/// - Returns `Err(TranscribeError::EmptyAudio)` for an empty buffer,
///   `AudioTooShort` below 8 000 samples, `AudioTooLong` above 960 000.
/// - Every error maps onto exactly one [`ErrorCategory`] via
///   [`TranscribeError::category`]; no unclassified failures.
pub trait TranscriptionEngine: Capability {
    /// Transcribe `audio` and return the text transcript.
    fn transcribe(&self, audio: &RecordedAudio) -> Result<String, TranscribeError>;
}

// Compile-time assertion: Box<dyn TranscriptionEngine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn TranscriptionEngine>) {}
};

/// Shared length guard used by all implementations.
fn check_audio_len(audio: &RecordedAudio) -> Result<(), TranscribeError> {
    if audio.samples.is_empty() {
        return Err(TranscribeError::EmptyAudio);
    }
    if audio.samples.len() < MIN_AUDIO_SAMPLES {
        return Err(TranscribeError::AudioTooShort);
    }
    if audio.samples.len() > MAX_AUDIO_SAMPLES {
        return Err(TranscribeError::AudioTooLong);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// WhisperEngine
// ---------------------------------------------------------------------------

/// Production engine that wraps a `whisper_rs::WhisperContext`.
///
/// A new `WhisperState` is created for every [`transcribe`] call so the
/// engine can be shared across threads without any locking.  An inference
/// fault marks the engine unhealthy; the recovery supervisor replaces the
/// whole instance rather than resetting it in place.
///
/// [`transcribe`]: TranscriptionEngine::transcribe
pub struct WhisperEngine {
    ctx: WhisperContext,
    params: TranscribeParams,
    backend: ComputeBackend,
    model_name: String,
    faulted: AtomicBool,
}

impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("model_name", &self.model_name)
            .field("backend", &self.backend)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// `WhisperContext` holds a raw pointer internally but declares
// `unsafe impl Send` and `unsafe impl Sync` in whisper-rs — the model
// weights are read-only after loading.  All other fields are owned and
// trivially Send+Sync.
// SAFETY: WhisperContext is Send+Sync as declared by whisper-rs.
unsafe impl Send for WhisperEngine {}
unsafe impl Sync for WhisperEngine {}

impl WhisperEngine {
    /// Load a GGML model from `model_path` on the given backend.
    ///
    /// # Errors
    ///
    /// - [`TranscribeError::ModelNotFound`] — `model_path` does not exist.
    /// - [`TranscribeError::BackendFault`] — whisper-rs failed to load the
    ///   file or initialise the backend.
    pub fn load(
        model_path: impl AsRef<Path>,
        backend: ComputeBackend,
        params: TranscribeParams,
    ) -> Result<Self, TranscribeError> {
        let path = model_path.as_ref();

        if !path.exists() {
            return Err(TranscribeError::ModelNotFound(path.display().to_string()));
        }

        let path_str = path.to_str().ok_or_else(|| {
            TranscribeError::ModelNotFound(format!(
                "model path contains non-UTF-8 characters: {}",
                path.display()
            ))
        })?;

        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu(backend == ComputeBackend::Accelerator);

        let ctx = WhisperContext::new_with_params(path_str, ctx_params)
            .map_err(|e| TranscribeError::BackendFault(e.to_string()))?;

        let model_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            ctx,
            params,
            backend,
            model_name,
            faulted: AtomicBool::new(false),
        })
    }

    /// The backend this engine was loaded on.
    pub fn backend(&self) -> ComputeBackend {
        self.backend
    }

    /// Transcribe `audio` and return a [`TranscriptionResult`] with
    /// per-segment timing information.
    ///
    /// Prefer [`TranscriptionEngine::transcribe`] when only the text is
    /// needed.
    pub fn transcribe_full(
        &self,
        audio: &RecordedAudio,
    ) -> Result<TranscriptionResult, TranscribeError> {
        check_audio_len(audio)?;

        // ── Build FullParams ──────────────────────────────────────────────
        use whisper_rs::SamplingStrategy as WS;
        let ws = match self.params.strategy {
            SamplingStrategy::Greedy { best_of } => WS::Greedy { best_of },
            SamplingStrategy::BeamSearch { beam_size, patience } => {
                WS::BeamSearch { beam_size, patience }
            }
        };

        let mut fp = FullParams::new(ws);

        let lang: Option<&str> = if self.params.language == "auto" {
            None
        } else {
            Some(self.params.language.as_str())
        };
        fp.set_language(lang);
        fp.set_n_threads(self.params.n_threads);

        if self.params.suppress_progress {
            fp.set_print_progress(false);
            fp.set_print_realtime(false);
        }

        // ── Create per-call state and run inference ───────────────────────
        let mut state = self.ctx.create_state().map_err(|e| {
            self.faulted.store(true, Ordering::SeqCst);
            TranscribeError::BackendFault(e.to_string())
        })?;

        let wall_start = std::time::Instant::now();

        state.full(fp, &audio.samples).map_err(|e| {
            self.faulted.store(true, Ordering::SeqCst);
            TranscribeError::BackendFault(e.to_string())
        })?;

        // ── Collect segments ──────────────────────────────────────────────
        let n_segments = state
            .full_n_segments()
            .map_err(|e| TranscribeError::BackendFault(e.to_string()))?;

        if n_segments < 0 {
            return Err(TranscribeError::Invariant(format!(
                "negative segment count: {n_segments}"
            )));
        }

        let mut text = String::new();
        let mut segments: Vec<Segment> = Vec::with_capacity(n_segments as usize);

        for i in 0..n_segments {
            let seg_text = state
                .full_get_segment_text(i)
                .map_err(|e| TranscribeError::BackendFault(format!("segment {i}: {e}")))?;

            // Timestamps are in centiseconds → multiply by 10 for ms.
            let t0 = state.full_get_segment_t0(i).unwrap_or(0).max(0) as u64 * 10;
            let t1 = state.full_get_segment_t1(i).unwrap_or(0).max(0) as u64 * 10;

            text.push_str(&seg_text);
            segments.push(Segment {
                text: seg_text,
                start_ms: t0,
                end_ms: t1,
            });
        }

        Ok(TranscriptionResult {
            text: text.trim().to_string(),
            segments,
            duration_ms: wall_start.elapsed().as_millis(),
        })
    }
}

impl Capability for WhisperEngine {
    /// Healthy while the loaded context has not faulted.
    fn is_healthy(&self) -> bool {
        !self.faulted.load(Ordering::SeqCst)
    }

    fn status(&self) -> CapabilityStatus {
        CapabilityStatus::new(self.is_healthy())
            .with_detail("model", self.model_name.clone())
            .with_detail("backend", self.backend.label())
            .with_detail("language", self.params.language.clone())
    }
}

impl TranscriptionEngine for WhisperEngine {
    fn transcribe(&self, audio: &RecordedAudio) -> Result<String, TranscribeError> {
        self.transcribe_full(audio).map(|r| r.text)
    }
}

// ---------------------------------------------------------------------------
// UnavailableEngine
// ---------------------------------------------------------------------------

/// Placeholder engine used when no model file is present at startup.
///
/// Every transcription fails with [`TranscribeError::ModelNotFound`]
/// (`Infrastructure`), and [`is_healthy`](Capability::is_healthy) turns true
/// once the model file appears on disk — the supervisor's next health poll
/// then swaps in a real [`WhisperEngine`].
pub struct UnavailableEngine {
    model_path: std::path::PathBuf,
}

impl UnavailableEngine {
    pub fn new(model_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
        }
    }
}

impl Capability for UnavailableEngine {
    fn is_healthy(&self) -> bool {
        self.model_path.exists()
    }

    fn status(&self) -> CapabilityStatus {
        CapabilityStatus::new(self.is_healthy())
            .with_detail("model", self.model_path.display().to_string())
            .with_detail("backend", "none")
    }
}

impl TranscriptionEngine for UnavailableEngine {
    fn transcribe(&self, _audio: &RecordedAudio) -> Result<String, TranscribeError> {
        Err(TranscribeError::ModelNotFound(
            self.model_path.display().to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// MockTranscriptionEngine  (test-only)
// ---------------------------------------------------------------------------

/// A test double that returns a pre-configured response without loading any
/// model file.
#[cfg(test)]
pub struct MockTranscriptionEngine {
    response: Result<String, TranscribeError>,
    /// When set, the first call fails with this error and later calls use
    /// `response`.
    fail_first: std::sync::Mutex<Option<TranscribeError>>,
    /// Simulated inference time (the call sleeps on the blocking pool).
    delay: Option<std::time::Duration>,
    healthy: AtomicBool,
    calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl MockTranscriptionEngine {
    /// Create a mock that always returns `Ok(text)`.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            response: Ok(text.into()),
            fail_first: std::sync::Mutex::new(None),
            delay: None,
            healthy: AtomicBool::new(true),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Create a mock that always returns `Err(error)`.
    pub fn err(error: TranscribeError) -> Self {
        Self {
            response: Err(error),
            fail_first: std::sync::Mutex::new(None),
            delay: None,
            healthy: AtomicBool::new(true),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// First call fails with `error`; later calls return `Ok(text)`.
    pub fn fails_once(error: TranscribeError, text: impl Into<String>) -> Self {
        let mock = Self::ok(text);
        *mock.fail_first.lock().unwrap() = Some(error);
        mock
    }

    /// Make each transcription take at least `delay` of wall time.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of `transcribe` calls that passed the length guards.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Capability for MockTranscriptionEngine {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn status(&self) -> CapabilityStatus {
        CapabilityStatus::new(self.is_healthy()).with_detail("model", "mock")
    }
}

#[cfg(test)]
impl TranscriptionEngine for MockTranscriptionEngine {
    fn transcribe(&self, audio: &RecordedAudio) -> Result<String, TranscribeError> {
        // Enforce the audio-length contract even in the mock so that callers
        // are tested against it.
        check_audio_len(audio)?;
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        if let Some(err) = self.fail_first.lock().unwrap().take() {
            return Err(err);
        }
        self.response.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
