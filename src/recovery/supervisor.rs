//! Recovery supervisor — health polling, failure-driven recovery, and
//! live dependency replacement.
//!
//! [`RecoverySupervisor`] consumes `Infrastructure` [`FailureReport`]s
//! forwarded by the orchestrator and runs a periodic health poll.  Either
//! trigger drives the same per-dependency recovery workflow:
//!
//! ```text
//! FailureReport{Infrastructure}  ─┐
//!                                 ├─▶ recover_capture / recover_transcription
//! health poll (unhealthy)        ─┘        │
//!                                          ├─ try configured device/backend
//!                                          ├─ fall back (default device /
//!                                          │  general-purpose compute)
//!                                          └─ SwapSlot::swap + RecoveryNotice
//! ```
//!
//! Recovery is single-flight per dependency: a duplicate trigger while a
//! recovery is running is suppressed; the other dependency recovers
//! independently.  After a bounded number of consecutive failures inside a
//! sliding window the dependency is marked *degraded* — auto-recovery stops
//! and a persistent needs-attention notice is emitted until a later health
//! poll observes the dependency healthy again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::audio::{CaptureError, CaptureSource, DeviceSelection};
use crate::config::RecoveryConfig;
use crate::pipeline::{SessionEvent, SwapSlot};
use crate::recovery::factory::{CaptureSourceFactory, TranscriptionEngineFactory};
use crate::report::{ErrorCategory, FailureReport, FailureSource};
use crate::stt::{ComputeBackend, TranscribeError, TranscriptionEngine};

// ---------------------------------------------------------------------------
// RecoveryAttempt
// ---------------------------------------------------------------------------

/// Which dependency a recovery workflow targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTarget {
    Capture,
    Transcription,
}

impl RecoveryTarget {
    pub fn label(&self) -> &'static str {
        match self {
            RecoveryTarget::Capture => "capture",
            RecoveryTarget::Transcription => "transcription",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Success,
    Failed,
}

/// Record of one completed recovery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryAttempt {
    pub target: RecoveryTarget,
    pub outcome: RecoveryOutcome,
    /// Whether the lower-capability fallback (default device /
    /// general-purpose compute) was attempted.
    pub fallback_used: bool,
}

// ---------------------------------------------------------------------------
// Fallback construction ladders
// ---------------------------------------------------------------------------

/// Build a capture source on the preferred device, falling back to the
/// system default when the preferred device fails or is gone.
///
/// Returns the build result plus whether the fallback was attempted.  Used
/// both at startup wiring and inside [`RecoverySupervisor::recover_capture`]
/// so the two share one code path.
pub fn build_capture_with_fallback(
    factory: &dyn CaptureSourceFactory,
    preferred: &DeviceSelection,
) -> (Result<Arc<dyn CaptureSource>, CaptureError>, bool) {
    match factory.build(preferred) {
        Ok(source) => (Ok(source), false),
        Err(e) if *preferred != DeviceSelection::SystemDefault => {
            log::warn!(
                "configured device '{}' unavailable ({e}); trying the system default device",
                preferred.label()
            );
            (factory.build(&DeviceSelection::SystemDefault), true)
        }
        Err(e) => (Err(e), false),
    }
}

/// Build a transcription engine on the preferred backend, falling back to
/// the next-lower-capability backend when the preferred one faults.
pub fn build_engine_with_fallback(
    factory: &dyn TranscriptionEngineFactory,
    preferred: ComputeBackend,
) -> (Result<Arc<dyn TranscriptionEngine>, TranscribeError>, bool) {
    match factory.build(preferred) {
        Ok(engine) => (Ok(engine), false),
        Err(e) => match preferred.fallback() {
            Some(lower) => {
                log::warn!(
                    "{} backend failed ({e}); falling back to {} compute",
                    preferred.label(),
                    lower.label()
                );
                (factory.build(lower), true)
            }
            None => (Err(e), false),
        },
    }
}

// ---------------------------------------------------------------------------
// Per-dependency bookkeeping
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TargetState {
    /// Failed recoveries inside the current window.
    consecutive_failures: u32,
    /// Start of the current failure window.
    window_start: Option<Instant>,
    /// Auto-recovery suspended until a healthy poll.
    degraded: bool,
}

#[derive(Default)]
struct SupervisorState {
    capture: TargetState,
    transcription: TargetState,
    attempts: Vec<RecoveryAttempt>,
}

impl SupervisorState {
    fn target(&self, target: RecoveryTarget) -> &TargetState {
        match target {
            RecoveryTarget::Capture => &self.capture,
            RecoveryTarget::Transcription => &self.transcription,
        }
    }

    fn target_mut(&mut self, target: RecoveryTarget) -> &mut TargetState {
        match target {
            RecoveryTarget::Capture => &mut self.capture,
            RecoveryTarget::Transcription => &mut self.transcription,
        }
    }
}

// ---------------------------------------------------------------------------
// MonitorHandle
// ---------------------------------------------------------------------------

/// Handle to the running health-poll task.  Call [`stop`](Self::stop) on
/// shutdown so the poll never acts on a torn-down pipeline.
pub struct MonitorHandle {
    task: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the poll task.
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ---------------------------------------------------------------------------
// RecoverySupervisor
// ---------------------------------------------------------------------------

/// Supervises the pipeline's two critical dependencies.
///
/// Owns dependency construction (through the factories) and the swap rights
/// on both [`SwapSlot`]s; the orchestrator only ever reads them.
pub struct RecoverySupervisor {
    capture_slot: Arc<SwapSlot<dyn CaptureSource>>,
    engine_slot: Arc<SwapSlot<dyn TranscriptionEngine>>,
    capture_factory: Arc<dyn CaptureSourceFactory>,
    engine_factory: Arc<dyn TranscriptionEngineFactory>,
    /// Device the user configured; recovery tries it before falling back.
    preferred_device: DeviceSelection,
    /// Backend the user configured; recovery tries it before falling back.
    preferred_backend: ComputeBackend,
    config: RecoveryConfig,
    event_tx: mpsc::Sender<SessionEvent>,
    /// Single-flight guards, one per dependency.  The health-poll task and
    /// the failure-report path contend on these.
    capture_flight: tokio::sync::Mutex<()>,
    engine_flight: tokio::sync::Mutex<()>,
    state: std::sync::Mutex<SupervisorState>,
}

impl RecoverySupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capture_slot: Arc<SwapSlot<dyn CaptureSource>>,
        engine_slot: Arc<SwapSlot<dyn TranscriptionEngine>>,
        capture_factory: Arc<dyn CaptureSourceFactory>,
        engine_factory: Arc<dyn TranscriptionEngineFactory>,
        preferred_device: DeviceSelection,
        preferred_backend: ComputeBackend,
        config: RecoveryConfig,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            capture_slot,
            engine_slot,
            capture_factory,
            engine_factory,
            preferred_device,
            preferred_backend,
            config,
            event_tx,
            capture_flight: tokio::sync::Mutex::new(()),
            engine_flight: tokio::sync::Mutex::new(()),
            state: std::sync::Mutex::new(SupervisorState::default()),
        }
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Handle a report forwarded by the orchestrator.
    ///
    /// Called synchronously on the forwarding path, so recovery starts
    /// immediately rather than on the next poll tick.  Only
    /// `Infrastructure` reports reach recovery; anything else is a routing
    /// mistake and is ignored with a log line.
    pub async fn on_failure_report(&self, report: FailureReport) {
        if report.category != ErrorCategory::Infrastructure {
            log::debug!("supervisor: non-infrastructure report ignored: {report}");
            return;
        }
        match report.source {
            FailureSource::Capture => self.recover_capture(&report.message).await,
            FailureSource::Transcription => self.recover_transcription(&report.message).await,
            FailureSource::PostProcessor => {
                log::warn!("supervisor: post-processor failures are not recoverable: {report}");
            }
        }
    }

    /// Spawn the periodic health poll.  The first poll runs one `interval`
    /// after this call.
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) -> MonitorHandle {
        log::info!(
            "supervisor: health monitoring every {}s",
            interval.as_secs()
        );
        let supervisor = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval's first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                supervisor.poll_once().await;
            }
        });
        MonitorHandle { task }
    }

    /// One health-poll pass over both dependencies.
    pub async fn poll_once(&self) {
        let capture = self.capture_slot.get();
        if capture.is_healthy() {
            if self.clear_degraded(RecoveryTarget::Capture) {
                self.notice(
                    "capture source is healthy again; automatic recovery re-enabled".into(),
                )
                .await;
            }
        } else if self.is_degraded(RecoveryTarget::Capture) {
            log::debug!("supervisor: capture still unhealthy and degraded; awaiting manual attention");
        } else {
            log::warn!(
                "supervisor: health poll found capture source unhealthy: {:?}",
                capture.status().detail
            );
            self.recover_capture("health poll found capture source unhealthy")
                .await;
        }

        let engine = self.engine_slot.get();
        if engine.is_healthy() {
            if self.clear_degraded(RecoveryTarget::Transcription) {
                self.notice(
                    "transcription engine is healthy again; automatic recovery re-enabled".into(),
                )
                .await;
            }
        } else if self.is_degraded(RecoveryTarget::Transcription) {
            log::debug!("supervisor: transcription still unhealthy and degraded; awaiting manual attention");
        } else {
            log::warn!(
                "supervisor: health poll found transcription engine unhealthy: {:?}",
                engine.status().detail
            );
            self.recover_transcription("health poll found transcription engine unhealthy")
                .await;
        }
    }

    // -----------------------------------------------------------------------
    // Recovery workflows
    // -----------------------------------------------------------------------

    /// Replace the capture source, preferring the configured device and
    /// falling back to the system default.
    pub async fn recover_capture(&self, reason: &str) {
        let Ok(_guard) = self.capture_flight.try_lock() else {
            log::debug!("supervisor: capture recovery already in flight; duplicate trigger suppressed");
            return;
        };
        if self.is_degraded(RecoveryTarget::Capture) {
            log::debug!("supervisor: capture degraded; auto-recovery suspended");
            return;
        }
        log::warn!("supervisor: recovering capture source: {reason}");

        let factory = Arc::clone(&self.capture_factory);
        let preferred = self.preferred_device.clone();
        let built = tokio::task::spawn_blocking(move || {
            build_capture_with_fallback(factory.as_ref(), &preferred)
        })
        .await;

        match built {
            Ok((Ok(source), fallback_used)) => {
                self.capture_slot.swap(source);
                self.record_attempt(RecoveryTarget::Capture, RecoveryOutcome::Success, fallback_used);
                let message = if fallback_used {
                    "capture recovered: switched to the default input device".to_string()
                } else {
                    format!(
                        "capture recovered on configured device ({})",
                        self.preferred_device.label()
                    )
                };
                self.notice(message).await;
            }
            Ok((Err(e), fallback_used)) => {
                log::error!("supervisor: capture recovery failed: {e}");
                let degraded_now =
                    self.record_attempt(RecoveryTarget::Capture, RecoveryOutcome::Failed, fallback_used);
                if degraded_now {
                    self.notice(
                        "capture degraded: automatic recovery suspended — check the input device"
                            .into(),
                    )
                    .await;
                }
            }
            Err(e) => {
                log::error!("supervisor: capture recovery task panicked: {e}");
                let degraded_now =
                    self.record_attempt(RecoveryTarget::Capture, RecoveryOutcome::Failed, false);
                if degraded_now {
                    self.notice(
                        "capture degraded: automatic recovery suspended — check the input device"
                            .into(),
                    )
                    .await;
                }
            }
        }
    }

    /// Replace the transcription engine, preferring the configured backend
    /// and falling back to general-purpose compute.
    pub async fn recover_transcription(&self, reason: &str) {
        let Ok(_guard) = self.engine_flight.try_lock() else {
            log::debug!("supervisor: transcription recovery already in flight; duplicate trigger suppressed");
            return;
        };
        if self.is_degraded(RecoveryTarget::Transcription) {
            log::debug!("supervisor: transcription degraded; auto-recovery suspended");
            return;
        }
        log::warn!("supervisor: recovering transcription engine: {reason}");

        let factory = Arc::clone(&self.engine_factory);
        let preferred = self.preferred_backend;
        let built = tokio::task::spawn_blocking(move || {
            build_engine_with_fallback(factory.as_ref(), preferred)
        })
        .await;

        match built {
            Ok((Ok(engine), fallback_used)) => {
                self.engine_slot.swap(engine);
                self.record_attempt(
                    RecoveryTarget::Transcription,
                    RecoveryOutcome::Success,
                    fallback_used,
                );
                let message = if fallback_used {
                    "transcription recovered: switched to general-purpose compute".to_string()
                } else {
                    format!(
                        "transcription recovered on {} backend",
                        self.preferred_backend.label()
                    )
                };
                self.notice(message).await;
            }
            Ok((Err(e), fallback_used)) => {
                log::error!("supervisor: transcription recovery failed: {e}");
                let degraded_now = self.record_attempt(
                    RecoveryTarget::Transcription,
                    RecoveryOutcome::Failed,
                    fallback_used,
                );
                if degraded_now {
                    self.notice(
                        "transcription degraded: automatic recovery suspended — check the model and backend"
                            .into(),
                    )
                    .await;
                }
            }
            Err(e) => {
                log::error!("supervisor: transcription recovery task panicked: {e}");
                let degraded_now = self.record_attempt(
                    RecoveryTarget::Transcription,
                    RecoveryOutcome::Failed,
                    false,
                );
                if degraded_now {
                    self.notice(
                        "transcription degraded: automatic recovery suspended — check the model and backend"
                            .into(),
                    )
                    .await;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// All recorded recovery attempts, in order.
    pub fn attempts(&self) -> Vec<RecoveryAttempt> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Whether auto-recovery is currently suspended for `target`.
    pub fn is_degraded(&self, target: RecoveryTarget) -> bool {
        self.state.lock().unwrap().target(target).degraded
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    /// Record one attempt.  Returns `true` when this failure pushed the
    /// target over the bounded-retry limit (it just became degraded).
    fn record_attempt(
        &self,
        target: RecoveryTarget,
        outcome: RecoveryOutcome,
        fallback_used: bool,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(RecoveryAttempt {
            target,
            outcome,
            fallback_used,
        });

        let window = Duration::from_secs(self.config.failure_window_secs);
        let limit = self.config.max_consecutive_failures;
        let ts = state.target_mut(target);

        match outcome {
            RecoveryOutcome::Success => {
                *ts = TargetState::default();
                false
            }
            RecoveryOutcome::Failed => {
                let now = Instant::now();
                match ts.window_start {
                    Some(start) if now.duration_since(start) <= window => {}
                    _ => {
                        ts.window_start = Some(now);
                        ts.consecutive_failures = 0;
                    }
                }
                ts.consecutive_failures += 1;
                if ts.consecutive_failures >= limit && !ts.degraded {
                    ts.degraded = true;
                    log::error!(
                        "supervisor: {} recovery failed {} times within {}s; suspending auto-recovery",
                        target.label(),
                        ts.consecutive_failures,
                        self.config.failure_window_secs
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Reset a degraded target after a healthy poll.  Returns whether it was
    /// degraded.
    fn clear_degraded(&self, target: RecoveryTarget) -> bool {
        let mut state = self.state.lock().unwrap();
        let ts = state.target_mut(target);
        let was_degraded = ts.degraded;
        if was_degraded {
            *ts = TargetState::default();
        }
        was_degraded
    }

    async fn notice(&self, message: String) {
        log::info!("supervisor: {message}");
        let _ = self
            .event_tx
            .send(SessionEvent::RecoveryNotice { message })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
