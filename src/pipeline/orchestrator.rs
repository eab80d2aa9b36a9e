//! Recording orchestrator — drives the capture → transcribe → post-process
//! loop as a serialized state machine.
//!
//! [`RecordingOrchestrator`] owns the active [`Session`] and responds to
//! [`SessionCommand`]s received over a `tokio::sync::mpsc` channel, so at
//! most one phase transition is ever in flight.  Lifecycle events go out on
//! a second channel in exactly the order the transitions occurred.
//!
//! # Pipeline flow
//!
//! ```text
//! SessionCommand::Start
//!   └─▶ capture_slot.get() → start_capture(id)          [Capturing]
//!
//! SessionCommand::Stop
//!   └─▶ stop_capture(id) → buffer
//!         └─▶ engine_slot.get() → spawn_blocking(transcribe)  [Transcribing]
//!               └─▶ post.process(text), best-effort           [PostProcessing]
//!                     └─▶ SessionSucceeded(text)              [Idle]
//!
//! any failure ──▶ SessionFailed(report) ──▶ Idle
//!   (Infrastructure reports are forwarded to the recovery supervisor
//!    before the phase resets)
//! ```
//!
//! # Hot-swap contract
//!
//! Dependencies are read through [`SwapSlot`]s.  The capture instance is
//! captured once when a capture starts and used for the matching stop; the
//! engine instance is captured once when transcription starts.  A swap
//! issued by the supervisor mid-operation is therefore never observed by
//! the in-flight call — it takes effect from the next operation.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::CaptureSource;
use crate::pipeline::slot::SwapSlot;
use crate::pipeline::state::{Phase, Session};
use crate::post::PostProcessor;
use crate::recovery::RecoverySupervisor;
use crate::report::{ErrorCategory, FailureReport, FailureSource};
use crate::stt::TranscriptionEngine;

// ---------------------------------------------------------------------------
// Commands and events
// ---------------------------------------------------------------------------

/// Commands sent from trigger collaborators (hotkey, UI) to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Begin a new session.
    Start,
    /// Stop capturing and run the rest of the pipeline.
    Stop,
    /// Tear the pipeline down, discarding any active capture.
    Shutdown,
}

/// Lifecycle events delivered to external listeners, in transition order.
/// These are the only outward signals the pipeline produces.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionStarted {
        id: u64,
    },
    SessionSucceeded {
        id: u64,
        text: String,
    },
    SessionFailed {
        id: u64,
        report: FailureReport,
    },
    /// One-line recovery/degradation notice from the supervisor.
    RecoveryNotice {
        message: String,
    },
}

// ---------------------------------------------------------------------------
// PipelineTrigger
// ---------------------------------------------------------------------------

/// Fire-and-forget command sender handed to trigger collaborators.
///
/// All methods are non-blocking; a full queue or a torn-down pipeline drops
/// the request with a warning.
#[derive(Clone)]
pub struct PipelineTrigger {
    command_tx: mpsc::Sender<SessionCommand>,
}

impl PipelineTrigger {
    pub fn request_start(&self) {
        if self.command_tx.try_send(SessionCommand::Start).is_err() {
            log::warn!("pipeline: start request dropped (queue full or pipeline gone)");
        }
    }

    pub fn request_stop(&self) {
        if self.command_tx.try_send(SessionCommand::Stop).is_err() {
            log::warn!("pipeline: stop request dropped (queue full or pipeline gone)");
        }
    }

    pub fn shutdown(&self) {
        if self.command_tx.try_send(SessionCommand::Shutdown).is_err() {
            log::warn!("pipeline: shutdown request dropped (pipeline already gone?)");
        }
    }
}

/// Create the command channel and its trigger handle.
pub fn command_channel() -> (PipelineTrigger, mpsc::Receiver<SessionCommand>) {
    let (command_tx, command_rx) = mpsc::channel(16);
    (PipelineTrigger { command_tx }, command_rx)
}

// ---------------------------------------------------------------------------
// RecordingOrchestrator
// ---------------------------------------------------------------------------

/// The session the orchestrator is currently driving, together with the
/// capture instance pinned at `start_capture` time.
struct ActiveSession {
    session: Session,
    capture: Arc<dyn CaptureSource>,
}

/// Drives the complete recording pipeline.
///
/// Create with [`RecordingOrchestrator::new`], then call
/// [`run`](Self::run) inside a tokio task.
pub struct RecordingOrchestrator {
    capture_slot: Arc<SwapSlot<dyn CaptureSource>>,
    engine_slot: Arc<SwapSlot<dyn TranscriptionEngine>>,
    post: Option<Arc<dyn PostProcessor>>,
    supervisor: Arc<RecoverySupervisor>,
    event_tx: mpsc::Sender<SessionEvent>,
    next_id: u64,
    active: Option<ActiveSession>,
}

impl RecordingOrchestrator {
    /// Create a new orchestrator.
    ///
    /// # Arguments
    ///
    /// * `capture_slot` — current capture source, swapped by the supervisor.
    /// * `engine_slot`  — current transcription engine, swapped by the
    ///   supervisor.
    /// * `post`         — optional best-effort post-processor.
    /// * `supervisor`   — receives forwarded `Infrastructure` reports.
    /// * `event_tx`     — lifecycle event channel for external listeners.
    pub fn new(
        capture_slot: Arc<SwapSlot<dyn CaptureSource>>,
        engine_slot: Arc<SwapSlot<dyn TranscriptionEngine>>,
        post: Option<Arc<dyn PostProcessor>>,
        supervisor: Arc<RecoverySupervisor>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            capture_slot,
            engine_slot,
            post,
            supervisor,
            event_tx,
            next_id: 0,
            active: None,
        }
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run the orchestrator until [`SessionCommand::Shutdown`] arrives or
    /// `command_rx` is closed.  Spawn as a tokio task.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        while let Some(command) = command_rx.recv().await {
            match command {
                SessionCommand::Start => self.handle_start().await,
                SessionCommand::Stop => self.handle_stop().await,
                SessionCommand::Shutdown => break,
            }
        }
        self.discard_active();
        log::info!("pipeline: orchestrator shut down");
    }

    // -----------------------------------------------------------------------
    // Command handlers
    // -----------------------------------------------------------------------

    /// `Idle → Capturing`.
    ///
    /// Policy: a start request while a session is active is rejected — it is
    /// logged and dropped, never queued.  Exactly one session stays active.
    async fn handle_start(&mut self) {
        if let Some(active) = &self.active {
            log::warn!(
                "pipeline: start requested while session {} is {}; request rejected",
                active.session.id,
                active.session.phase.label()
            );
            return;
        }

        self.next_id += 1;
        let id = self.next_id;

        // Pin the capture instance for this session; the matching stop uses
        // the same instance even if the supervisor swaps the slot meanwhile.
        let capture = self.capture_slot.get();

        log::debug!("pipeline: starting session {id}");
        match capture.start_capture(id) {
            Ok(()) => {
                let mut session = Session::new(id);
                session.phase = Phase::Capturing;
                self.active = Some(ActiveSession { session, capture });
                self.emit(SessionEvent::SessionStarted { id }).await;
            }
            Err(e) => {
                let report = FailureReport::new(
                    e.category(),
                    FailureSource::Capture,
                    e.to_string(),
                    Phase::Capturing,
                );
                self.fail_session(id, report).await;
            }
        }
    }

    /// `Capturing → Transcribing → PostProcessing → Idle`.
    async fn handle_stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            log::debug!("pipeline: stop requested while idle — nothing to do");
            return;
        };
        let id = active.session.id;

        // ── 1. Finalize the capture buffer ───────────────────────────────
        let audio = match active.capture.stop_capture(id) {
            Ok(audio) => audio,
            Err(e) => {
                let report = FailureReport::new(
                    e.category(),
                    FailureSource::Capture,
                    e.to_string(),
                    Phase::Capturing,
                );
                self.fail_session(id, report).await;
                return;
            }
        };
        log::debug!(
            "pipeline: session {id} captured {:.1}s of audio",
            audio.duration_secs()
        );

        // ── 2. Transcription (blocking → thread pool) ────────────────────
        active.session.phase = Phase::Transcribing;
        log::debug!("pipeline: session {id} → {}", active.session.phase.label());

        // Pin the engine instance for this operation.
        let engine = self.engine_slot.get();
        let stt_result =
            tokio::task::spawn_blocking(move || engine.transcribe(&audio)).await;

        let raw_text = match stt_result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                let report = FailureReport::new(
                    e.category(),
                    FailureSource::Transcription,
                    e.to_string(),
                    Phase::Transcribing,
                );
                self.fail_session(id, report).await;
                return;
            }
            Err(e) => {
                let report = FailureReport::new(
                    ErrorCategory::Logic,
                    FailureSource::Transcription,
                    format!("transcription task panicked: {e}"),
                    Phase::Transcribing,
                );
                self.fail_session(id, report).await;
                return;
            }
        };

        // ── 3. Post-processing (best-effort) ─────────────────────────────
        active.session.phase = Phase::PostProcessing;
        log::debug!("pipeline: session {id} → {}", active.session.phase.label());

        let final_text = match &self.post {
            Some(post) => match post.process(&raw_text).await {
                Ok(processed) => processed,
                Err(e) => {
                    // Swallowed at this boundary: the session succeeds with
                    // the raw transcript and no FailureReport is produced.
                    log::warn!("pipeline: post-processing failed ({e}); using raw transcript");
                    raw_text
                }
            },
            None => raw_text,
        };

        // ── 4. Finalise ──────────────────────────────────────────────────
        active.session.text = Some(final_text.clone());
        log::info!("pipeline: session {id} succeeded ({} chars)", final_text.len());
        self.emit(SessionEvent::SessionSucceeded {
            id,
            text: final_text,
        })
        .await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Any active phase → `Idle` on a classified failure.
    ///
    /// `Infrastructure` reports are forwarded to the supervisor *before* the
    /// phase resets; `Process`/`Logic` reports only surface as events.
    async fn fail_session(&mut self, id: u64, report: FailureReport) {
        match report.category {
            ErrorCategory::Logic => log::error!("pipeline: {report}"),
            _ => log::warn!("pipeline: {report}"),
        }

        self.emit(SessionEvent::SessionFailed {
            id,
            report: report.clone(),
        })
        .await;

        if report.category == ErrorCategory::Infrastructure {
            self.supervisor.on_failure_report(report).await;
        }

        self.active = None;
    }

    /// Stop and drop an active capture on teardown; the session is discarded
    /// without events.
    fn discard_active(&mut self) {
        if let Some(active) = self.active.take() {
            log::info!(
                "pipeline: discarding session {} on shutdown",
                active.session.id
            );
            if let Err(e) = active.capture.stop_capture(active.session.id) {
                log::warn!("pipeline: failed to stop capture during shutdown: {e}");
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        // A dropped listener must not kill the pipeline.
        let _ = self.event_tx.send(event).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::audio::{CaptureError, MockCaptureSource};
    use crate::config::RecoveryConfig;
    use crate::post::MockPostProcessor;
    use crate::recovery::{
        MockCaptureFactory, MockEngineFactory, RecoveryOutcome, RecoveryTarget,
    };
    use crate::stt::{ComputeBackend, MockTranscriptionEngine, TranscribeError};
    use crate::audio::DeviceSelection;

    // -----------------------------------------------------------------------
    // Test wiring
    // -----------------------------------------------------------------------

    struct Harness {
        trigger: PipelineTrigger,
        events: mpsc::Receiver<SessionEvent>,
        supervisor: Arc<RecoverySupervisor>,
        task: tokio::task::JoinHandle<()>,
    }

    /// Wire an orchestrator with the given doubles and spawn its run loop.
    fn spawn_pipeline(
        capture: Arc<dyn CaptureSource>,
        engine: Arc<dyn TranscriptionEngine>,
        post: Option<Arc<dyn PostProcessor>>,
        capture_factory: Arc<MockCaptureFactory>,
        engine_factory: Arc<MockEngineFactory>,
    ) -> (
        Harness,
        Arc<SwapSlot<dyn CaptureSource>>,
        Arc<SwapSlot<dyn TranscriptionEngine>>,
    ) {
        let capture_slot = Arc::new(SwapSlot::new(capture));
        let engine_slot = Arc::new(SwapSlot::new(engine));
        let (event_tx, events) = mpsc::channel(64);

        let supervisor = Arc::new(RecoverySupervisor::new(
            Arc::clone(&capture_slot),
            Arc::clone(&engine_slot),
            capture_factory,
            engine_factory,
            DeviceSelection::Named("configured mic".into()),
            ComputeBackend::Accelerator,
            RecoveryConfig::default(),
            event_tx.clone(),
        ));

        let orchestrator = RecordingOrchestrator::new(
            Arc::clone(&capture_slot),
            Arc::clone(&engine_slot),
            post,
            Arc::clone(&supervisor),
            event_tx,
        );

        let (trigger, command_rx) = command_channel();
        let task = tokio::spawn(orchestrator.run(command_rx));

        (
            Harness {
                trigger,
                events,
                supervisor,
                task,
            },
            capture_slot,
            engine_slot,
        )
    }

    /// Close the command channel, wait for the run loop, and drain all
    /// emitted events.
    async fn finish(mut harness: Harness) -> (Vec<SessionEvent>, Arc<RecoverySupervisor>) {
        drop(harness.trigger);
        harness.task.await.expect("orchestrator task panicked");

        let mut events = Vec::new();
        while let Ok(event) = harness.events.try_recv() {
            events.push(event);
        }
        (events, harness.supervisor)
    }

    fn no_factories() -> (Arc<MockCaptureFactory>, Arc<MockEngineFactory>) {
        (
            Arc::new(MockCaptureFactory::failing()),
            Arc::new(MockEngineFactory::failing()),
        )
    }

    // -----------------------------------------------------------------------
    // Happy path and rejection policy
    // -----------------------------------------------------------------------

    /// Full start + stop should emit Started then Succeeded with the
    /// engine's text.
    #[tokio::test]
    async fn start_then_stop_succeeds_end_to_end() {
        let (cf, ef) = no_factories();
        let (harness, _, _) = spawn_pipeline(
            Arc::new(MockCaptureSource::ok()),
            Arc::new(MockTranscriptionEngine::ok("hello world")),
            None,
            cf,
            ef,
        );

        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, _) = finish(harness).await;

        assert!(matches!(events[0], SessionEvent::SessionStarted { id: 1 }));
        match &events[1] {
            SessionEvent::SessionSucceeded { id, text } => {
                assert_eq!(*id, 1);
                assert_eq!(text, "hello world");
            }
            other => panic!("expected SessionSucceeded, got {other:?}"),
        }
        assert_eq!(events.len(), 2);
    }

    /// A start while a session is active is rejected: one session, one
    /// Started event, and the capture source is not touched again.
    #[tokio::test]
    async fn start_while_active_is_rejected() {
        let capture = Arc::new(MockCaptureSource::ok());
        let (cf, ef) = no_factories();
        let (harness, _, _) = spawn_pipeline(
            Arc::clone(&capture) as Arc<dyn CaptureSource>,
            Arc::new(MockTranscriptionEngine::ok("text")),
            None,
            cf,
            ef,
        );

        harness.trigger.request_start();
        harness.trigger.request_start(); // surplus — must be rejected
        harness.trigger.request_stop();
        let (events, _) = finish(harness).await;

        let started = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::SessionStarted { .. }))
            .count();
        assert_eq!(started, 1, "exactly one session may start");
        assert_eq!(capture.start_count(), 1, "rejected start must not reach the source");
        assert!(matches!(
            events.last(),
            Some(SessionEvent::SessionSucceeded { .. })
        ));
    }

    /// Stop while idle is a no-op and the pipeline stays usable.
    #[tokio::test]
    async fn stop_while_idle_is_noop() {
        let (cf, ef) = no_factories();
        let (harness, _, _) = spawn_pipeline(
            Arc::new(MockCaptureSource::ok()),
            Arc::new(MockTranscriptionEngine::ok("still works")),
            None,
            cf,
            ef,
        );

        harness.trigger.request_stop(); // no session yet
        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, _) = finish(harness).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SessionEvent::SessionStarted { .. }));
        assert!(matches!(events[1], SessionEvent::SessionSucceeded { .. }));
    }

    /// Events for consecutive sessions arrive in transition order.
    #[tokio::test]
    async fn events_delivered_in_transition_order() {
        let (cf, ef) = no_factories();
        let (harness, _, _) = spawn_pipeline(
            Arc::new(MockCaptureSource::ok()),
            Arc::new(MockTranscriptionEngine::ok("t")),
            None,
            cf,
            ef,
        );

        for _ in 0..2 {
            harness.trigger.request_start();
            harness.trigger.request_stop();
        }
        let (events, _) = finish(harness).await;

        let shape: Vec<&'static str> = events
            .iter()
            .map(|e| match e {
                SessionEvent::SessionStarted { .. } => "started",
                SessionEvent::SessionSucceeded { .. } => "succeeded",
                SessionEvent::SessionFailed { .. } => "failed",
                SessionEvent::RecoveryNotice { .. } => "notice",
            })
            .collect();
        assert_eq!(shape, vec!["started", "succeeded", "started", "succeeded"]);
    }

    // -----------------------------------------------------------------------
    // Post-processing
    // -----------------------------------------------------------------------

    /// A working post-processor's output becomes the session's final text.
    #[tokio::test]
    async fn post_processor_transforms_text() {
        let (cf, ef) = no_factories();
        let (harness, _, _) = spawn_pipeline(
            Arc::new(MockCaptureSource::ok()),
            Arc::new(MockTranscriptionEngine::ok("a long rambling transcript")),
            Some(Arc::new(MockPostProcessor::ok("a summary"))),
            cf,
            ef,
        );

        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, _) = finish(harness).await;

        match &events[1] {
            SessionEvent::SessionSucceeded { text, .. } => assert_eq!(text, "a summary"),
            other => panic!("expected SessionSucceeded, got {other:?}"),
        }
    }

    /// A failing post-processor is swallowed: the raw transcript becomes the
    /// final text, the session succeeds, and no recovery runs.
    #[tokio::test]
    async fn post_processor_failure_falls_back_to_raw_text() {
        let post = Arc::new(MockPostProcessor::failing());
        let (cf, ef) = no_factories();
        let capture_factory = Arc::clone(&cf);
        let (harness, _, _) = spawn_pipeline(
            Arc::new(MockCaptureSource::ok()),
            Arc::new(MockTranscriptionEngine::ok("raw transcript")),
            Some(Arc::clone(&post) as Arc<dyn PostProcessor>),
            cf,
            ef,
        );

        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, supervisor) = finish(harness).await;

        assert_eq!(post.call_count(), 1);
        match &events[1] {
            SessionEvent::SessionSucceeded { text, .. } => assert_eq!(text, "raw transcript"),
            other => panic!("expected SessionSucceeded, got {other:?}"),
        }
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, SessionEvent::SessionFailed { .. })),
            "post-processor failures must never surface a FailureReport"
        );
        assert!(supervisor.attempts().is_empty());
        assert_eq!(capture_factory.build_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Failure classification and recovery routing
    // -----------------------------------------------------------------------

    /// A Process failure (audio too short) aborts the session and leaves the
    /// recovery supervisor untouched.
    #[tokio::test]
    async fn process_failure_aborts_without_recovery() {
        // 1000 samples < the 8000-sample minimum → AudioTooShort (Process).
        let (cf, ef) = no_factories();
        let (harness, _, _) = spawn_pipeline(
            Arc::new(MockCaptureSource::with_samples(vec![0.0; 1_000])),
            Arc::new(MockTranscriptionEngine::ok("unreachable")),
            None,
            cf,
            ef,
        );

        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, supervisor) = finish(harness).await;

        match &events[1] {
            SessionEvent::SessionFailed { report, .. } => {
                assert_eq!(report.category, ErrorCategory::Process);
                assert_eq!(report.source, FailureSource::Transcription);
                assert_eq!(report.occurred_during, Phase::Transcribing);
            }
            other => panic!("expected SessionFailed, got {other:?}"),
        }
        assert!(supervisor.attempts().is_empty(), "Process must not trigger recovery");
    }

    /// A Logic failure aborts the session and leaves the recovery supervisor
    /// untouched.
    #[tokio::test]
    async fn logic_failure_aborts_without_recovery() {
        let (cf, ef) = no_factories();
        let (harness, _, _) = spawn_pipeline(
            Arc::new(MockCaptureSource::ok()),
            Arc::new(MockTranscriptionEngine::err(TranscribeError::Invariant(
                "segment index out of range".into(),
            ))),
            None,
            cf,
            ef,
        );

        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, supervisor) = finish(harness).await;

        match &events[1] {
            SessionEvent::SessionFailed { report, .. } => {
                assert_eq!(report.category, ErrorCategory::Logic);
            }
            other => panic!("expected SessionFailed, got {other:?}"),
        }
        assert!(supervisor.attempts().is_empty(), "Logic must not trigger recovery");
    }

    /// The capture device disappearing mid-capture is an Infrastructure
    /// failure: recover_capture runs exactly once, swaps in the factory's
    /// replacement, and the next session succeeds end-to-end on it.
    #[tokio::test]
    async fn capture_device_loss_recovers_and_next_session_succeeds() {
        let replacement = Arc::new(MockCaptureSource::ok());
        let capture_factory = Arc::new(MockCaptureFactory::with_results(vec![Ok(
            Arc::clone(&replacement) as Arc<dyn CaptureSource>,
        )]));

        let (harness, capture_slot, _) = spawn_pipeline(
            Arc::new(MockCaptureSource::failing_stop(CaptureError::DeviceLost(
                "unplugged".into(),
            ))),
            Arc::new(MockTranscriptionEngine::ok("after recovery")),
            None,
            Arc::clone(&capture_factory),
            Arc::new(MockEngineFactory::failing()),
        );

        // Session 1: device vanishes on stop.
        harness.trigger.request_start();
        harness.trigger.request_stop();
        // Session 2: runs on the swapped-in replacement source.
        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, supervisor) = finish(harness).await;

        assert_eq!(capture_factory.build_count(), 1, "exactly one recovery build");
        assert!(Arc::ptr_eq(
            &capture_slot.get(),
            &(Arc::clone(&replacement) as Arc<dyn CaptureSource>)
        ));
        assert_eq!(replacement.start_count(), 1);

        let attempts = supervisor.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].target, RecoveryTarget::Capture);
        assert_eq!(attempts[0].outcome, RecoveryOutcome::Success);

        // Failure report surfaced, then the retried session succeeded with
        // non-empty text.
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::SessionFailed { report, .. }
                if report.category == ErrorCategory::Infrastructure
                    && report.source == FailureSource::Capture
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::SessionSucceeded { id: 2, text } if !text.is_empty()
        )));
    }

    /// An accelerator fault during transcription falls back to the CPU
    /// backend; the session retried afterwards completes on the fallback
    /// engine.
    #[tokio::test]
    async fn transcription_backend_fault_falls_back_to_cpu() {
        let fallback_engine = Arc::new(MockTranscriptionEngine::ok("cpu transcript"));
        let engine_factory = Arc::new(MockEngineFactory::with_results(vec![
            Err(TranscribeError::BackendFault("accelerator reset".into())),
            Ok(Arc::clone(&fallback_engine) as Arc<dyn TranscriptionEngine>),
        ]));

        let (harness, _, engine_slot) = spawn_pipeline(
            Arc::new(MockCaptureSource::ok()),
            Arc::new(MockTranscriptionEngine::err(TranscribeError::BackendFault(
                "accelerator fault".into(),
            ))),
            None,
            Arc::new(MockCaptureFactory::failing()),
            Arc::clone(&engine_factory),
        );

        harness.trigger.request_start();
        harness.trigger.request_stop();
        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, supervisor) = finish(harness).await;

        assert_eq!(
            engine_factory.backends(),
            vec![ComputeBackend::Accelerator, ComputeBackend::Cpu],
            "preferred backend tried before the fallback"
        );
        assert!(Arc::ptr_eq(
            &engine_slot.get(),
            &(Arc::clone(&fallback_engine) as Arc<dyn TranscriptionEngine>)
        ));

        let attempts = supervisor.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].target, RecoveryTarget::Transcription);
        assert_eq!(attempts[0].outcome, RecoveryOutcome::Success);
        assert!(attempts[0].fallback_used);

        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::SessionSucceeded { id: 2, text } if text == "cpu transcript"
        )));
    }

    // -----------------------------------------------------------------------
    // Hot-swap contract
    // -----------------------------------------------------------------------

    /// A swap issued while transcription is in flight never changes the
    /// engine used by that call; the next session uses the new engine.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hot_swap_mid_transcription_completes_on_old_engine() {
        let old_engine = Arc::new(
            MockTranscriptionEngine::ok("from old engine")
                .with_delay(Duration::from_millis(400)),
        );
        let new_engine = Arc::new(MockTranscriptionEngine::ok("from new engine"));

        let (cf, ef) = no_factories();
        let (harness, _, engine_slot) = spawn_pipeline(
            Arc::new(MockCaptureSource::ok()),
            Arc::clone(&old_engine) as Arc<dyn TranscriptionEngine>,
            None,
            cf,
            ef,
        );

        harness.trigger.request_start();
        harness.trigger.request_stop();

        // Swap while the slow transcription is still running.
        let slot = Arc::clone(&engine_slot);
        let swap_in = Arc::clone(&new_engine) as Arc<dyn TranscriptionEngine>;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            slot.swap(swap_in);
        })
        .await
        .unwrap();

        // Second session after the swap.
        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, _) = finish(harness).await;

        assert_eq!(old_engine.call_count(), 1, "in-flight call stayed on the old engine");
        assert_eq!(new_engine.call_count(), 1, "next call used the new engine");

        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::SessionSucceeded { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["from old engine", "from new engine"]);
    }

    /// A capture-source swap between phases loses no session data: the
    /// session that started on the old source stops on the old source.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn capture_swap_mid_session_finishes_on_pinned_source() {
        let old_capture = Arc::new(MockCaptureSource::ok());
        let new_capture = Arc::new(MockCaptureSource::ok());

        let (cf, ef) = no_factories();
        let (harness, capture_slot, _) = spawn_pipeline(
            Arc::clone(&old_capture) as Arc<dyn CaptureSource>,
            Arc::new(MockTranscriptionEngine::ok("t")),
            None,
            cf,
            ef,
        );

        harness.trigger.request_start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Swap while session 1 is capturing.
        capture_slot.swap(Arc::clone(&new_capture) as Arc<dyn CaptureSource>);

        harness.trigger.request_stop();
        harness.trigger.request_start();
        harness.trigger.request_stop();
        let (events, _) = finish(harness).await;

        assert_eq!(old_capture.start_count(), 1);
        assert_eq!(old_capture.stop_count(), 1, "session 1 stopped on its pinned source");
        assert_eq!(new_capture.start_count(), 1, "session 2 started on the new source");

        let succeeded = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::SessionSucceeded { .. }))
            .count();
        assert_eq!(succeeded, 2);
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Shutdown during an active capture stops the capture and discards the
    /// session without emitting success or failure.
    #[tokio::test]
    async fn shutdown_discards_active_capture() {
        let capture = Arc::new(MockCaptureSource::ok());
        let (cf, ef) = no_factories();
        let (harness, _, _) = spawn_pipeline(
            Arc::clone(&capture) as Arc<dyn CaptureSource>,
            Arc::new(MockTranscriptionEngine::ok("t")),
            None,
            cf,
            ef,
        );

        harness.trigger.request_start();
        harness.trigger.shutdown();
        let (events, _) = finish(harness).await;

        assert_eq!(capture.stop_count(), 1, "active capture released on shutdown");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::SessionStarted { .. }));
    }
}
