//! Application entry point — headless resilient dictation pipeline.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Build the dependency factories and construct the initial capture
//!    source and transcription engine through the supervisor's fallback
//!    ladders (a missing model degrades to [`UnavailableEngine`] instead of
//!    refusing to start).
//! 4. Wire the hot-swap slots, the recovery supervisor, and the
//!    orchestrator; spawn the orchestrator task and the health-poll task.
//! 5. Read trigger commands from stdin (`start`, `stop`, `quit`) until EOF.
//! 6. Shut down: stop the health poll, send `Shutdown`, and give the
//!    orchestrator a bounded grace period to finish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use voice_pipeline::{
    audio::{CaptureSource, DeviceSelection},
    config::{AppConfig, AppPaths},
    pipeline::{command_channel, RecordingOrchestrator, SessionEvent, SwapSlot},
    post::{ApiSummarizer, PostProcessor},
    recovery::{
        build_capture_with_fallback, build_engine_with_fallback, CaptureSourceFactory,
        DeviceCaptureFactory, RecoverySupervisor, TranscriptionEngineFactory,
        WhisperEngineFactory,
    },
    stt::{ComputeBackend, TranscribeParams, TranscriptionEngine, UnavailableEngine},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice-pipeline starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    let preferred_device = DeviceSelection::from_config(config.audio.input_device.as_deref());
    let preferred_backend = ComputeBackend::preferred(config.stt.use_gpu);
    let model_path = AppPaths::new().model_file(&config.stt.model);

    // 3. Factories and initial dependencies (same fallback ladders the
    //    supervisor uses at recovery time).
    let capture_factory: Arc<dyn CaptureSourceFactory> =
        Arc::new(DeviceCaptureFactory::new(config.audio.clone()));
    let engine_factory: Arc<dyn TranscriptionEngineFactory> = Arc::new(WhisperEngineFactory::new(
        model_path.clone(),
        TranscribeParams {
            language: config.stt.language.clone(),
            ..TranscribeParams::default()
        },
    ));

    let (capture_result, capture_fell_back) =
        build_capture_with_fallback(capture_factory.as_ref(), &preferred_device);
    let capture: Arc<dyn CaptureSource> =
        capture_result.context("no usable input device — connect a microphone and retry")?;
    if capture_fell_back {
        log::warn!("configured input device unavailable; using the system default device");
    }

    let engine: Arc<dyn TranscriptionEngine> =
        match build_engine_with_fallback(engine_factory.as_ref(), preferred_backend) {
            (Ok(engine), fell_back) => {
                if fell_back {
                    log::warn!("accelerator unavailable; transcription runs on cpu");
                }
                engine
            }
            (Err(e), _) => {
                log::warn!(
                    "could not load transcription model ({e}); sessions will fail until {} exists",
                    model_path.display()
                );
                Arc::new(UnavailableEngine::new(model_path))
            }
        };

    // 4. Slots, supervisor, orchestrator
    let capture_slot = Arc::new(SwapSlot::new(capture));
    let engine_slot = Arc::new(SwapSlot::new(engine));
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(32);

    let supervisor = Arc::new(RecoverySupervisor::new(
        Arc::clone(&capture_slot),
        Arc::clone(&engine_slot),
        capture_factory,
        engine_factory,
        preferred_device,
        preferred_backend,
        config.recovery.clone(),
        event_tx.clone(),
    ));

    let post: Option<Arc<dyn PostProcessor>> = if config.post.enabled {
        Some(Arc::new(ApiSummarizer::from_config(&config.post)))
    } else {
        None
    };

    let orchestrator = RecordingOrchestrator::new(
        Arc::clone(&capture_slot),
        Arc::clone(&engine_slot),
        post,
        Arc::clone(&supervisor),
        event_tx,
    );

    let (trigger, command_rx) = command_channel();
    let mut orchestrator_task = tokio::spawn(orchestrator.run(command_rx));
    let monitor = supervisor.start_monitoring(Duration::from_secs(config.recovery.poll_interval_secs));

    // Event listener: print final transcripts, log the rest.
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::SessionStarted { id } => log::info!("session {id} started"),
                SessionEvent::SessionSucceeded { id, text } => println!("[session {id}] {text}"),
                SessionEvent::SessionFailed { id, report } => {
                    log::warn!("session {id} failed: {report}");
                }
                SessionEvent::RecoveryNotice { message } => log::info!("recovery: {message}"),
            }
        }
    });

    // 5. stdin trigger loop
    println!("commands: start | stop | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "start" => trigger.request_start(),
            "stop" => trigger.request_stop(),
            "quit" | "exit" => break,
            "" => {}
            other => eprintln!("unknown command '{other}' (start | stop | quit)"),
        }
    }

    // 6. Shutdown with a bounded grace period.
    log::info!("shutting down");
    monitor.stop();
    trigger.shutdown();
    if tokio::time::timeout(Duration::from_secs(5), &mut orchestrator_task)
        .await
        .is_err()
    {
        log::warn!("orchestrator did not stop within 5s; aborting it");
        orchestrator_task.abort();
    }

    Ok(())
}
