//! Microphone capture source built on `cpal`.
//!
//! [`DeviceCaptureSource`] implements [`CaptureSource`] for a real input
//! device.  `cpal::Stream` is not `Send`, so each capture session spawns a
//! dedicated stream thread that owns the stream for the session's lifetime:
//! the cpal callback forwards raw buffers over an mpsc channel, the thread
//! downmixes and resamples them to 16 kHz mono, and appends into the shared
//! bounded [`CaptureBuffer`].  Stopping the capture stops the thread, which
//! drops the stream and releases the device.
//!
//! Health checks enumerate devices without opening one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::buffer::CaptureBuffer;
use crate::audio::resample::{downmix_to_mono, resample_to_16k};
use crate::audio::source::{CaptureError, CaptureSource, DeviceSelection, RecordedAudio};
use crate::capability::{Capability, CapabilityStatus};
use crate::config::AudioConfig;

/// How long `start_capture` waits for the stream thread to come up.
const STREAM_START_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Shared per-session state
// ---------------------------------------------------------------------------

struct SharedCapture {
    /// Session currently filling the buffer, if any.
    active: Option<u64>,
    buffer: CaptureBuffer,
    /// Set by the cpal error callback when the device dies mid-capture.
    device_lost: Option<String>,
}

/// Control handle for the running stream thread.
struct StreamControl {
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// DeviceCaptureSource
// ---------------------------------------------------------------------------

/// Production capture source bound to a configured (or default) device.
pub struct DeviceCaptureSource {
    selection: DeviceSelection,
    /// Device name resolved at construction, for status reporting.
    device_name: String,
    sample_rate: u32,
    shared: Arc<Mutex<SharedCapture>>,
    control: Mutex<Option<StreamControl>>,
}

impl DeviceCaptureSource {
    /// Bind to the selected device.
    ///
    /// Resolves the device and verifies it can report an input configuration,
    /// but does not open a stream — that happens per capture session.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NoDevice`] when the selection cannot be resolved,
    /// [`CaptureError::Stream`] when the device refuses to report a config.
    pub fn new(selection: DeviceSelection, config: &AudioConfig) -> Result<Self, CaptureError> {
        let device = resolve_input_device(&selection)?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| selection.label().to_string());

        device
            .default_input_config()
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        let max_samples = max_samples(config);

        Ok(Self {
            selection,
            device_name,
            sample_rate: config.sample_rate,
            shared: Arc::new(Mutex::new(SharedCapture {
                active: None,
                buffer: CaptureBuffer::new(max_samples),
                device_lost: None,
            })),
            control: Mutex::new(None),
        })
    }

    /// Name of the device this source resolved at construction.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Capability for DeviceCaptureSource {
    /// Device still enumerable and able to report an input config.  Never
    /// opens the device.
    fn is_healthy(&self) -> bool {
        match resolve_input_device(&self.selection) {
            Ok(device) => device.default_input_config().is_ok(),
            Err(_) => false,
        }
    }

    fn status(&self) -> CapabilityStatus {
        let active = self.shared.lock().unwrap().active;
        CapabilityStatus::new(self.is_healthy())
            .with_detail("device", self.device_name.clone())
            .with_detail("selection", self.selection.label().to_string())
            .with_detail("sample_rate", self.sample_rate.to_string())
            .with_detail(
                "capturing",
                active.map_or("no".to_string(), |id| format!("session {id}")),
            )
    }
}

impl CaptureSource for DeviceCaptureSource {
    fn start_capture(&self, session_id: u64) -> Result<(), CaptureError> {
        {
            let mut shared = self.shared.lock().unwrap();
            if let Some(current) = shared.active {
                return Err(CaptureError::CaptureActive(current));
            }
            shared.buffer.clear();
            shared.device_lost = None;
            shared.active = Some(session_id);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_selection = self.selection.clone();
        let thread_shared = Arc::clone(&self.shared);
        let thread_stop = Arc::clone(&stop);

        let spawn_result = thread::Builder::new()
            .name("capture-stream".into())
            .spawn(move || stream_thread(thread_selection, thread_shared, thread_stop, ready_tx));

        let handle = match spawn_result {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.lock().unwrap().active = None;
                return Err(CaptureError::Stream(format!(
                    "failed to spawn capture thread: {e}"
                )));
            }
        };

        match ready_rx.recv_timeout(STREAM_START_TIMEOUT) {
            Ok(Ok(())) => {
                *self.control.lock().unwrap() = Some(StreamControl {
                    stop,
                    thread: handle,
                });
                log::debug!("capture started for session {session_id} on '{}'", self.device_name);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                self.shared.lock().unwrap().active = None;
                Err(e)
            }
            Err(_) => {
                // Thread is wedged; detach it — it exits once the stop flag
                // is observed or the process ends.
                stop.store(true, Ordering::SeqCst);
                self.shared.lock().unwrap().active = None;
                Err(CaptureError::Stream(
                    "timed out waiting for input stream to start".into(),
                ))
            }
        }
    }

    fn stop_capture(&self, session_id: u64) -> Result<RecordedAudio, CaptureError> {
        {
            let shared = self.shared.lock().unwrap();
            match shared.active {
                None => return Err(CaptureError::NoCaptureActive),
                Some(current) if current != session_id => {
                    return Err(CaptureError::SessionMismatch {
                        requested: session_id,
                        active: current,
                    });
                }
                Some(_) => {}
            }
        }

        // Stop the stream thread first so no more samples land after the
        // drain below.
        if let Some(control) = self.control.lock().unwrap().take() {
            control.stop.store(true, Ordering::SeqCst);
            if control.thread.join().is_err() {
                log::error!("capture stream thread panicked");
            }
        }

        let mut shared = self.shared.lock().unwrap();
        shared.active = None;
        let capacity = shared.buffer.capacity();
        let overflowed = shared.buffer.overflowed();
        let samples = shared.buffer.take();

        if let Some(reason) = shared.device_lost.take() {
            return Err(CaptureError::DeviceLost(reason));
        }
        if overflowed {
            return Err(CaptureError::BufferOverflow(capacity));
        }

        log::debug!(
            "capture stopped for session {session_id}: {} samples",
            samples.len()
        );
        Ok(RecordedAudio::new(samples, self.sample_rate))
    }
}

// ---------------------------------------------------------------------------
// Stream thread
// ---------------------------------------------------------------------------

/// Owns the cpal stream for one capture session.
///
/// Reports startup success/failure once over `ready_tx`, then pumps raw
/// buffers from the cpal callback into the shared capture buffer until the
/// stop flag is set.
fn stream_thread(
    selection: DeviceSelection,
    shared: Arc<Mutex<SharedCapture>>,
    stop: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<Result<(), CaptureError>>,
) {
    let device = match resolve_input_device(&selection) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
            return;
        }
    };

    let channels = supported.channels();
    let native_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<f32>>();
    let error_shared = Arc::clone(&shared);

    let stream = match device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // Ignore send errors; the processing loop may already be gone.
            let _ = chunk_tx.send(data.to_vec());
        },
        move |err: cpal::StreamError| {
            log::error!("input stream error: {err}");
            error_shared.lock().unwrap().device_lost = Some(err.to_string());
        },
        None,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        match chunk_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(raw) => {
                let mono = downmix_to_mono(&raw, channels);
                let resampled = resample_to_16k(&mono, native_rate);
                let mut sh = shared.lock().unwrap();
                if sh.active.is_some() {
                    sh.buffer.push_slice(&resampled);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    // Dropping the stream here stops the hardware callback and releases the
    // device handle.
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve a [`DeviceSelection`] against the current host.
fn resolve_input_device(selection: &DeviceSelection) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match selection {
        DeviceSelection::SystemDefault => host
            .default_input_device()
            .ok_or_else(|| CaptureError::NoDevice("system default".into())),
        DeviceSelection::Named(name) => host
            .input_devices()
            .map_err(|e| CaptureError::Stream(e.to_string()))?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::NoDevice(name.clone())),
    }
}

/// Buffer cap in samples for the configured maximum recording length.
pub(crate) fn max_samples(config: &AudioConfig) -> usize {
    ((config.sample_rate as f32 * config.max_recording_secs) as usize).max(1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
