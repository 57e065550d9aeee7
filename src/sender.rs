//! Per-device sender: owns one [`DeviceReader`], loops read -> preprocess ->
//! publish, on its own thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::backend::DeviceReader;
use crate::domain::{DeviceDescriptor, DeviceKind, FrameEnvelope, PreprocessingOp};
use crate::transport::Publisher;

/// Applies a preprocessing op to a frame, a no-op for non-camera devices
/// (rotation only ever makes sense for image payloads).
pub fn preprocess(envelope: FrameEnvelope, op: PreprocessingOp) -> FrameEnvelope {
    match envelope.device.kind {
        DeviceKind::Camera(_) if op != PreprocessingOp::None => {
            let payload = op.apply(&envelope.payload);
            FrameEnvelope::new(envelope.device, payload, envelope.start_read_ts, envelope.end_read_ts)
        }
        _ => envelope,
    }
}

/// Timing knobs a sender worker's loop observes. Threaded in from
/// [`crate::config::Config`] by whoever constructs the worker.
#[derive(Debug, Clone, Copy)]
pub struct SenderTimings {
    pub read_timeout: Duration,
    pub invalid_frame_timeout: Duration,
}

type ReaderFactory = Box<dyn FnOnce() -> Box<dyn DeviceReader> + Send>;
type PublisherFactory = Box<dyn FnOnce() -> Box<dyn Publisher> + Send>;

/// Owns one device's acquire-preprocess-publish loop on a dedicated thread.
///
/// Both the reader and the publisher are constructed *inside* the spawned
/// thread via factory closures, not built by the caller and handed across:
/// `DeviceReader` is deliberately not `Send` (see `backend::DeviceReader`),
/// and this sidesteps that entirely.
pub struct SenderWorker {
    name: String,
    stop_flag: Arc<AtomicBool>,
    exited_unexpectedly: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SenderWorker {
    pub fn new(
        descriptor: DeviceDescriptor,
        op: PreprocessingOp,
        timings: SenderTimings,
        reader_factory: ReaderFactory,
        publisher_factory: PublisherFactory,
    ) -> Self {
        let name = descriptor.name.clone();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let exited_unexpectedly = Arc::new(AtomicBool::new(false));
        let handle = Self::spawn(
            descriptor,
            op,
            timings,
            reader_factory,
            publisher_factory,
            stop_flag.clone(),
            exited_unexpectedly.clone(),
        );
        SenderWorker { name, stop_flag, exited_unexpectedly, handle: Some(handle) }
    }

    fn spawn(
        descriptor: DeviceDescriptor,
        op: PreprocessingOp,
        timings: SenderTimings,
        reader_factory: ReaderFactory,
        publisher_factory: PublisherFactory,
        stop_flag: Arc<AtomicBool>,
        exited_unexpectedly: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let name = descriptor.name.clone();
        std::thread::Builder::new()
            .name(format!("sender-{name}"))
            .spawn(move || {
                let mut reader = reader_factory();
                let mut publisher = publisher_factory();

                if let Err(e) = reader.start() {
                    error!(device = %name, error = %e, "sender failed to start device reader");
                    exited_unexpectedly.store(true, Ordering::SeqCst);
                    return;
                }
                if let Err(e) = publisher.start() {
                    error!(device = %name, error = %e, "sender failed to start publisher");
                    reader.stop();
                    exited_unexpectedly.store(true, Ordering::SeqCst);
                    return;
                }

                info!(device = %name, "sender started");

                let mut permanent_error = false;
                while !stop_flag.load(Ordering::SeqCst) {
                    match reader.read(timings.read_timeout) {
                        Ok(Some(envelope)) => {
                            let envelope = preprocess(envelope, op);
                            match publisher.send(&envelope) {
                                Ok(true) => {}
                                Ok(false) => debug!(device = %name, "publish dropped at high-water mark"),
                                Err(e) => {
                                    error!(device = %name, error = %e, "permanent transport error");
                                    permanent_error = true;
                                    break;
                                }
                            }
                        }
                        Ok(None) => {
                            std::thread::sleep(timings.invalid_frame_timeout);
                        }
                        Err(e) => {
                            error!(device = %name, error = %e, "permanent device error");
                            permanent_error = true;
                            break;
                        }
                    }
                }

                reader.stop();
                publisher.stop();
                info!(device = %name, "sender stopped");

                if permanent_error && !stop_flag.load(Ordering::SeqCst) {
                    exited_unexpectedly.store(true, Ordering::SeqCst);
                }
            })
            .expect("failed to spawn sender thread")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// True if the worker's thread ended without `stop_process` having been
    /// called, the signal the orchestrator's restart-on-demand monitor
    /// watches for.
    pub fn exited_unexpectedly(&self) -> bool {
        self.exited_unexpectedly.load(Ordering::SeqCst) && !self.is_active()
    }

    /// Idempotent: calling twice has the same effect as once.
    pub fn stop_process(&mut self, timeout: Duration) -> Result<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else { return Ok(()) };

        let deadline = std::time::Instant::now() + timeout;
        while !handle.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!(device = %self.name, "sender did not stop within timeout; abandoning thread handle");
            // Rust cannot forcibly preempt a thread; we stop waiting and let
            // the orchestrator's caller decide what to do next. The stop
            // flag remains set so the worker will exit as soon as it next
            // polls it.
        }
        Ok(())
    }
}

impl Drop for SenderWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop_process(Duration::from_millis(500));
        }
    }
}
