//! Boots the bus proxy plus N sender workers as a single unit, stops them in
//! reverse order, and restarts a sender whose thread exited unexpectedly, up
//! to a bounded number of attempts, in the style of
//! `camera_capture_system.core.MultiCapturePublisher`'s monitoring loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use crate::backend::DeviceReader;
use crate::bus::BusProxy;
use crate::domain::{DeviceDescriptor, PreprocessingOp};
use crate::sender::{SenderTimings, SenderWorker};
use crate::transport::Publisher;

/// Constructs a fresh `DeviceReader`/`Publisher` pair for one named device.
/// Called once per `start`, and again by the restart monitor each time that
/// device's sender needs to be relaunched.
pub trait WorkerFactory: Send + Sync {
    fn build_reader(&self, descriptor: &DeviceDescriptor) -> Box<dyn DeviceReader>;
    fn build_publisher(&self, descriptor: &DeviceDescriptor) -> Box<dyn Publisher>;
}

struct SenderSlot {
    descriptor: DeviceDescriptor,
    op: PreprocessingOp,
    worker: SenderWorker,
    restarts: u32,
}

pub struct MultiSenderOrchestrator<F: WorkerFactory + 'static> {
    proxy: BusProxy,
    sub_endpoint: String,
    timings: SenderTimings,
    max_restarts: u32,
    factory: Arc<F>,
    senders: Arc<std::sync::Mutex<Vec<SenderSlot>>>,
    monitor_stop: Arc<AtomicBool>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl<F: WorkerFactory + 'static> MultiSenderOrchestrator<F> {
    pub fn new(
        sub_endpoint: impl Into<String>,
        pub_endpoint: impl Into<String>,
        queue_size: u32,
        timings: SenderTimings,
        max_restarts: u32,
        factory: F,
        devices: Vec<DeviceDescriptor>,
        preprocessing: HashMap<String, PreprocessingOp>,
    ) -> Result<Self> {
        crate::domain::validate_device_set(&devices)?;
        for name in preprocessing.keys() {
            if !devices.iter().any(|d| &d.name == name) {
                bail!("preprocessing op specified for unknown device: {name}");
            }
        }

        let sub_endpoint = sub_endpoint.into();
        let pub_endpoint = pub_endpoint.into();
        let proxy = BusProxy::new(sub_endpoint.clone(), pub_endpoint, queue_size);

        let pending: Vec<(DeviceDescriptor, PreprocessingOp)> = devices
            .into_iter()
            .map(|d| {
                let op = preprocessing.get(&d.name).copied().unwrap_or_default();
                (d, op)
            })
            .collect();

        Ok(MultiSenderOrchestrator {
            proxy,
            sub_endpoint,
            timings,
            max_restarts,
            factory: Arc::new(factory),
            senders: Arc::new(std::sync::Mutex::new(
                pending
                    .into_iter()
                    .map(|(descriptor, op)| PendingSlot { descriptor, op })
                    .map(|p| p.into())
                    .collect::<Vec<_>>(),
            )),
            monitor_stop: Arc::new(AtomicBool::new(false)),
            monitor_handle: None,
        })
    }

    fn spawn_one(&self, descriptor: DeviceDescriptor, op: PreprocessingOp) -> SenderWorker {
        let factory = self.factory.clone();
        let factory2 = self.factory.clone();
        let descriptor_for_reader = descriptor.clone();
        let descriptor_for_publisher = descriptor.clone();
        SenderWorker::new(
            descriptor,
            op,
            self.timings,
            Box::new(move || factory.build_reader(&descriptor_for_reader)),
            Box::new(move || factory2.build_publisher(&descriptor_for_publisher)),
        )
    }

    /// Starts the proxy, waits for it to be listening, then starts every
    /// sender and the restart-on-demand monitor thread.
    pub fn start(&mut self) -> Result<()> {
        self.proxy.start()?;

        let mut senders = self.senders.lock().unwrap();
        for slot in senders.iter_mut() {
            slot.worker = self.spawn_one(slot.descriptor.clone(), slot.op);
        }
        drop(senders);

        self.monitor_stop.store(false, Ordering::SeqCst);
        self.monitor_handle = Some(self.spawn_monitor());
        info!("orchestrator started");
        Ok(())
    }

    fn spawn_monitor(&self) -> JoinHandle<()> {
        let senders = self.senders.clone();
        let stop = self.monitor_stop.clone();
        let factory = self.factory.clone();
        let timings = self.timings;
        let max_restarts = self.max_restarts;

        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
                let mut senders = senders.lock().unwrap();
                for slot in senders.iter_mut() {
                    if slot.worker.exited_unexpectedly() {
                        if slot.restarts >= max_restarts {
                            error!(device = %slot.descriptor.name, "restart budget exhausted, giving up");
                            continue;
                        }
                        slot.restarts += 1;
                        warn!(device = %slot.descriptor.name, attempt = slot.restarts, "restarting sender after unexpected exit");
                        let descriptor_for_reader = slot.descriptor.clone();
                        let descriptor_for_publisher = slot.descriptor.clone();
                        let f1 = factory.clone();
                        let f2 = factory.clone();
                        slot.worker = SenderWorker::new(
                            slot.descriptor.clone(),
                            slot.op,
                            timings,
                            Box::new(move || f1.build_reader(&descriptor_for_reader)),
                            Box::new(move || f2.build_publisher(&descriptor_for_publisher)),
                        );
                    }
                }
            }
        })
    }

    /// Stops senders concurrently (each bounded by `timeout`), then stops
    /// the proxy. After this returns, no sender thread and no proxy thread
    /// remain.
    pub fn stop(&mut self, timeout: Duration) {
        self.monitor_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.join();
        }

        let mut senders = self.senders.lock().unwrap();
        for slot in senders.iter_mut() {
            if let Err(e) = slot.worker.stop_process(timeout) {
                error!(device = %slot.descriptor.name, error = %e, "error stopping sender");
            }
        }
        drop(senders);

        self.proxy.stop();
        info!("orchestrator stopped");
    }

    pub fn sub_endpoint(&self) -> &str {
        &self.sub_endpoint
    }

    pub fn active_sender_count(&self) -> usize {
        self.senders.lock().unwrap().iter().filter(|s| s.worker.is_active()).count()
    }
}

struct PendingSlot {
    descriptor: DeviceDescriptor,
    op: PreprocessingOp,
}

impl From<PendingSlot> for SenderSlot {
    fn from(p: PendingSlot) -> Self {
        // Placeholder worker: immediately stopped, replaced by `start()`.
        // Constructing a real (already-exited) thread keeps `SenderSlot`
        // uniform without an `Option<SenderWorker>` everywhere.
        let descriptor = p.descriptor.clone();
        let worker = SenderWorker::new(
            p.descriptor,
            p.op,
            SenderTimings { read_timeout: Duration::from_millis(1), invalid_frame_timeout: Duration::from_millis(1) },
            Box::new(move || Box::new(AlreadyStoppedReader) as Box<dyn DeviceReader>),
            Box::new(|| Box::new(NullPublisher) as Box<dyn Publisher>),
        );
        SenderSlot { descriptor, op: p.op, worker, restarts: 0 }
    }
}

struct AlreadyStoppedReader;
impl DeviceReader for AlreadyStoppedReader {
    fn start(&mut self) -> crate::error::Result<()> {
        Err(anyhow::anyhow!("placeholder reader never starts").into())
    }
    fn read(&mut self, _timeout: Duration) -> crate::error::Result<Option<crate::domain::FrameEnvelope>> {
        Ok(None)
    }
    fn stop(&mut self) {}
    fn is_active(&self) -> bool {
        false
    }
}

struct NullPublisher;
impl Publisher for NullPublisher {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }
    fn send(&mut self, _envelope: &crate::domain::FrameEnvelope) -> Result<bool> {
        Ok(false)
    }
    fn stop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeDeviceReader;
    use crate::domain::{CameraParams, DeviceKind, PixelFormat};
    use crate::transport::zmq_transport::ZmqPublisher;

    struct FakeFactory {
        fail_after: Option<u64>,
    }

    impl WorkerFactory for FakeFactory {
        fn build_reader(&self, descriptor: &DeviceDescriptor) -> Box<dyn DeviceReader> {
            let mut reader = FakeDeviceReader::new(descriptor.clone());
            reader.frame_interval = Duration::from_millis(5);
            reader.fail_after = self.fail_after;
            Box::new(reader)
        }
        fn build_publisher(&self, _descriptor: &DeviceDescriptor) -> Box<dyn Publisher> {
            Box::new(ZmqPublisher::new("tcp://127.0.0.1:59301", 16))
        }
    }

    fn camera(name: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(
            format!("id-{name}"),
            name,
            DeviceKind::Camera(CameraParams { width: 8, height: 4, fps: 30.0, pixel_format: PixelFormat::Rgb8 }),
        )
        .unwrap()
    }

    #[test]
    fn starts_and_stops_all_senders_and_proxy() {
        let mut orchestrator = MultiSenderOrchestrator::new(
            "tcp://127.0.0.1:59302",
            "tcp://127.0.0.1:59303",
            16,
            SenderTimings { read_timeout: Duration::from_millis(20), invalid_frame_timeout: Duration::from_millis(5) },
            3,
            FakeFactory { fail_after: None },
            vec![camera("a"), camera("b"), camera("c")],
            HashMap::new(),
        )
        .unwrap();

        orchestrator.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(orchestrator.active_sender_count(), 3);

        orchestrator.stop(Duration::from_secs(1));
        assert_eq!(orchestrator.active_sender_count(), 0);
        assert!(!orchestrator.proxy.is_active());
    }

    #[test]
    fn rejects_preprocessing_for_unknown_device() {
        let mut ops = HashMap::new();
        ops.insert("ghost".to_string(), PreprocessingOp::Rotate180);
        let result = MultiSenderOrchestrator::new(
            "tcp://127.0.0.1:59304",
            "tcp://127.0.0.1:59305",
            16,
            SenderTimings { read_timeout: Duration::from_millis(20), invalid_frame_timeout: Duration::from_millis(5) },
            3,
            FakeFactory { fail_after: None },
            vec![camera("a")],
            ops,
        );
        assert!(result.is_err());
    }

    #[test]
    fn restarts_sender_after_unexpected_exit() {
        let mut orchestrator = MultiSenderOrchestrator::new(
            "tcp://127.0.0.1:59306",
            "tcp://127.0.0.1:59307",
            16,
            SenderTimings { read_timeout: Duration::from_millis(20), invalid_frame_timeout: Duration::from_millis(5) },
            3,
            FakeFactory { fail_after: Some(1) },
            vec![camera("a")],
            HashMap::new(),
        )
        .unwrap();

        orchestrator.start().unwrap();
        // Let the sender fail and the monitor restart it at least once.
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(orchestrator.active_sender_count(), 1);

        orchestrator.stop(Duration::from_secs(1));
    }
}
