//! Worker-pool image writer: one aggregated tuple becomes one image per
//! device, dispatched across a fixed pool of encode workers. Mirrors
//! `device_capture_system.fileIO.ImageSaver`, realized with a
//! `crossbeam-channel` job queue and `thread::spawn` workers instead of a
//! process pool (see velocut-media's `worker.rs` for the same worker-pool
//! shape).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, warn};

use crate::domain::MediaSpec;
use crate::receiver::Receiver;
use crate::transport::Subscriber;

struct Job {
    device_name: String,
    payload: crate::domain::Payload,
    path: std::path::PathBuf,
}

type EncodeFn = Arc<dyn Fn(&std::path::Path, &crate::domain::Payload) -> Result<()> + Send + Sync>;

pub struct ImageSink<S: Subscriber> {
    receiver: Receiver<S>,
    spec: MediaSpec,
    job_tx: crossbeam_channel::Sender<Job>,
    workers: Vec<std::thread::JoinHandle<()>>,
    inflight: Arc<AtomicUsize>,
    failures: Arc<std::sync::Mutex<Vec<String>>>,
}

impl<S: Subscriber> ImageSink<S> {
    pub fn new(receiver: Receiver<S>, spec: MediaSpec, workers: usize, encode: EncodeFn) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let inflight = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(std::sync::Mutex::new(Vec::new()));

        let handles = (0..workers.max(1))
            .map(|id| {
                let job_rx = job_rx.clone();
                let encode = encode.clone();
                let inflight = inflight.clone();
                let failures = failures.clone();
                std::thread::Builder::new()
                    .name(format!("image-sink-worker-{id}"))
                    .spawn(move || {
                        while let Ok(job) = job_rx.recv() {
                            if let Err(e) = encode(&job.path, &job.payload) {
                                error!(device = %job.device_name, error = %e, "image encode failed");
                                failures.lock().unwrap().push(job.device_name.clone());
                            }
                            inflight.fetch_sub(1, Ordering::SeqCst);
                        }
                    })
                    .expect("failed to spawn image sink worker")
            })
            .collect();

        ImageSink { receiver, spec, job_tx, workers: handles, inflight, failures }
    }

    pub fn start(&mut self) -> Result<()> {
        self.receiver.start()
    }

    /// Reads one aggregated tuple and dispatches one encode job per device.
    /// Returns `true` if the tuple was obtained (jobs dispatched, though not
    /// necessarily yet finished), `false` if the receiver's attempt budget
    /// was exhausted.
    pub fn save_one(&mut self, image_name: &str, max_aggregation_attempts: u32) -> Result<bool> {
        let tuple = match self.receiver.read(max_aggregation_attempts)? {
            Some(tuple) => tuple,
            None => return Ok(false),
        };
        for (name, envelope) in tuple {
            let path = self.spec.path_for(&name, image_name);
            self.inflight.fetch_add(1, Ordering::SeqCst);
            let _ = self.job_tx.send(Job { device_name: name, payload: envelope.payload, path });
        }
        Ok(true)
    }

    /// Repeatedly calls `save_one` until `number_of_images` tuples have been
    /// saved or the receiver returns `false` `bad_frame_budget`+1 times in a
    /// row in a single call sequence.
    pub fn save_images(&mut self, count: u32, image_name_prefix: &str, max_aggregation_attempts: u32) -> Result<u32> {
        let mut saved = 0;
        for i in 0..count {
            let name = format!("{image_name_prefix}{i}");
            if self.save_one(&name, max_aggregation_attempts)? {
                saved += 1;
            } else {
                warn!(index = i, "save_images stopped early: aggregation failed");
                break;
            }
        }
        Ok(saved)
    }

    /// Drains outstanding jobs up to `timeout`, then stops the pool.
    pub fn stop(mut self, timeout: Duration) -> Result<()> {
        self.receiver.stop();
        let deadline = std::time::Instant::now() + timeout;
        while self.inflight.load(Ordering::SeqCst) > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        drop(self.job_tx);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let failures = self.failures.lock().unwrap();
        if !failures.is_empty() {
            anyhow::bail!("image encode failures for devices: {:?}", *failures);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CameraParams, DeviceDescriptor, DeviceKind, Dtype, FrameEnvelope, Payload, PixelFormat};
    use crate::sink::PngEncoder;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct ScriptedSubscriber {
        script: RefCell<VecDeque<Option<FrameEnvelope>>>,
    }

    impl Subscriber for ScriptedSubscriber {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn receive(&mut self) -> crate::error::Result<Option<FrameEnvelope>> {
            Ok(self.script.borrow_mut().pop_front().flatten())
        }
        fn stop(&mut self) {}
    }

    fn envelope(name: &str) -> FrameEnvelope {
        let device = DeviceDescriptor::new(
            format!("id-{name}"),
            name,
            DeviceKind::Camera(CameraParams { width: 2, height: 2, fps: 30.0, pixel_format: PixelFormat::Rgb8 }),
        )
        .unwrap();
        let payload = Payload::new(vec![2, 2, 3], Dtype::U8, vec![128u8; 12]);
        FrameEnvelope::new(device, payload, 0.0, 0.01)
    }

    #[test]
    fn save_one_writes_one_file_per_device() {
        let dir = tempfile::tempdir().unwrap();
        let spec = MediaSpec::new(dir.path(), "{name}", "png", "png", 1, 1).unwrap();
        let subscriber = ScriptedSubscriber {
            script: RefCell::new(VecDeque::from([Some(envelope("a")), Some(envelope("b"))])),
        };
        let receiver = Receiver::new(subscriber, vec!["a".to_string(), "b".to_string()], false);
        let encode: EncodeFn = Arc::new(|path, payload| PngEncoder::encode_one(path, payload));
        let mut sink = ImageSink::new(receiver, spec.clone(), 2, encode);

        let ok = sink.save_one("shot0", 5).unwrap();
        assert!(ok);
        sink.stop(Duration::from_secs(2)).unwrap();

        assert!(spec.path_for("a", "shot0").exists());
        assert!(spec.path_for("b", "shot0").exists());
    }

    #[test]
    fn save_one_returns_false_when_aggregation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let spec = MediaSpec::new(dir.path(), "{name}", "png", "png", 1, 1).unwrap();
        let subscriber = ScriptedSubscriber { script: RefCell::new(VecDeque::from([None])) };
        let receiver = Receiver::new(subscriber, vec!["a".to_string()], false);
        let encode: EncodeFn = Arc::new(|path, payload| PngEncoder::encode_one(path, payload));
        let mut sink = ImageSink::new(receiver, spec, 1, encode);

        assert!(!sink.save_one("shot0", 1).unwrap());
        sink.stop(Duration::from_secs(1)).unwrap();
    }
}
