//! Bounded-queue video segment writer. Mirrors
//! `device_capture_system.fileIO.VideoSaver.save_video`: a queue sized to
//! exactly one segment, a background writer thread that opens one encoder
//! per device on the first frame and closes all of them in order, and a
//! bad-frame budget that aborts the segment rather than hanging forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::domain::MediaSpec;
use crate::error::CoreError;
use crate::receiver::{Receiver, Tuple};
use crate::sink::FrameEncoder;
use crate::transport::Subscriber;

pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn FrameEncoder> + Send + Sync>;

pub struct VideoSink<S: Subscriber> {
    receiver: Receiver<S>,
    spec: MediaSpec,
    encoder_factory: EncoderFactory,
    max_aggregation_attempts: u32,
}

impl<S: Subscriber> VideoSink<S> {
    pub fn new(
        receiver: Receiver<S>,
        spec: MediaSpec,
        encoder_factory: EncoderFactory,
        max_aggregation_attempts: u32,
    ) -> Self {
        VideoSink { receiver, spec, encoder_factory, max_aggregation_attempts }
    }

    pub fn start(&mut self) -> Result<()> {
        self.receiver.start()
    }

    pub fn stop(&mut self) {
        self.receiver.stop();
    }

    /// Collects `fps * duration_seconds` aggregated tuples and writes one
    /// output file per device. Aborts with `SegmentFailed` if the receiver
    /// fails to produce a tuple `bad_frame_budget` times in a row.
    pub fn save_segment(&mut self, segment_name: &str, bad_frame_budget: u32) -> std::result::Result<(), CoreError> {
        let frames_needed = self.spec.frames_needed();
        let (tx, rx) = crossbeam_channel::bounded::<Tuple>(frames_needed.max(1) as usize);
        let spec = self.spec.clone_for_writer();
        let encoder_factory = self.encoder_factory.clone();
        let segment_name_owned = segment_name.to_string();

        let writer = std::thread::spawn(move || -> Result<()> {
            let mut encoders: HashMap<String, Box<dyn FrameEncoder>> = HashMap::new();
            let mut written = 0u32;
            while written < frames_needed {
                let tuple = match rx.recv() {
                    Ok(tuple) => tuple,
                    Err(_) => {
                        // Producer closed the channel early: either the
                        // segment was aborted, or frames_needed == 0.
                        break;
                    }
                };
                for (name, envelope) in &tuple {
                    let encoder = match encoders.get_mut(name) {
                        Some(e) => e,
                        None => {
                            let mut encoder = encoder_factory();
                            let path = spec.path_for(name, &segment_name_owned);
                            encoder.open(&path, &envelope.payload).with_context(|| format!("opening encoder for {name}"))?;
                            encoders.insert(name.clone(), encoder);
                            encoders.get_mut(name).unwrap()
                        }
                    };
                    encoder.encode_frame(&envelope.payload).with_context(|| format!("encoding frame for {name}"))?;
                }
                written += 1;
            }
            for (name, mut encoder) in encoders {
                encoder.finish().with_context(|| format!("finishing encoder for {name}"))?;
            }
            if written < frames_needed {
                anyhow::bail!("segment aborted after {written}/{frames_needed} frames");
            }
            Ok(())
        });

        let mut bad_frames = 0u32;
        let mut aborted = false;
        for _ in 0..frames_needed {
            match self.receiver.read(self.max_aggregation_attempts) {
                Ok(Some(tuple)) => {
                    bad_frames = 0;
                    if tx.send(tuple).is_err() {
                        aborted = true;
                        break;
                    }
                }
                Ok(None) => {
                    bad_frames += 1;
                    warn!(segment = segment_name, bad_frames, bad_frame_budget, "aggregation attempt failed");
                    if bad_frames > bad_frame_budget {
                        aborted = true;
                        break;
                    }
                }
                Err(e) => {
                    error!(segment = segment_name, error = %e, "receiver error during segment capture");
                    aborted = true;
                    break;
                }
            }
        }
        drop(tx);

        let writer_result = writer.join();

        if aborted {
            return Err(CoreError::SegmentFailed {
                segment: segment_name.to_string(),
                reason: format!("bad frame budget ({bad_frame_budget}) exceeded"),
            });
        }

        match writer_result {
            Ok(Ok(())) => {
                info!(segment = segment_name, frames = frames_needed, "segment written");
                Ok(())
            }
            Ok(Err(e)) => Err(CoreError::SegmentFailed { segment: segment_name.to_string(), reason: e.to_string() }),
            Err(_) => Err(CoreError::SegmentFailed { segment: segment_name.to_string(), reason: "writer thread panicked".to_string() }),
        }
    }
}

impl MediaSpec {
    fn clone_for_writer(&self) -> MediaSpec {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CameraParams, DeviceDescriptor, DeviceKind, Dtype, FrameEnvelope, Payload, PixelFormat};
    use crate::sink::RawContainerEncoder;
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

    fn envelope(name: &str, frame_no: u8) -> FrameEnvelope {
        let device = DeviceDescriptor::new(
            format!("id-{name}"),
            name,
            DeviceKind::Camera(CameraParams { width: 2, height: 2, fps: 2.0, pixel_format: PixelFormat::Rgb8 }),
        )
        .unwrap();
        let payload = Payload::new(vec![2, 2, 1], Dtype::U8, vec![frame_no; 4]);
        FrameEnvelope::new(device, payload, frame_no as f64, frame_no as f64)
    }

    #[test]
    fn writes_exactly_frames_needed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let spec = MediaSpec::new(dir.path(), "{name}", "raw", "raw", 2, 1).unwrap();
        let script: VecDeque<Option<FrameEnvelope>> =
            (0..2).map(|i| Some(envelope("a", i))).collect();
        let subscriber = ScriptedSubscriber { script: RefCell::new(script) };
        let receiver = Receiver::new(subscriber, vec!["a".to_string()], false);
        let factory: EncoderFactory = Arc::new(|| Box::new(RawContainerEncoder::default()) as Box<dyn FrameEncoder>);
        let mut sink = VideoSink::new(receiver, spec.clone(), factory, 5);

        sink.save_segment("seg0", 0).unwrap();

        let path = spec.path_for("a", "seg0");
        assert!(path.exists());
    }

    #[test]
    fn zero_bad_frame_budget_fails_on_first_miss() {
        let dir = tempfile::tempdir().unwrap();
        let spec = MediaSpec::new(dir.path(), "{name}", "raw", "raw", 2, 1).unwrap();
        let subscriber = ScriptedSubscriber { script: RefCell::new(VecDeque::from([None])) };
        let receiver = Receiver::new(subscriber, vec!["a".to_string()], false);
        let factory: EncoderFactory = Arc::new(|| Box::new(RawContainerEncoder::default()) as Box<dyn FrameEncoder>);
        let mut sink = VideoSink::new(receiver, spec, factory, 1);

        let result = sink.save_segment("seg0", 0);
        assert!(matches!(result, Err(CoreError::SegmentFailed { .. })));
    }
}
