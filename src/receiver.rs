//! Aggregating receiver: presents consumers with "one envelope per device"
//! tuples, with an optional synchronized mode that paces the group to its
//! slowest device.

use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, trace};

use crate::domain::FrameEnvelope;
use crate::transport::Subscriber;

pub type Tuple = HashMap<String, FrameEnvelope>;

/// Subscribes to the bus and reassembles one envelope per configured device
/// per `read()` call. See `camera_capture_system.core.MultiCaptureSubscriber`
/// for the synchronized-mode pacing algorithm this mirrors.
pub struct Receiver<S: Subscriber> {
    subscriber: S,
    device_names: Vec<String>,
    synchronized: bool,
    baselines: HashMap<String, f64>,
    has_baseline: bool,
}

impl<S: Subscriber> Receiver<S> {
    pub fn new(subscriber: S, device_names: Vec<String>, synchronized: bool) -> Self {
        Receiver { subscriber, device_names, synchronized, baselines: HashMap::new(), has_baseline: false }
    }

    pub fn start(&mut self) -> Result<()> {
        self.subscriber.start()
    }

    pub fn stop(&mut self) {
        self.subscriber.stop();
    }

    /// Returns a complete `name -> envelope` mapping, or `None` if
    /// `max_attempts` successive receive calls fail to complete the set.
    pub fn read(&mut self, max_attempts: u32) -> Result<Option<Tuple>> {
        let mut pending: Tuple = HashMap::new();
        let mut attempts_left = max_attempts;

        while pending.len() < self.device_names.len() && attempts_left > 0 {
            match self.subscriber.receive()? {
                None => {
                    attempts_left -= 1;
                    trace!(attempts_left, "receive timed out during aggregation");
                    continue;
                }
                Some(envelope) => {
                    let name = envelope.device.name.clone();
                    if pending.contains_key(&name) {
                        attempts_left -= 1;
                        debug!(device = %name, "overwriting pending envelope with a newer one");
                    }
                    pending.insert(name, envelope);
                }
            }
        }

        if pending.len() < self.device_names.len() {
            return Ok(None);
        }

        if self.synchronized {
            self.pace_to_slowest(&mut pending)?;
        }

        Ok(Some(pending))
    }

    /// On the first tuple, records baselines. On later tuples, for any
    /// device whose envelope trails the current max baseline, drains and
    /// discards that device's queue until it catches up, then updates every
    /// baseline to the emitted tuple's timestamps.
    fn pace_to_slowest(&mut self, pending: &mut Tuple) -> Result<()> {
        if !self.has_baseline {
            for name in &self.device_names {
                if let Some(envelope) = pending.get(name) {
                    self.baselines.insert(name.clone(), envelope.end_read_ts);
                }
            }
            self.has_baseline = true;
            return Ok(());
        }

        let max_baseline = self.baselines.values().cloned().fold(f64::MIN, f64::max);

        for name in self.device_names.clone() {
            loop {
                let behind = pending.get(&name).map(|e| e.end_read_ts < max_baseline).unwrap_or(true);
                if !behind {
                    break;
                }
                match self.subscriber.receive()? {
                    None => break,
                    Some(envelope) => {
                        if envelope.device.name == name {
                            pending.insert(name.clone(), envelope);
                        }
                        // Envelopes for other devices received while
                        // draining are discarded, per spec: this step exists
                        // solely to catch `name` up to the group's pace.
                    }
                }
            }
        }

        for name in &self.device_names {
            if let Some(envelope) = pending.get(name) {
                self.baselines.insert(name.clone(), envelope.end_read_ts);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CameraParams, DeviceDescriptor, DeviceKind, Dtype, Payload, PixelFormat};
    use std::cell::RefCell;

    struct ScriptedSubscriber {
        script: RefCell<std::collections::VecDeque<Option<FrameEnvelope>>>,
    }

    impl ScriptedSubscriber {
        fn new(script: Vec<Option<FrameEnvelope>>) -> Self {
            ScriptedSubscriber { script: RefCell::new(script.into()) }
        }
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

    fn envelope(name: &str, ts: f64) -> FrameEnvelope {
        let device = DeviceDescriptor::new(
            format!("id-{name}"),
            name,
            DeviceKind::Camera(CameraParams { width: 640, height: 480, fps: 30.0, pixel_format: PixelFormat::Rgb8 }),
        )
        .unwrap();
        let payload = Payload::new(vec![1], Dtype::U8, vec![0]);
        FrameEnvelope::new(device, payload, ts, ts)
    }

    #[test]
    fn aggregates_one_per_device() {
        let sub = ScriptedSubscriber::new(vec![Some(envelope("a", 1.0)), Some(envelope("b", 1.0))]);
        let mut receiver = Receiver::new(sub, vec!["a".into(), "b".into()], false);
        let tuple = receiver.read(5).unwrap().unwrap();
        assert_eq!(tuple.len(), 2);
        assert!(tuple.contains_key("a") && tuple.contains_key("b"));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let sub = ScriptedSubscriber::new(vec![None, None, None]);
        let mut receiver = Receiver::new(sub, vec!["a".into()], false);
        assert_eq!(receiver.read(3).unwrap(), None);
    }

    #[test]
    fn duplicate_overwrites_and_costs_an_attempt() {
        let sub = ScriptedSubscriber::new(vec![
            Some(envelope("a", 1.0)),
            Some(envelope("a", 2.0)),
            Some(envelope("b", 1.0)),
        ]);
        let mut receiver = Receiver::new(sub, vec!["a".into(), "b".into()], false);
        let tuple = receiver.read(5).unwrap().unwrap();
        assert_eq!(tuple["a"].end_read_ts, 2.0);
    }

    #[test]
    fn single_device_synchronized_mode_emits_every_frame() {
        let sub = ScriptedSubscriber::new(vec![Some(envelope("a", 1.0)), Some(envelope("a", 2.0))]);
        let mut receiver = Receiver::new(sub, vec!["a".into()], true);
        assert_eq!(receiver.read(5).unwrap().unwrap()["a"].end_read_ts, 1.0);
        assert_eq!(receiver.read(5).unwrap().unwrap()["a"].end_read_ts, 2.0);
    }

    #[test]
    fn synchronized_mode_drains_lagging_device_until_caught_up() {
        // Round 1 establishes baselines a=1.0, b=1.0.
        // Round 2: b pulls ahead (b=3.0) while a stays at 2.0; baselines
        // become a=2.0, b=3.0 (max baseline 3.0).
        // Round 3: a again arrives behind the 3.0 max baseline, so the
        // receiver must drain extra `a` frames until one reaches >= 3.0.
        let sub = ScriptedSubscriber::new(vec![
            Some(envelope("a", 1.0)),
            Some(envelope("b", 1.0)),
            Some(envelope("a", 2.0)),
            Some(envelope("b", 3.0)),
            Some(envelope("a", 2.0)),
            Some(envelope("b", 3.0)),
            Some(envelope("a", 3.5)),
        ]);
        let mut receiver = Receiver::new(sub, vec!["a".into(), "b".into()], true);
        let first = receiver.read(10).unwrap().unwrap();
        assert_eq!(first["a"].end_read_ts, 1.0);
        assert_eq!(first["b"].end_read_ts, 1.0);

        let second = receiver.read(10).unwrap().unwrap();
        assert_eq!(second["a"].end_read_ts, 2.0);
        assert_eq!(second["b"].end_read_ts, 3.0);

        let third = receiver.read(10).unwrap().unwrap();
        assert_eq!(third["a"].end_read_ts, 3.5);
        assert_eq!(third["b"].end_read_ts, 3.0);
        assert!(third["a"].end_read_ts >= third["b"].end_read_ts);
    }
}
