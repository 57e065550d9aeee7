//! A deterministic synthetic frame source. Stands in for real camera
//! hardware (this core's named external collaborator) in tests and demos,
//! and doubles as a reference for how a real `DeviceReader` should honor the
//! timeout/interruption contract.

use std::time::Duration;

use super::DeviceReader;
use crate::domain::{CameraParams, DeviceDescriptor, DeviceKind, Dtype, FrameEnvelope, Payload};
use crate::error::Result;

/// Synthesizes a gradient frame whose bytes are a deterministic function of
/// `frame_index`, so tests can assert on exact payload contents.
fn synthetic_camera_frame(params: &CameraParams, frame_index: u64) -> Payload {
    let bpp = params.bytes_per_pixel();
    let mut bytes = Vec::with_capacity((params.width * params.height) as usize * bpp);
    for row in 0..params.height {
        for col in 0..params.width {
            let v = ((row + col) as u64 + frame_index) as u8;
            for _ in 0..bpp {
                bytes.push(v);
            }
        }
    }
    Payload::new(vec![params.height, params.width, bpp as u32], Dtype::U8, bytes)
}

/// A `DeviceReader` that never touches real hardware: `start` always
/// succeeds unless `fail_after` frames have already been emitted (used by
/// orchestrator restart-on-demand tests), and `read` synthesizes one frame
/// per call after a configurable artificial delay.
pub struct FakeDeviceReader {
    descriptor: DeviceDescriptor,
    active: bool,
    frame_index: u64,
    /// Simulated per-frame acquisition latency.
    pub frame_interval: Duration,
    /// If set, `read` returns a permanent error once this many frames have
    /// been emitted, simulating a device that dies mid-run.
    pub fail_after: Option<u64>,
}

impl FakeDeviceReader {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        FakeDeviceReader {
            descriptor,
            active: false,
            frame_index: 0,
            frame_interval: Duration::from_millis(0),
            fail_after: None,
        }
    }

    fn camera_params(&self) -> Option<CameraParams> {
        match self.descriptor.kind {
            DeviceKind::Camera(p) => Some(p),
            DeviceKind::Audio(_) => None,
        }
    }
}

impl DeviceReader for FakeDeviceReader {
    fn start(&mut self) -> Result<()> {
        self.active = true;
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<FrameEnvelope>> {
        if !self.active {
            return Err(anyhow::anyhow!("read called on inactive reader").into());
        }
        if let Some(limit) = self.fail_after {
            if self.frame_index >= limit {
                self.active = false;
                return Err(anyhow::anyhow!("synthetic device failure after {} frames", limit).into());
            }
        }
        if self.frame_interval > timeout {
            // Simulated acquisition would exceed the caller's budget: honor
            // the timeout contract by returning None without tearing the
            // reader down.
            std::thread::sleep(timeout);
            return Ok(None);
        }
        std::thread::sleep(self.frame_interval);
        let start_ts = now_secs();
        let payload = match self.camera_params() {
            Some(params) => synthetic_camera_frame(&params, self.frame_index),
            None => Payload::new(vec![16], Dtype::I16, vec![0u8; 32]),
        };
        let end_ts = now_secs();
        self.frame_index += 1;
        Ok(Some(FrameEnvelope::new(self.descriptor.clone(), payload, start_ts, end_ts)))
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PixelFormat;

    fn camera_descriptor() -> DeviceDescriptor {
        DeviceDescriptor::new(
            "id-a",
            "a",
            DeviceKind::Camera(CameraParams { width: 8, height: 4, fps: 30.0, pixel_format: PixelFormat::Rgb8 }),
        )
        .unwrap()
    }

    #[test]
    fn emits_frames_once_started() {
        let mut reader = FakeDeviceReader::new(camera_descriptor());
        assert!(!reader.is_active());
        reader.start().unwrap();
        assert!(reader.is_active());
        let frame = reader.read(Duration::from_millis(50)).unwrap();
        assert!(frame.is_some());
    }

    #[test]
    fn read_before_start_errors() {
        let mut reader = FakeDeviceReader::new(camera_descriptor());
        assert!(reader.read(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut reader = FakeDeviceReader::new(camera_descriptor());
        reader.start().unwrap();
        reader.stop();
        reader.stop();
        assert!(!reader.is_active());
    }

    #[test]
    fn fail_after_terminates_reader() {
        let mut reader = FakeDeviceReader::new(camera_descriptor());
        reader.fail_after = Some(1);
        reader.start().unwrap();
        assert!(reader.read(Duration::from_millis(50)).unwrap().is_some());
        assert!(reader.read(Duration::from_millis(50)).is_err());
        assert!(!reader.is_active());
    }

    #[test]
    fn slow_frame_interval_yields_timeout_without_stopping() {
        let mut reader = FakeDeviceReader::new(camera_descriptor());
        reader.frame_interval = Duration::from_millis(200);
        reader.start().unwrap();
        let frame = reader.read(Duration::from_millis(10)).unwrap();
        assert!(frame.is_none());
        assert!(reader.is_active());
    }
}
