//! Real microphone capture via `cpal`, used for the `audio` device kind.
//! Camera capture has no equivalently portable crate in this corpus and is
//! this core's named external collaborator instead (see
//! [`super::fake::FakeDeviceReader`]).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::DeviceReader;
use crate::domain::{AudioParams, DeviceDescriptor, DeviceKind, Dtype, FrameEnvelope, Payload};
use crate::error::{CoreError, Result};

/// One reader owns one input stream for the lifetime between `start` and
/// `stop`. Samples arrive on cpal's own callback thread and are handed off
/// through a bounded channel; `read` drains one chunk per call.
pub struct CpalAudioReader {
    descriptor: DeviceDescriptor,
    chunk_frames: u32,
    stream: Option<cpal::Stream>,
    samples_rx: Option<crossbeam_channel::Receiver<Vec<i16>>>,
    active: bool,
}

impl CpalAudioReader {
    /// `chunk_frames` is the number of per-channel samples collected into a
    /// single `FrameEnvelope` before it is emitted (e.g. 100ms of audio at
    /// 48kHz is 4800).
    pub fn new(descriptor: DeviceDescriptor, chunk_frames: u32) -> Self {
        CpalAudioReader { descriptor, chunk_frames, stream: None, samples_rx: None, active: false }
    }

    fn audio_params(&self) -> Result<AudioParams> {
        match self.descriptor.kind {
            DeviceKind::Audio(p) => Ok(p),
            DeviceKind::Camera(_) => Err(CoreError::ParamsRejected {
                device: self.descriptor.name.clone(),
                reason: "CpalAudioReader requires an audio device descriptor".to_string(),
            }),
        }
    }
}

impl DeviceReader for CpalAudioReader {
    fn start(&mut self) -> Result<()> {
        let params = self.audio_params()?;
        let device_name = self.descriptor.name.clone();
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| CoreError::DeviceUnavailable {
            device: device_name.clone(),
            source: anyhow!("no default input audio device available"),
        })?;

        let config = cpal::StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = crossbeam_channel::bounded::<Vec<i16>>(32);
        let pending = Arc::new(Mutex::new(Vec::<i16>::new()));
        let chunk_len = (self.chunk_frames * params.channels as u32) as usize;

        let supported_format = device
            .default_input_config()
            .map_err(|e| CoreError::DeviceUnavailable { device: device_name.clone(), source: e.into() })?
            .sample_format();

        let stream = build_stream(&device, &config, supported_format, tx, pending, chunk_len)
            .map_err(|e| CoreError::DeviceUnavailable { device: device_name.clone(), source: e })?;
        stream
            .play()
            .map_err(|e| CoreError::DeviceUnavailable { device: device_name.clone(), source: e.into() })?;

        self.stream = Some(stream);
        self.samples_rx = Some(rx);
        self.active = true;
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<FrameEnvelope>> {
        let rx = match &self.samples_rx {
            Some(rx) => rx,
            None => return Ok(None),
        };
        let start_ts = wall_clock_secs();
        match rx.recv_timeout(timeout) {
            Ok(samples) => {
                let end_ts = wall_clock_secs();
                let params = self.audio_params()?;
                let frames = samples.len() as u32 / params.channels as u32;
                let bytes = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                let payload = Payload::new(vec![frames, params.channels as u32], Dtype::I16, bytes);
                Ok(Some(FrameEnvelope::new(self.descriptor.clone(), payload, start_ts, end_ts)))
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Ok(None),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                self.active = false;
                Err(anyhow!("audio input stream disconnected").into())
            }
        }
    }

    fn stop(&mut self) {
        self.stream = None;
        self.samples_rx = None;
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    tx: crossbeam_channel::Sender<Vec<i16>>,
    pending: Arc<Mutex<Vec<i16>>>,
    chunk_len: usize,
) -> anyhow::Result<cpal::Stream> {
    let err_fn = |err| tracing::error!(error = %err, "audio input stream error");

    let emit = move |chunk: &[i16]| {
        let mut buf = pending.lock().unwrap();
        buf.extend_from_slice(chunk);
        while buf.len() >= chunk_len {
            let drained: Vec<i16> = buf.drain(0..chunk_len).collect();
            let _ = tx.try_send(drained);
        }
    };

    let stream = match format {
        cpal::SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _| emit(data),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _| {
                let converted: Vec<i16> = data.iter().map(|s| (*s as i32 - 32768) as i16).collect();
                emit(&converted)
            },
            err_fn,
            None,
        )?,
        cpal::SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _| {
                let converted: Vec<i16> = data.iter().map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).collect();
                emit(&converted)
            },
            err_fn,
            None,
        )?,
        other => return Err(anyhow!("unsupported sample format: {other:?}")),
    };
    Ok(stream)
}

fn wall_clock_secs() -> f64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}
