//! Two-frame wire codec: a JSON metadata header followed by the raw,
//! contiguous payload bytes. Mirrors the `FramePacket.dump()` / `ZMQSender`
//! /`ZMQReceiver` wire shape of the system this core was distilled from.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AudioParams, CameraParams, DeviceDescriptor, DeviceKind, Dtype, FrameEnvelope, Payload,
};
use crate::error::{CoreError, Result};

#[derive(Serialize, Deserialize)]
struct WireFrameShape {
    shape: Vec<u32>,
    dtype: String,
}

#[derive(Serialize, Deserialize)]
struct WireHeader {
    start_read_timestamp: f64,
    end_read_timestamp: f64,
    frame: WireFrameShape,
    device: WireDeviceFull,
}

#[derive(Serialize, Deserialize)]
struct WireDeviceFull {
    #[serde(rename = "type")]
    kind: String,
    parameters: serde_json::Value,
}

/// Encodes an envelope into the two wire parts: a JSON header and the raw
/// payload bytes. The caller sends these as two ZeroMQ message frames.
/// `device.parameters` carries the full device model dump: `device_id` and
/// `name` alongside the kind-specific fields, matching the authoritative
/// wire shape's `device: { "type", "parameters" }`.
pub fn encode_envelope(envelope: &FrameEnvelope) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
    let (kind, mut parameters) = match &envelope.device.kind {
        DeviceKind::Camera(p) => ("camera", serde_json::to_value(p)?),
        DeviceKind::Audio(p) => ("audio", serde_json::to_value(p)?),
    };
    if let serde_json::Value::Object(ref mut map) = parameters {
        map.insert("device_id".to_string(), serde_json::Value::String(envelope.device.device_id.clone()));
        map.insert("name".to_string(), serde_json::Value::String(envelope.device.name.clone()));
    }
    let header = WireHeader {
        start_read_timestamp: envelope.start_read_ts,
        end_read_timestamp: envelope.end_read_ts,
        frame: WireFrameShape {
            shape: envelope.payload.shape.clone(),
            dtype: envelope.payload.dtype.tag().to_string(),
        },
        device: WireDeviceFull { kind: kind.to_string(), parameters },
    };
    let header_bytes = serde_json::to_vec(&header).context("encoding wire header")?;
    Ok((header_bytes, envelope.payload.bytes.clone()))
}

/// Decodes the two wire parts back into an envelope. An unknown kind tag is
/// surfaced as `CoreError::UnknownDevice`, never a bare decode error, so
/// callers can match on it directly.
pub fn decode_envelope(header_bytes: &[u8], payload_bytes: &[u8]) -> Result<FrameEnvelope> {
    let header: WireHeader = serde_json::from_slice(header_bytes).context("decoding wire header")?;
    let dtype = Dtype::from_tag(&header.frame.dtype)
        .with_context(|| format!("unknown dtype tag: {}", header.frame.dtype))?;

    let parameters = header.device.parameters;
    let device_id = parameters.get("device_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let name = parameters.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    let kind = match header.device.kind.as_str() {
        "camera" => DeviceKind::Camera(
            serde_json::from_value::<CameraParams>(parameters).context("decoding camera parameters")?,
        ),
        "audio" => DeviceKind::Audio(
            serde_json::from_value::<AudioParams>(parameters).context("decoding audio parameters")?,
        ),
        other => return Err(CoreError::UnknownDevice { kind: other.to_string() }),
    };

    let device = DeviceDescriptor::new(device_id, name, kind)?;
    let payload = Payload::new(header.frame.shape, dtype, payload_bytes.to_vec());
    if !payload.is_well_formed() {
        return Err(CoreError::Other(anyhow::anyhow!(
            "payload length {} does not match shape/dtype (expected {})",
            payload.bytes.len(),
            payload.expected_len()
        )));
    }

    Ok(FrameEnvelope::new(
        device,
        payload,
        header.start_read_timestamp,
        header.end_read_timestamp,
    ))
}
