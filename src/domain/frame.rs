use serde::{Deserialize, Serialize};

use super::device::DeviceDescriptor;

/// Element type of a payload buffer, mirroring numpy-style dtype tags used
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    U8,
    I16,
    F32,
}

impl Dtype {
    pub fn size_of(self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::I16 => 2,
            Dtype::F32 => 4,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Dtype::U8 => "u8",
            Dtype::I16 => "i16",
            Dtype::F32 => "f32",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "u8" => Dtype::U8,
            "i16" => Dtype::I16,
            "f32" => Dtype::F32,
            _ => return None,
        })
    }
}

/// A contiguous, row-major payload buffer plus the shape/dtype needed to
/// reinterpret its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub shape: Vec<u32>,
    pub dtype: Dtype,
    pub bytes: Vec<u8>,
}

impl Payload {
    pub fn new(shape: Vec<u32>, dtype: Dtype, bytes: Vec<u8>) -> Self {
        Payload { shape, dtype, bytes }
    }

    /// Expected byte length given shape and dtype; callers use this to
    /// validate an incoming payload before reinterpreting its bytes.
    pub fn expected_len(&self) -> usize {
        let elems: u64 = self.shape.iter().map(|&d| d as u64).product();
        elems as usize * self.dtype.size_of()
    }

    pub fn is_well_formed(&self) -> bool {
        self.bytes.len() == self.expected_len()
    }
}

/// The closed set of preprocessing rotations applied to camera payloads.
/// Audio payloads are never rotated (enforced by `apply` below returning the
/// frame unchanged when the descriptor's kind isn't a camera).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PreprocessingOp {
    #[default]
    None,
    Rotate90Cw,
    Rotate90Ccw,
    Rotate180,
}

impl PreprocessingOp {
    /// Applies a bit-exact rotation to a row-major `height x width x channels`
    /// buffer. `shape` is `[height, width, channels]`; returns the rotated
    /// payload with `shape` updated to match (90-degree rotations transpose
    /// the first two dimensions).
    pub fn apply(self, payload: &Payload) -> Payload {
        if self == PreprocessingOp::None {
            return payload.clone();
        }
        let [h, w, c] = match payload.shape.as_slice() {
            [h, w, c] => [*h as usize, *w as usize, *c as usize],
            _ => return payload.clone(),
        };
        let px = |row: usize, col: usize| -> &[u8] {
            let start = (row * w + col) * c * payload.dtype.size_of();
            &payload.bytes[start..start + c * payload.dtype.size_of()]
        };
        let cell = c * payload.dtype.size_of();
        match self {
            PreprocessingOp::Rotate180 => {
                let mut out = vec![0u8; payload.bytes.len()];
                for row in 0..h {
                    for col in 0..w {
                        let src = px(row, col);
                        let dst_row = h - 1 - row;
                        let dst_col = w - 1 - col;
                        let start = (dst_row * w + dst_col) * cell;
                        out[start..start + cell].copy_from_slice(src);
                    }
                }
                Payload::new(payload.shape.clone(), payload.dtype, out)
            }
            PreprocessingOp::Rotate90Cw => {
                // (row, col) in source -> (col, h-1-row) in dest, dest is w x h.
                let mut out = vec![0u8; payload.bytes.len()];
                for row in 0..h {
                    for col in 0..w {
                        let src = px(row, col);
                        let dst_row = col;
                        let dst_col = h - 1 - row;
                        let start = (dst_row * h + dst_col) * cell;
                        out[start..start + cell].copy_from_slice(src);
                    }
                }
                Payload::new(vec![w as u32, h as u32, c as u32], payload.dtype, out)
            }
            PreprocessingOp::Rotate90Ccw => {
                // (row, col) in source -> (w-1-col, row) in dest, dest is w x h.
                let mut out = vec![0u8; payload.bytes.len()];
                for row in 0..h {
                    for col in 0..w {
                        let src = px(row, col);
                        let dst_row = w - 1 - col;
                        let dst_col = row;
                        let start = (dst_row * h + dst_col) * cell;
                        out[start..start + cell].copy_from_slice(src);
                    }
                }
                Payload::new(vec![w as u32, h as u32, c as u32], payload.dtype, out)
            }
            PreprocessingOp::None => unreachable!(),
        }
    }
}

/// Immutable record emitted per capture. Created once by a sender worker and
/// serialized once; there is no shared buffer across thread or process
/// boundaries beyond this value's single owner at any moment.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEnvelope {
    pub device: DeviceDescriptor,
    pub payload: Payload,
    pub start_read_ts: f64,
    pub end_read_ts: f64,
}

impl FrameEnvelope {
    pub fn new(device: DeviceDescriptor, payload: Payload, start_read_ts: f64, end_read_ts: f64) -> Self {
        debug_assert!(start_read_ts <= end_read_ts, "start_read_ts must precede end_read_ts");
        FrameEnvelope { device, payload, start_read_ts, end_read_ts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::{CameraParams, DeviceKind, PixelFormat};

    fn gradient_payload(h: u32, w: u32) -> Payload {
        let mut bytes = Vec::with_capacity((h * w * 3) as usize);
        for row in 0..h {
            for col in 0..w {
                bytes.push(row as u8);
                bytes.push(col as u8);
                bytes.push(0);
            }
        }
        Payload::new(vec![h, w, 3], Dtype::U8, bytes)
    }

    #[test]
    fn rotate_180_twice_is_identity() {
        let p = gradient_payload(4, 6);
        let twice = PreprocessingOp::Rotate180.apply(&PreprocessingOp::Rotate180.apply(&p));
        assert_eq!(twice, p);
    }

    #[test]
    fn rotate_90_cw_then_ccw_is_identity() {
        let p = gradient_payload(4, 6);
        let round = PreprocessingOp::Rotate90Ccw.apply(&PreprocessingOp::Rotate90Cw.apply(&p));
        assert_eq!(round, p);
    }

    #[test]
    fn rotate_90_cw_four_times_is_identity() {
        let mut p = gradient_payload(4, 6);
        for _ in 0..4 {
            p = PreprocessingOp::Rotate90Cw.apply(&p);
        }
        assert_eq!(p, gradient_payload(4, 6));
    }

    #[test]
    fn rotate_90_swaps_shape() {
        let p = gradient_payload(4, 6);
        let rotated = PreprocessingOp::Rotate90Cw.apply(&p);
        assert_eq!(rotated.shape, vec![6, 4, 3]);
    }

    #[test]
    fn payload_well_formed_checks_length() {
        let mut p = gradient_payload(2, 2);
        assert!(p.is_well_formed());
        p.bytes.pop();
        assert!(!p.is_well_formed());
    }

    #[test]
    fn frame_envelope_orders_timestamps() {
        let device = DeviceDescriptor::new(
            "id-a",
            "a",
            DeviceKind::Camera(CameraParams { width: 640, height: 480, fps: 30.0, pixel_format: PixelFormat::Rgb8 }),
        )
        .unwrap();
        let envelope = FrameEnvelope::new(device, gradient_payload(2, 2), 1.0, 1.1);
        assert!(envelope.start_read_ts <= envelope.end_read_ts);
    }
}
