//! Pluggable per-device frame encoders. Real codec/container I/O is an
//! external collaborator of this core; the implementations here are
//! reference encoders sufficient to exercise `VideoSink`'s and `ImageSink`'s
//! full contracts without a production media stack.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::domain::Payload;

/// One encoder instance is opened per device per segment/image and carries
/// the dimensions/dtype validated against its first frame.
pub trait FrameEncoder: Send {
    /// Opens the output file and records the dimensions of the first frame.
    fn open(&mut self, path: &Path, first: &Payload) -> Result<()>;

    /// Encodes one subsequent frame. Must reject a payload whose shape/dtype
    /// differs from the one `open` was called with.
    fn encode_frame(&mut self, payload: &Payload) -> Result<()>;

    /// Flushes and releases the output file. Called on every exit path:
    /// success, failure, or interrupt.
    fn finish(&mut self) -> Result<()>;
}

/// Reference "video" encoder: a minimal length-prefixed raw container.
/// Stands in for a production muxer, good enough to prove out `VideoSink`'s
/// queue/segment-boundary contract and to assert on encoded content in
/// tests, without depending on a real codec.
pub struct RawContainerEncoder {
    file: Option<File>,
    shape: Vec<u32>,
    dtype: Option<crate::domain::Dtype>,
    pub frames_written: u32,
}

impl Default for RawContainerEncoder {
    fn default() -> Self {
        RawContainerEncoder { file: None, shape: Vec::new(), dtype: None, frames_written: 0 }
    }
}

impl FrameEncoder for RawContainerEncoder {
    fn open(&mut self, path: &Path, first: &Payload) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        file.write_all(b"RAW1")?;
        file.write_all(&(first.shape.len() as u32).to_le_bytes())?;
        for d in &first.shape {
            file.write_all(&d.to_le_bytes())?;
        }
        file.write_all(first.dtype.tag().as_bytes())?;
        file.write_all(b"\0")?;
        self.shape = first.shape.clone();
        self.dtype = Some(first.dtype);
        self.file = Some(file);
        self.frames_written = 0;
        Ok(())
    }

    fn encode_frame(&mut self, payload: &Payload) -> Result<()> {
        if payload.shape != self.shape || Some(payload.dtype) != self.dtype {
            bail!("frame shape/dtype changed mid-segment");
        }
        let file = self.file.as_mut().context("encode_frame called before open")?;
        file.write_all(&payload.bytes)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Reference "image" encoder: writes one PNG per call via the `png` crate.
/// Only supports byte-sized dtypes (the only ones a PNG can represent
/// directly).
pub struct PngEncoder;

impl PngEncoder {
    pub fn encode_one(path: &Path, payload: &Payload) -> Result<()> {
        if payload.dtype != crate::domain::Dtype::U8 {
            bail!("PngEncoder only supports u8 payloads, got {:?}", payload.dtype);
        }
        let (height, width, channels) = match payload.shape.as_slice() {
            [h, w, c] => (*h, *w, *c),
            [h, w] => (*h, *w, 1),
            _ => bail!("PngEncoder requires a 2D or 3D shape, got {:?}", payload.shape),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut encoder = png::Encoder::new(file, width, height);
        let color = match channels {
            1 => png::ColorType::Grayscale,
            3 => png::ColorType::Rgb,
            4 => png::ColorType::Rgba,
            other => bail!("unsupported channel count for PNG: {other}"),
        };
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().context("writing PNG header")?;
        writer.write_image_data(&payload.bytes).context("writing PNG image data")?;
        Ok(())
    }
}
