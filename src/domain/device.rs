use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Camera-specific acquisition parameters. Ranges mirror the constraints a
/// real driver would enforce at device-open time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub pixel_format: PixelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb8,
    Gray8,
}

impl CameraParams {
    pub fn validate(&self) -> Result<()> {
        if !(640..=3840).contains(&self.width) {
            bail!("camera width {} out of range 640..=3840", self.width);
        }
        if !(480..=2160).contains(&self.height) {
            bail!("camera height {} out of range 480..=2160", self.height);
        }
        if !(15.0..=120.0).contains(&self.fps) {
            bail!("camera fps {} out of range 15..=120", self.fps);
        }
        Ok(())
    }

    /// Bytes per pixel for the configured format.
    pub fn bytes_per_pixel(&self) -> usize {
        match self.pixel_format {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Audio-specific acquisition parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_size: u16,
}

impl AudioParams {
    pub fn validate(&self) -> Result<()> {
        if self.channels < 1 {
            bail!("audio channels must be >= 1");
        }
        if !(8_000..=192_000).contains(&self.sample_rate) {
            bail!("audio sample_rate {} out of range 8000..=192000", self.sample_rate);
        }
        if !(8..=32).contains(&self.sample_size) {
            bail!("audio sample_size {} out of range 8..=32", self.sample_size);
        }
        Ok(())
    }
}

/// The closed set of device kinds this core understands, each carrying its
/// own parameter set. Unknown kind tags arriving over the wire are an
/// explicit `CoreError::UnknownDevice`, never a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "lowercase")]
pub enum DeviceKind {
    Camera(CameraParams),
    Audio(AudioParams),
}

impl DeviceKind {
    pub fn validate(&self) -> Result<()> {
        match self {
            DeviceKind::Camera(p) => p.validate(),
            DeviceKind::Audio(p) => p.validate(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            DeviceKind::Camera(_) => "camera",
            DeviceKind::Audio(_) => "audio",
        }
    }
}

/// Identifies one physical device for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub name: String,
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>, kind: DeviceKind) -> Result<Self> {
        let device_id = device_id.into();
        let name = name.into();
        if device_id.trim().is_empty() {
            bail!("device_id must not be empty");
        }
        if name.trim().is_empty() {
            bail!("device name must not be empty");
        }
        kind.validate()?;
        Ok(DeviceDescriptor { device_id, name, kind })
    }
}

/// Checks the uniqueness-of-name invariant for a live device set.
pub fn validate_device_set(devices: &[DeviceDescriptor]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for d in devices {
        if !seen.insert(d.name.as_str()) {
            bail!("duplicate device name in device set: {}", d.name);
        }
    }
    Ok(())
}
