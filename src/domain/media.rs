use anyhow::{bail, Result};
use std::path::PathBuf;

/// Immutable description of a sink target. Constructed once and shared by a
/// `VideoSink` or `ImageSink` for its whole lifetime.
#[derive(Debug, Clone)]
pub struct MediaSpec {
    pub output_dir: PathBuf,
    pub file_name_template: String,
    pub container_ext: String,
    pub codec: String,
    pub fps: u32,
    pub duration_seconds: u32,
}

impl MediaSpec {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        file_name_template: impl Into<String>,
        container_ext: impl Into<String>,
        codec: impl Into<String>,
        fps: u32,
        duration_seconds: u32,
    ) -> Result<Self> {
        let output_dir = output_dir.into();
        if fps < 1 {
            bail!("fps must be >= 1");
        }
        if duration_seconds < 1 {
            bail!("duration_seconds must be >= 1");
        }
        if !output_dir.exists() {
            std::fs::create_dir_all(&output_dir)?;
        }
        Ok(MediaSpec {
            output_dir,
            file_name_template: file_name_template.into(),
            container_ext: container_ext.into(),
            codec: codec.into(),
            fps,
            duration_seconds,
        })
    }

    pub fn frames_needed(&self) -> u32 {
        self.fps * self.duration_seconds
    }

    /// `<output_root>/<file_name_template with `{name}` substituted>/<segment_or_image_name>.<ext>`
    pub fn path_for(&self, device_name: &str, item_name: &str) -> PathBuf {
        let dir_segment = self.file_name_template.replace("{name}", device_name);
        self.output_dir.join(dir_segment).join(format!("{item_name}.{}", self.container_ext))
    }
}
