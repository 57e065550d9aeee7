//! Consumers of aggregated tuples: `VideoSink` (bounded-queue segment
//! writer) and `ImageSink` (worker-pool single-shot writer). Both compose a
//! `Receiver` rather than inheriting from it, so a sink only ever talks to
//! the bus through the same aggregation contract any other consumer uses.

pub mod encoder;
pub mod image;
pub mod video;

pub use encoder::{FrameEncoder, PngEncoder, RawContainerEncoder};
pub use image::ImageSink;
pub use video::VideoSink;
