//! Value types shared by every component: device identity, frame payloads,
//! and the media specification sinks are built against.

mod device;
mod frame;
mod media;

pub use device::{validate_device_set, AudioParams, CameraParams, DeviceDescriptor, DeviceKind, PixelFormat};
pub use frame::{Dtype, FrameEnvelope, Payload, PreprocessingOp};
pub use media::MediaSpec;
