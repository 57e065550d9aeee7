//! Capture/transport core for periphery devices (cameras and microphones):
//! per-device acquisition workers publish synchronized frames onto an
//! in-process XSUB/XPUB bus; a multi-consumer receiver aggregates one frame
//! per device per tick, optionally time-aligned; bounded-queue sinks turn
//! aggregated tuples into video segments or images.

pub mod backend;
pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod receiver;
pub mod sender;
pub mod sink;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use domain::{
    AudioParams, CameraParams, DeviceDescriptor, DeviceKind, FrameEnvelope, MediaSpec,
    Payload, PreprocessingOp,
};
pub use error::{CoreError, Result};
pub use receiver::{Receiver, Tuple};
