//! Publish/subscribe transport endpoints carrying serialized
//! [`crate::domain::FrameEnvelope`]s over the bus.

pub mod zmq_transport;

use crate::domain::FrameEnvelope;

/// Capability set for an outbound endpoint. `send` never blocks the caller:
/// a full outbound queue results in the frame being dropped (drop-newest),
/// never a stall.
pub trait Publisher {
    fn start(&mut self) -> anyhow::Result<()>;

    /// Returns `true` if the frame was queued for send, `false` if it was
    /// dropped because the outbound high-water mark was reached.
    fn send(&mut self, envelope: &FrameEnvelope) -> anyhow::Result<bool>;

    fn stop(&mut self);
}

/// Capability set for an inbound endpoint.
pub trait Subscriber {
    fn start(&mut self) -> anyhow::Result<()>;

    /// Returns the next envelope, or `None` if nothing arrived within the
    /// endpoint's configured receive timeout. An unrecognized device kind in
    /// the decoded wire header surfaces as `CoreError::UnknownDevice` rather
    /// than a generic decode failure.
    fn receive(&mut self) -> crate::error::Result<Option<FrameEnvelope>>;

    fn stop(&mut self);
}
