//! ZeroMQ-backed [`Publisher`]/[`Subscriber`]. The publisher is a `PUB`
//! socket connected to the bus proxy's XSUB endpoint; the subscriber is a
//! `SUB` socket with an empty-prefix subscription connected to the proxy's
//! XPUB endpoint. Mirrors `ZMQSender`/`ZMQReceiver` from the system this
//! core was distilled from.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{Publisher, Subscriber};
use crate::domain::FrameEnvelope;
use crate::wire::{decode_envelope, encode_envelope};

pub struct ZmqPublisher {
    endpoint: String,
    queue_size: u32,
    context: zmq::Context,
    socket: Option<zmq::Socket>,
}

impl ZmqPublisher {
    pub fn new(endpoint: impl Into<String>, queue_size: u32) -> Self {
        ZmqPublisher { endpoint: endpoint.into(), queue_size, context: zmq::Context::new(), socket: None }
    }
}

impl Publisher for ZmqPublisher {
    fn start(&mut self) -> Result<()> {
        let socket = self.context.socket(zmq::PUB).context("creating PUB socket")?;
        socket.set_sndhwm(self.queue_size as i32).context("setting SNDHWM")?;
        socket.connect(&self.endpoint).with_context(|| format!("connecting PUB socket to {}", self.endpoint))?;
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, envelope: &FrameEnvelope) -> Result<bool> {
        let socket = self.socket.as_ref().context("send called before start")?;
        let (header, payload) = encode_envelope(envelope)?;
        match socket.send(header, zmq::SNDMORE | zmq::DONTWAIT) {
            Ok(()) => {}
            Err(zmq::Error::EAGAIN) => {
                debug!(device = %envelope.device.name, "dropped frame: publisher at high-water mark");
                return Ok(false);
            }
            Err(e) => return Err(e).context("sending wire header"),
        }
        match socket.send(payload, zmq::DONTWAIT) {
            Ok(()) => Ok(true),
            Err(zmq::Error::EAGAIN) => {
                debug!(device = %envelope.device.name, "dropped frame: publisher at high-water mark");
                Ok(false)
            }
            Err(e) => Err(e).context("sending wire payload"),
        }
    }

    fn stop(&mut self) {
        self.socket = None;
    }
}

pub struct ZmqSubscriber {
    endpoint: String,
    queue_size: u32,
    receive_timeout_ms: u64,
    context: zmq::Context,
    socket: Option<zmq::Socket>,
}

impl ZmqSubscriber {
    pub fn new(endpoint: impl Into<String>, queue_size: u32, receive_timeout_ms: u64) -> Self {
        ZmqSubscriber {
            endpoint: endpoint.into(),
            queue_size,
            receive_timeout_ms,
            context: zmq::Context::new(),
            socket: None,
        }
    }
}

impl Subscriber for ZmqSubscriber {
    fn start(&mut self) -> Result<()> {
        let socket = self.context.socket(zmq::SUB).context("creating SUB socket")?;
        socket.set_rcvhwm(self.queue_size as i32).context("setting RCVHWM")?;
        socket
            .set_rcvtimeo(self.receive_timeout_ms as i32)
            .context("setting RCVTIMEO")?;
        socket.set_subscribe(b"").context("subscribing to empty prefix")?;
        socket.connect(&self.endpoint).with_context(|| format!("connecting SUB socket to {}", self.endpoint))?;
        self.socket = Some(socket);
        Ok(())
    }

    fn receive(&mut self) -> crate::error::Result<Option<FrameEnvelope>> {
        let socket = self.socket.as_ref().context("receive called before start")?;
        let header = match socket.recv_bytes(0) {
            Ok(bytes) => bytes,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(anyhow::Error::from(e).context("receiving wire header").into()),
        };
        if !socket.get_rcvmore().unwrap_or(false) {
            warn!("received header frame with no payload part, dropping");
            return Ok(None);
        }
        let payload = socket.recv_bytes(0).context("receiving wire payload")?;
        let envelope = decode_envelope(&header, &payload)?;
        Ok(Some(envelope))
    }

    fn stop(&mut self) {
        self.socket = None;
    }
}
