//! The in-process XSUB/XPUB bus proxy that decouples sender workers from
//! consumers. Senders publish without knowing how many receivers exist;
//! receivers subscribe without knowing how many senders exist.

use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tracing::{error, info};

/// Two bound sockets: XSUB facing senders, XPUB facing consumers, forwarded
/// by `zmq::proxy_steerable` on a dedicated thread. `stop()` sends a
/// `TERMINATE` command on the steering `PAIR` socket, mirroring packetry's
/// oneshot-stop-then-join idiom for its backend worker threads.
pub struct BusProxy {
    sub_endpoint: String,
    pub_endpoint: String,
    queue_size: u32,
    context: zmq::Context,
    control_endpoint: String,
    handle: Option<JoinHandle<Result<()>>>,
}

impl BusProxy {
    pub fn new(sub_endpoint: impl Into<String>, pub_endpoint: impl Into<String>, queue_size: u32) -> Self {
        BusProxy {
            sub_endpoint: sub_endpoint.into(),
            pub_endpoint: pub_endpoint.into(),
            queue_size,
            context: zmq::Context::new(),
            control_endpoint: format!("inproc://bus-proxy-control-{}", uuid::Uuid::new_v4()),
            handle: None,
        }
    }

    /// Binds both sockets and starts forwarding. Blocks until both binds
    /// succeed (or fail); forwarding itself runs on the returned thread.
    pub fn start(&mut self) -> Result<()> {
        let xsub = self.context.socket(zmq::XSUB).context("creating XSUB socket")?;
        xsub.set_rcvhwm(self.queue_size as i32)?;
        xsub.bind(&self.sub_endpoint).with_context(|| format!("binding XSUB to {}", self.sub_endpoint))?;

        let xpub = self.context.socket(zmq::XPUB).context("creating XPUB socket")?;
        xpub.set_sndhwm(self.queue_size as i32)?;
        xpub.bind(&self.pub_endpoint).with_context(|| format!("binding XPUB to {}", self.pub_endpoint))?;

        let control = self.context.socket(zmq::PAIR).context("creating control PAIR socket")?;
        control.bind(&self.control_endpoint).context("binding control socket")?;

        info!(sub = %self.sub_endpoint, pub_ = %self.pub_endpoint, "bus proxy listening");

        self.handle = Some(std::thread::spawn(move || {
            let result = zmq::proxy_steerable(&xsub, &xpub, &control);
            if let Err(e) = &result {
                error!(error = %e, "bus proxy terminated with error");
            }
            result.map_err(|e| anyhow::anyhow!(e)).context("proxy_steerable")
        }));

        Ok(())
    }

    /// Sends the steering command to stop forwarding and joins the thread.
    /// Idempotent: calling with no running thread is a no-op.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Ok(control) = self.context.socket(zmq::PAIR) {
                if control.connect(&self.control_endpoint).is_ok() {
                    let _ = control.send("TERMINATE", 0);
                }
            }
            match handle.join() {
                Ok(Ok(())) => info!("bus proxy stopped cleanly"),
                Ok(Err(e)) => error!(error = %e, "bus proxy exited with error"),
                Err(_) => error!("bus proxy thread panicked"),
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for BusProxy {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{zmq_transport::{ZmqPublisher, ZmqSubscriber}, Publisher, Subscriber};
    use crate::domain::{CameraParams, DeviceDescriptor, DeviceKind, Dtype, FrameEnvelope, Payload, PixelFormat};

    fn free_port_pair() -> (u16, u16) {
        // Bind two ephemeral-port listeners momentarily to grab distinct
        // free ports, then release them before the proxy binds for real.
        let a = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let b = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        (a, b)
    }

    #[test]
    fn forwards_frames_from_publisher_to_subscriber() {
        let (sub_port, pub_port) = free_port_pair();
        let sub_endpoint = format!("tcp://127.0.0.1:{sub_port}");
        let pub_endpoint = format!("tcp://127.0.0.1:{pub_port}");

        let mut proxy = BusProxy::new(sub_endpoint.clone(), pub_endpoint.clone(), 16);
        proxy.start().unwrap();

        let mut publisher = ZmqPublisher::new(sub_endpoint, 16);
        publisher.start().unwrap();
        let mut subscriber = ZmqSubscriber::new(pub_endpoint, 16, 2000);
        subscriber.start().unwrap();

        // Give the SUB socket's subscription time to propagate through the
        // proxy before the first publish (late joiners miss earlier frames
        // by design).
        std::thread::sleep(std::time::Duration::from_millis(200));

        let device = DeviceDescriptor::new(
            "id-a",
            "a",
            DeviceKind::Camera(CameraParams { width: 2, height: 2, fps: 30.0, pixel_format: PixelFormat::Rgb8 }),
        )
        .unwrap();
        let payload = Payload::new(vec![2, 2, 3], Dtype::U8, vec![0u8; 12]);
        let envelope = FrameEnvelope::new(device, payload, 1.0, 1.1);

        let mut sent = false;
        for _ in 0..20 {
            if publisher.send(&envelope).unwrap() {
                sent = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(sent);

        let received = subscriber.receive().unwrap();
        assert!(received.is_some());
        assert_eq!(received.unwrap().device.name, "a");

        publisher.stop();
        subscriber.stop();
        proxy.stop();
    }
}
