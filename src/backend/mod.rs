//! `DeviceReader`: opens one device and yields an unbounded lazy sequence of
//! [`FrameEnvelope`]s. Two backends are provided: [`fake::FakeDeviceReader`]
//! (a deterministic synthetic source used by tests and demos, standing in for
//! real camera hardware which is this core's named external collaborator) and
//! [`cpal_audio::CpalAudioReader`] (real microphone capture).

pub mod cpal_audio;
pub mod fake;

use std::time::Duration;

use crate::domain::FrameEnvelope;
use crate::error::Result;

/// Capability set for acquiring frames from one device.
///
/// State machine: `created -> started -> stopped`. Only `started` permits
/// `read`. Any error during `read` other than a timeout must transition the
/// reader to `stopped` before returning: non-timeout errors terminate the
/// reader.
///
/// Deliberately not `: Send`. Some real backends (e.g. `cpal`'s `Stream`)
/// are not movable across threads once built. `SenderWorker` therefore takes
/// a factory that constructs the reader on the worker thread itself, rather
/// than constructing it and handing the trait object across a thread
/// boundary.
pub trait DeviceReader {
    /// Acquires the device with the descriptor's parameters.
    fn start(&mut self) -> Result<()>;

    /// Returns one envelope, or `None` if no frame arrived within `timeout`.
    /// Never blocks longer than `timeout`.
    fn read(&mut self, timeout: Duration) -> Result<Option<FrameEnvelope>>;

    /// Releases all device resources. Idempotent; safe to call in any state.
    fn stop(&mut self);

    /// Whether `start` has succeeded and `stop` has not since been called.
    fn is_active(&self) -> bool;
}

/// Races a blocking computation against a timeout on a dedicated helper
/// thread, the mechanism backing every `DeviceReader::read` whose underlying
/// capture call can itself block indefinitely (as packetry's
/// `BackendHandle::start` races a blocking USB transfer against a stop
/// signal on its own worker thread).
///
/// The helper thread is intentionally leaked on timeout: the underlying
/// blocking call (e.g. a device decode) has no cooperative cancellation of
/// its own, so the thread is left to finish and its result discarded. This
/// is safe because `f` is `'static` and owns everything it touches.
pub fn blocking_with_timeout<T, F>(timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let result = f();
        let _ = tx.send(result);
    });
    rx.recv_timeout(timeout).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn returns_result_within_budget() {
        let got = blocking_with_timeout(Duration::from_millis(200), || 42);
        assert_eq!(got, Some(42));
    }

    #[test]
    fn times_out_when_work_is_slow() {
        let start = Instant::now();
        let got = blocking_with_timeout(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            1
        });
        assert_eq!(got, None);
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
