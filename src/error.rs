//! The closed set of error codes this crate surfaces to callers, plus the
//! `anyhow`-based glue used internally to get there.

use thiserror::Error;

/// Errors surfaced across the public API boundary.
///
/// Internal code is free to use `anyhow::Result` with `.context(..)` the way
/// most of this crate's helpers do; anything that escapes to a caller is
/// converted into one of these variants first.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The device could not be opened at all.
    #[error("device {device} unavailable: {source}")]
    DeviceUnavailable {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    /// The descriptor's requested mode is not supported by the device.
    #[error("device {device} rejected requested parameters: {reason}")]
    ParamsRejected { device: String, reason: String },

    /// A publish was dropped because the outbound queue was at its high-water mark.
    #[error("frame for device {device} dropped at high-water mark")]
    Dropped { device: String },

    /// The wire header named a device kind with no registered constructor.
    #[error("unknown device kind tag: {kind}")]
    UnknownDevice { kind: String },

    /// A video segment could not be completed.
    #[error("segment {segment} failed: {reason}")]
    SegmentFailed { segment: String, reason: String },

    /// The aggregating receiver exhausted its attempt budget without completing a tuple.
    #[error("aggregation exhausted after {attempts} attempts")]
    AggregationExhausted { attempts: u32 },

    /// Anything else: configuration, I/O, or transport failures that don't
    /// have a named code of their own.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
