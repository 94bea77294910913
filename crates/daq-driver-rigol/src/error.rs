//! Error taxonomy for the MSO5000 protocol layers.
//!
//! Errors are split by how the acquisition loop is expected to react:
//!
//! - [`TransportError`]: the socket itself failed (connect, write, read, timeout
//!   or peer close). Never retried by this crate.
//! - [`FrameError`]: one binary block could not be decoded. All variants except
//!   [`FrameError::Transport`] leave the connection usable and may be retried.
//! - [`PreambleError`]: the `:WAV:PRE?` response was malformed. Fatal for the
//!   affected channel only.
//! - [`ScpiError`]: command/query level failures.

use std::io;
use thiserror::Error;

/// Socket-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("transport write failed after {sent} bytes")]
    WriteFailed {
        sent: usize,
        #[source]
        source: io::Error,
    },

    #[error("transport read failed")]
    ReadFailed {
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// True if the failure was an I/O timeout rather than a hard socket error.
    pub fn is_timeout(&self) -> bool {
        self.io_kind() == Some(io::ErrorKind::TimedOut)
    }

    /// True if the instrument closed the connection.
    pub fn is_closed(&self) -> bool {
        matches!(
            self.io_kind(),
            Some(io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe)
        )
    }

    fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Connect { source, .. }
            | Self::WriteFailed { source, .. }
            | Self::ReadFailed { source } => Some(source.kind()),
        }
    }
}

/// Reason a block header was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderFault {
    #[error("expected block introducer '#', found 0x{0:02X}")]
    BadIntroducer(u8),

    #[error("expected length-digit count, found 0x{0:02X}")]
    BadDigitCount(u8),

    #[error("no length digits")]
    MissingLength,

    #[error("declared length {0} is negative")]
    Negative(i64),

    #[error("declared length {declared} exceeds buffer capacity {capacity}")]
    ExceedsCapacity { declared: i64, capacity: usize },
}

/// Failure to decode one binary block.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid block header {header:?}: {fault}")]
    HeaderInvalid { header: String, fault: HeaderFault },

    #[error("block payload incomplete: received {received} of {declared} bytes")]
    Incomplete {
        declared: usize,
        received: usize,
        #[source]
        source: Option<TransportError>,
    },

    #[error("block terminator 0x{found:02X} is not 0x0A, stream desynchronized ({drained} bytes drained)")]
    Desynchronized { found: u8, drained: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl FrameError {
    /// Whether the retry engine may attempt another read on the same session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

/// Malformed `:WAV:PRE?` response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreambleError {
    #[error("expected {expected} preamble fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("preamble field `{field}` is not a valid number: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("sample interval {0} s is not positive")]
    NonPositiveInterval(f64),

    #[error("point count {points} exceeds buffer capacity {capacity}")]
    PointsExceedCapacity { points: usize, capacity: usize },
}

/// Command/query failure.
#[derive(Debug, Error)]
pub enum ScpiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected response to {command}: {response:?}")]
    UnexpectedResponse { command: String, response: String },

    #[error(transparent)]
    Preamble(#[from] PreambleError),
}
