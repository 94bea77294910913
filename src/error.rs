//! Custom error types for the application.
//!
//! `DaqError` is the single error type returned by the session, bootstrap and
//! acquisition layers. Driver-level failures from `daq-driver-rigol` convert
//! into it through `#[from]`, so `?` works across the crate boundary.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: the configuration sources could not be read or extracted.
//! - **`Configuration`**: values that parsed but are logically invalid, caught by
//!   [`AppConfig::validate`](crate::config::AppConfig::validate).
//! - **`Io`**: local file I/O, mostly the raw dump sink.
//! - **`Transport`**: the instrument socket failed. Always fatal for the run.
//! - **`Frame`**: a block could not be decoded. The acquisition engine absorbs
//!   the recoverable variants into its retry budget; anything that reaches the
//!   caller is fatal.
//! - **`Scpi`**: a command or query failed or got a nonsensical answer.
//! - **`AcquisitionTimeout`**: the instrument never reported a stopped trigger.
//! - **`SessionClosed`**: an operation was attempted after the session was
//!   closed.

use daq_driver_rigol::{FrameError, ScpiError, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instrument transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Block framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("SCPI error: {0}")]
    Scpi(#[from] ScpiError),

    #[error("Trigger did not stop after {polls} polls ({elapsed:?})")]
    AcquisitionTimeout { polls: u64, elapsed: Duration },

    #[error("Instrument session is closed")]
    SessionClosed,
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl DaqError {
    /// True when the instrument connection is gone and cannot be reused.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::Transport(err) | Self::Frame(FrameError::Transport(err)) => err.is_closed(),
            Self::Scpi(ScpiError::Transport(err)) => err.is_closed(),
            Self::SessionClosed => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn driver_errors_convert() {
        let transport = TransportError::ReadFailed {
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "closed"),
        };
        let err: DaqError = FrameError::Transport(transport).into();

        assert!(matches!(err, DaqError::Frame(_)));
        assert!(err.is_connection_lost());
    }

    #[test]
    fn timeout_message_names_poll_count() {
        let err = DaqError::AcquisitionTimeout {
            polls: 12,
            elapsed: Duration::from_secs(3),
        };

        assert_eq!(err.to_string(), "Trigger did not stop after 12 polls (3s)");
        assert!(!err.is_connection_lost());
    }

    #[test]
    fn figment_errors_are_boxed() {
        let err: DaqError = figment::Error::from("missing field `host`".to_string()).into();
        assert!(err.to_string().starts_with("Configuration error"));
    }
}
