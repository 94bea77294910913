//! # scope_daq
//!
//! Waveform acquisition test client for Rigol MSO5000 oscilloscopes. It
//! measures how fast raw waveform memory can be pulled over the instrument's
//! SCPI-over-TCP interface and how often transfers need to be retried.
//!
//! ## Crate Structure
//!
//! - **`config`**: layered configuration (defaults, TOML file, environment,
//!   command line).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the application-wide `DaqError`.
//! - **`session`**: the single instrument connection and its close-once
//!   lifecycle.
//! - **`bootstrap`**: instrument reset and channel discovery.
//! - **`acquisition`**: the retry engine, its statistics and the raw dump sink.
//! - **`runner`**: ties the pieces together for one run.
//!
//! The protocol layers (stream I/O, block framing, preamble parsing, SCPI
//! commands, simulated instrument) live in the `daq-driver-rigol` crate.

pub mod acquisition;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod runner;
pub mod session;

pub use acquisition::{AcquisitionEngine, StopReason};
pub use config::AppConfig;
pub use error::{AppResult, DaqError};
pub use runner::RunOutcome;
