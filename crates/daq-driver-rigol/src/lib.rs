//! Rigol MSO5000 Oscilloscope Driver
//!
//! Low-level pieces for pulling raw waveform memory off an MSO5000 over its
//! raw-socket SCPI interface.
//!
//! # Communication
//!
//! SCPI over TCP (default port 5555). Commands and queries are newline
//! terminated ASCII; `:WAV:DATA?` is answered with a definite-length binary
//! block (`#9` + nine length digits + payload + `0x0A`).
//!
//! # Layers
//!
//! - [`transport`] - exact, timeout-bounded reads and writes on the socket
//! - [`block`] - binary block header validation and payload reassembly
//! - [`preamble`] - `:WAV:PRE?` parsing
//! - [`scpi`] - typed command/query helpers
//! - [`mock`] - simulated instrument with fault injection
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_rigol::{BlockDecoder, ConnectionConfig, ScpiClient, MAX_PAYLOAD_BYTES};
//!
//! let mut client = ScpiClient::connect("192.168.1.50", 5555, &ConnectionConfig::default()).await?;
//! client.select_source(1).await?;
//! client.request_waveform_data(true).await?;
//!
//! let mut decoder = BlockDecoder::new(MAX_PAYLOAD_BYTES);
//! let frame = decoder.decode(client.transport_mut()).await?;
//! println!("{} samples", frame.payload.len());
//! ```

pub mod block;
pub mod error;
pub mod mock;
pub mod preamble;
pub mod scpi;
pub mod transport;

pub use block::{
    BlockDecoder, BlockFrame, BlockHeader, TransferCounters, DEFAULT_DRAIN_TIMEOUT, END_MARKER,
    HEADER_LEN, MAX_PAYLOAD_BYTES,
};
pub use error::{FrameError, HeaderFault, PreambleError, ScpiError, TransportError};
pub use mock::{BlockFault, MockChannel, MockScope, MockScopeConfig, MockScopeLog};
pub use preamble::WaveformPreamble;
pub use scpi::{ScpiClient, TriggerStatus};
pub use transport::{ConnectionConfig, Transport, DEFAULT_PORT};
