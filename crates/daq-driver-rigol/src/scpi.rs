//! SCPI command/query client for the MSO5000.
//!
//! Commands are newline-terminated ASCII lines. Queries are answered by one
//! ASCII line, except `:WAV:DATA?` which is answered by a binary block and is
//! decoded separately by [`BlockDecoder`](crate::block::BlockDecoder).

use crate::error::{ScpiError, TransportError};
use crate::preamble::WaveformPreamble;
use crate::transport::{ConnectionConfig, Transport};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Trigger state reported by `:TRIG:STAT?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerStatus {
    /// Triggered, capture in progress
    Triggered,
    /// Armed, waiting for a trigger
    Wait,
    /// Running
    Run,
    /// Auto trigger
    Auto,
    /// Capture complete
    Stop,
    /// Anything the instrument reports that is not listed above
    Other(String),
}

impl TriggerStatus {
    /// Classify a raw `:TRIG:STAT?` response.
    pub fn from_response(response: &str) -> Self {
        let status = response.trim();
        if status.starts_with("STOP") {
            return Self::Stop;
        }
        match status {
            "TD" => Self::Triggered,
            "WAIT" => Self::Wait,
            "RUN" => Self::Run,
            "AUTO" => Self::Auto,
            other => Self::Other(other.to_string()),
        }
    }

    /// True once the single-shot capture has finished.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triggered => f.write_str("TD"),
            Self::Wait => f.write_str("WAIT"),
            Self::Run => f.write_str("RUN"),
            Self::Auto => f.write_str("AUTO"),
            Self::Stop => f.write_str("STOP"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// SCPI client owning the instrument transport.
pub struct ScpiClient<S> {
    transport: Transport<S>,
}

impl ScpiClient<TcpStream> {
    /// Connect to an instrument over TCP.
    pub async fn connect(
        host: &str,
        port: u16,
        config: &ConnectionConfig,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(Transport::connect(host, port, config).await?))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ScpiClient<S> {
    /// Wrap an existing transport.
    pub fn new(transport: Transport<S>) -> Self {
        Self { transport }
    }

    /// Transport used for binary block reads.
    pub fn transport_mut(&mut self) -> &mut Transport<S> {
        &mut self.transport
    }

    /// Send a command without expecting a response.
    pub async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        tracing::debug!(command, "SCPI write");
        let line = format!("{command}\n");
        self.transport.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Send a query and read its single-line response.
    pub async fn query(&mut self, query: &str) -> Result<String, ScpiError> {
        self.write(query).await?;
        let response = self.transport.read_line().await?;
        tracing::debug!(query, response = %response, "SCPI response");
        Ok(response)
    }

    /// Query an ON/OFF (or 1/0) value.
    pub async fn query_bool(&mut self, query: &str) -> Result<bool, ScpiError> {
        let response = self.query(query).await?;
        match response.trim().to_uppercase().as_str() {
            "ON" | "1" => Ok(true),
            "OFF" | "0" => Ok(false),
            _ => Err(ScpiError::UnexpectedResponse {
                command: query.to_string(),
                response,
            }),
        }
    }

    /// `*CLS`: clear event registers and the error queue.
    pub async fn clear_status(&mut self) -> Result<(), TransportError> {
        self.write("*CLS").await
    }

    /// `:STOP`: stop any running acquisition.
    pub async fn stop(&mut self) -> Result<(), TransportError> {
        self.write(":STOP").await
    }

    /// `*OPC?`: true when all pending operations are complete.
    pub async fn operation_complete(&mut self) -> Result<bool, ScpiError> {
        self.query_bool("*OPC?").await
    }

    /// `*IDN?`: instrument identity string.
    pub async fn identify(&mut self) -> Result<String, ScpiError> {
        self.query("*IDN?").await
    }

    /// `*WAI`: hold further command execution until pending operations finish.
    pub async fn wait(&mut self) -> Result<(), TransportError> {
        self.write("*WAI").await
    }

    /// Select raw memory transfer with one byte per sample.
    pub async fn configure_raw_byte_transfer(&mut self) -> Result<(), TransportError> {
        self.write(":WAV:MODE RAW").await?;
        self.write(":WAV:FORM BYTE").await
    }

    /// `:CHAN<n>:DISP?`: whether an analog channel is displayed.
    pub async fn channel_displayed(&mut self, channel: u8) -> Result<bool, ScpiError> {
        self.query_bool(&format!(":CHAN{channel}:DISP?")).await
    }

    /// `:WAV:SOUR CHAN<n>`: make `channel` the waveform source.
    pub async fn select_source(&mut self, channel: u8) -> Result<(), TransportError> {
        self.write(&format!(":WAV:SOUR CHAN{channel}")).await
    }

    /// `:WAV:PRE?` for the current source.
    pub async fn preamble(&mut self) -> Result<WaveformPreamble, ScpiError> {
        let response = self.query(":WAV:PRE?").await?;
        Ok(response.parse::<WaveformPreamble>()?)
    }

    /// `:SING`: arm a single-shot capture.
    pub async fn single(&mut self) -> Result<(), TransportError> {
        self.write(":SING").await
    }

    /// `:TRIG:STAT?` followed by `*WAI`, then read the status line.
    pub async fn trigger_status(&mut self) -> Result<TriggerStatus, ScpiError> {
        self.write(":TRIG:STAT?").await?;
        self.wait().await?;
        let response = self.transport.read_line().await?;
        tracing::debug!(response = %response, "Trigger status");
        Ok(TriggerStatus::from_response(&response))
    }

    /// `:WAV:DATA?`, optionally followed by `*WAI`. The block must then be
    /// decoded from [`transport_mut`](Self::transport_mut).
    pub async fn request_waveform_data(&mut self, wait: bool) -> Result<(), TransportError> {
        self.write(":WAV:DATA?").await?;
        if wait {
            self.wait().await?;
        }
        Ok(())
    }

    /// Close the connection.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.transport.shutdown().await
    }
}
