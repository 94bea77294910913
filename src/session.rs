//! Instrument session lifecycle.
//!
//! A [`Session`] owns the one connection to the oscilloscope. It starts open
//! and is closed exactly once: [`Session::close`] shuts the socket down on the
//! first call and is a no-op afterwards, so every exit path of a run (normal
//! completion, cancellation, fatal error) can call it unconditionally.

use crate::config::InstrumentConfig;
use crate::error::{AppResult, DaqError};
use daq_driver_rigol::{ScpiClient, Transport};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// One open (or already closed) connection to the instrument.
pub struct Session<S> {
    client: Option<ScpiClient<S>>,
    peer: String,
}

impl Session<TcpStream> {
    /// Connect to the instrument named in `config`.
    pub async fn connect(config: &InstrumentConfig) -> AppResult<Self> {
        let host = config.host.as_deref().ok_or_else(|| {
            DaqError::Configuration("no instrument host configured".to_string())
        })?;
        let transport = Transport::connect(host, config.port, &config.connection()).await?;
        Ok(Self {
            client: Some(ScpiClient::new(transport)),
            peer: format!("{host}:{}", config.port),
        })
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    /// Open a session over an already established stream.
    pub fn from_stream(stream: S, io_timeout: Duration, peer: impl Into<String>) -> Self {
        Self {
            client: Some(ScpiClient::new(Transport::new(stream, io_timeout))),
            peer: peer.into(),
        }
    }

    /// Address (or label) of the instrument.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// True until [`close`](Self::close) has been called.
    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    /// SCPI client for the open connection.
    pub fn client_mut(&mut self) -> AppResult<&mut ScpiClient<S>> {
        self.client.as_mut().ok_or(DaqError::SessionClosed)
    }

    /// Shut the connection down. Safe to call more than once.
    pub async fn close(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };
        match client.close().await {
            Ok(()) => tracing::info!(peer = %self.peer, "Instrument session closed"),
            // The peer may already be gone; the socket is released either way.
            Err(err) => tracing::debug!(peer = %self.peer, error = %err, "Shutdown on closed session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstrumentConfig;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn close_is_idempotent() {
        let (client_io, mut scope_io) = tokio::io::duplex(1024);
        let mut session = Session::from_stream(client_io, Duration::from_secs(1), "duplex");
        assert!(session.is_open());

        session.client_mut().unwrap().write("*CLS").await.unwrap();
        session.close().await;
        session.close().await;

        assert!(!session.is_open());
        assert!(matches!(session.client_mut(), Err(DaqError::SessionClosed)));

        let mut received = String::new();
        scope_io.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "*CLS\n");
    }

    #[tokio::test]
    async fn connect_requires_host() {
        let err = Session::connect(&InstrumentConfig::default())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[tokio::test]
    async fn connect_over_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = InstrumentConfig {
            host: Some("127.0.0.1".into()),
            port,
            ..Default::default()
        };

        let (session, accepted) = tokio::join!(Session::connect(&config), listener.accept());
        let mut session = session.unwrap();
        accepted.unwrap();

        assert_eq!(session.peer(), format!("127.0.0.1:{port}"));
        session.close().await;
        assert!(!session.is_open());
    }
}
