//! Reliable stream I/O over the instrument socket.
//!
//! [`Transport`] masks the partial-transfer behaviour of a stream socket: writes
//! loop until every byte is accepted, exact reads never return short, and every
//! operation is bounded by the configured I/O timeout. Nothing here retries; a
//! fault is classified as [`TransportError`] and handed to the caller.
//!
//! The transport is generic over the byte stream so the same code runs on a
//! `TcpStream`, an in-memory `tokio::io::duplex` pipe or a scripted mock.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default raw-socket SCPI port of the MSO5000 family
pub const DEFAULT_PORT: u16 = 5555;

/// Read/write timeout sized for the largest (200 Mpts) captures
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(40);

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Socket options applied when connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Upper bound on resolving and connecting
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Upper bound on every individual read or write
    #[serde(with = "humantime_serde", default = "default_io_timeout")]
    pub io_timeout: Duration,

    /// Disable Nagle's algorithm (TCP_NODELAY)
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_io_timeout() -> Duration {
    DEFAULT_IO_TIMEOUT
}

fn default_nodelay() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            nodelay: true,
        }
    }
}

fn timed_out(operation: &str, limit: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{operation} timed out after {limit:?}"),
    )
}

fn closed_by_peer() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed by instrument",
    )
}

/// Buffered, timeout-bounded byte stream to the instrument.
pub struct Transport<S> {
    stream: BufReader<S>,
    io_timeout: Duration,
}

impl Transport<TcpStream> {
    /// Connect to `host:port` and apply the socket options from `config`.
    pub async fn connect(
        host: &str,
        port: u16,
        config: &ConnectionConfig,
    ) -> Result<Self, TransportError> {
        let addr = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let fail = |source: io::Error| TransportError::Connect {
            addr: addr.clone(),
            source,
        };

        let stream = timeout(config.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| fail(timed_out("connect", config.connect_timeout)))?
            .map_err(&fail)?;

        stream.set_nodelay(config.nodelay).map_err(&fail)?;

        tracing::info!(
            %addr,
            nodelay = config.nodelay,
            io_timeout = ?config.io_timeout,
            "Connected to instrument"
        );

        Ok(Self::new(stream, config.io_timeout))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    /// Wrap an already connected stream.
    pub fn new(stream: S, io_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            io_timeout,
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Send the whole buffer, looping over partial writes.
    ///
    /// Returns the number of bytes sent, which is always `bytes.len()` on
    /// success. A write that accepts zero bytes is treated as a dead peer.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let limit = self.io_timeout;
        let mut sent = 0;

        while sent < bytes.len() {
            match timeout(limit, self.stream.get_mut().write(&bytes[sent..])).await {
                Ok(Ok(0)) => {
                    return Err(TransportError::WriteFailed {
                        sent,
                        source: io::Error::new(
                            io::ErrorKind::WriteZero,
                            "instrument accepted zero bytes",
                        ),
                    })
                }
                Ok(Ok(n)) => sent += n,
                Ok(Err(source)) => return Err(TransportError::WriteFailed { sent, source }),
                Err(_) => {
                    return Err(TransportError::WriteFailed {
                        sent,
                        source: timed_out("write", limit),
                    })
                }
            }
        }

        match timeout(limit, self.stream.get_mut().flush()).await {
            Ok(Ok(())) => Ok(sent),
            Ok(Err(source)) => Err(TransportError::WriteFailed { sent, source }),
            Err(_) => Err(TransportError::WriteFailed {
                sent,
                source: timed_out("flush", limit),
            }),
        }
    }

    /// Fill `buf` completely or fail. Never returns a short read.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let limit = self.io_timeout;
        match timeout(limit, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) if source.kind() == io::ErrorKind::UnexpectedEof => {
                Err(TransportError::ReadFailed {
                    source: closed_by_peer(),
                })
            }
            Ok(Err(source)) => Err(TransportError::ReadFailed { source }),
            Err(_) => Err(TransportError::ReadFailed {
                source: timed_out("read", limit),
            }),
        }
    }

    /// One receive of at most `buf.len()` bytes. `Ok(0)` means the peer closed.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let limit = self.io_timeout;
        self.read_some_within(buf, limit).await
    }

    /// Like [`read_some`](Self::read_some) with an explicit time limit.
    pub async fn read_some_within(
        &mut self,
        buf: &mut [u8],
        limit: Duration,
    ) -> Result<usize, TransportError> {
        match timeout(limit, self.stream.read(buf)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(source)) => Err(TransportError::ReadFailed { source }),
            Err(_) => Err(TransportError::ReadFailed {
                source: timed_out("read", limit),
            }),
        }
    }

    /// Read one newline-terminated response line, without the trailing CR/LF.
    pub async fn read_line(&mut self) -> Result<String, TransportError> {
        let limit = self.io_timeout;
        let mut line = Vec::new();
        match timeout(limit, self.stream.read_until(b'\n', &mut line)).await {
            Ok(Ok(0)) => Err(TransportError::ReadFailed {
                source: closed_by_peer(),
            }),
            Ok(Ok(_)) => Ok(String::from_utf8_lossy(&line)
                .trim_end_matches(&['\r', '\n'][..])
                .to_string()),
            Ok(Err(source)) => Err(TransportError::ReadFailed { source }),
            Err(_) => Err(TransportError::ReadFailed {
                source: timed_out("read", limit),
            }),
        }
    }

    /// Shut down the write half so the instrument sees an orderly close.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        let limit = self.io_timeout;
        match timeout(limit, self.stream.get_mut().shutdown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(TransportError::WriteFailed { sent: 0, source }),
            Err(_) => Err(TransportError::WriteFailed {
                sent: 0,
                source: timed_out("shutdown", limit),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;
    use tokio::net::TcpListener;

    /// Writer that accepts at most `max_chunk` bytes per call and stops
    /// accepting anything once `capacity` bytes have been taken.
    struct Trickle {
        written: Vec<u8>,
        max_chunk: usize,
        capacity: usize,
        calls: usize,
    }

    impl Trickle {
        fn new(max_chunk: usize, capacity: usize) -> Self {
            Self {
                written: Vec::new(),
                max_chunk,
                capacity,
                calls: 0,
            }
        }
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            this.calls += 1;
            let room = this.capacity - this.written.len();
            let n = buf.len().min(this.max_chunk).min(room);
            this.written.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn write_all_completes_partial_writes() {
        let mut transport = Transport::new(Trickle::new(3, usize::MAX), DEFAULT_IO_TIMEOUT);

        let sent = transport.write_all(b":WAV:DATA?\n").await.unwrap();

        assert_eq!(sent, 11);
        assert_eq!(transport.get_ref().written, b":WAV:DATA?\n");
        assert_eq!(transport.get_ref().calls, 4);
    }

    #[tokio::test]
    async fn write_all_fails_on_zero_length_write() {
        let mut transport = Transport::new(Trickle::new(4, 6), DEFAULT_IO_TIMEOUT);

        let err = transport.write_all(b":TRIG:STAT?\n").await.unwrap_err();

        match err {
            TransportError::WriteFailed { sent, source } => {
                assert_eq!(sent, 6);
                assert_eq!(source.kind(), io::ErrorKind::WriteZero);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_exact_assembles_fragments() {
        let mock = tokio_test::io::Builder::new()
            .read(b"#9")
            .read(b"0000")
            .read(b"00005")
            .build();
        let mut transport = Transport::new(mock, DEFAULT_IO_TIMEOUT);

        let mut header = [0u8; 11];
        transport.read_exact(&mut header).await.unwrap();

        assert_eq!(&header, b"#9000000005");
    }

    #[tokio::test]
    async fn read_exact_never_returns_short() {
        let mock = tokio_test::io::Builder::new().read(b"#90").build();
        let mut transport = Transport::new(mock, DEFAULT_IO_TIMEOUT);

        let mut header = [0u8; 11];
        let err = transport.read_exact(&mut header).await.unwrap_err();

        assert!(err.is_closed(), "expected peer close, got {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn read_exact_times_out() {
        let (_host, device) = tokio::io::duplex(64);
        let mut transport = Transport::new(device, Duration::from_secs(1));

        let mut buf = [0u8; 4];
        let err = transport.read_exact(&mut buf).await.unwrap_err();

        assert!(err.is_timeout(), "expected timeout, got {err:?}");
    }

    #[tokio::test]
    async fn read_line_strips_line_ending() {
        let mock = tokio_test::io::Builder::new()
            .read(b"RIGOL TECHNOLOGIES,MSO5074,DS5A0000,00.01.02\r\n")
            .build();
        let mut transport = Transport::new(mock, DEFAULT_IO_TIMEOUT);

        let line = transport.read_line().await.unwrap();

        assert_eq!(line, "RIGOL TECHNOLOGIES,MSO5074,DS5A0000,00.01.02");
    }

    #[tokio::test]
    async fn read_line_reports_closed_connection() {
        let mock = tokio_test::io::Builder::new().build();
        let mut transport = Transport::new(mock, DEFAULT_IO_TIMEOUT);

        let err = transport.read_line().await.unwrap_err();

        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn connect_applies_socket_options() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut buf = [0u8; 6];
            socket.read_exact(&mut buf).await?;
            Ok::<_, io::Error>(buf)
        });

        let mut transport =
            Transport::connect("127.0.0.1", port, &ConnectionConfig::default()).await?;
        assert!(transport.get_ref().nodelay()?);
        transport.write_all(b"*IDN?\n").await?;

        assert_eq!(&accept.await??, b"*IDN?\n");
        Ok(())
    }

    #[tokio::test]
    async fn connect_accepts_bare_ipv6_host() -> anyhow::Result<()> {
        // Hosts without IPv6 loopback have nothing to check.
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            return Ok(());
        };
        let port = listener.local_addr()?.port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let transport = Transport::connect("::1", port, &ConnectionConfig::default()).await?;
        assert!(transport.get_ref().peer_addr()?.is_ipv6());

        accept.await??;
        Ok(())
    }

    #[tokio::test]
    async fn connect_failure_reports_bracketed_ipv6_address() -> anyhow::Result<()> {
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            return Ok(());
        };
        let port = listener.local_addr()?.port();
        drop(listener);

        match Transport::connect("::1", port, &ConnectionConfig::default()).await {
            Ok(_) => panic!("connect to a closed port succeeded"),
            Err(TransportError::Connect { addr, .. }) => assert_eq!(addr, format!("[::1]:{port}")),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn connect_failure_is_classified() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let err = match Transport::connect("127.0.0.1", port, &ConnectionConfig::default()).await
        {
            Ok(_) => panic!("connect to a closed port succeeded"),
            Err(err) => err,
        };
        assert!(matches!(err, TransportError::Connect { .. }));
        Ok(())
    }
}
