//! Definite-length binary block decoding.
//!
//! The MSO5000 answers `:WAV:DATA?` with an IEEE 488.2 style block:
//!
//! ```text
//! '#' <digit> <9 ASCII length digits> <N payload bytes> 0x0A
//! ```
//!
//! [`BlockDecoder`] reads one such block from a [`Transport`], tolerating any
//! TCP fragmentation of the payload. A wrong terminator means the stream is no
//! longer aligned on block boundaries: the decoder performs one best-effort
//! drain and reports [`FrameError::Desynchronized`]. The next header read may
//! still land in garbage; callers account for that through their retry budget.

use crate::error::{FrameError, HeaderFault};
use crate::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Size of the fixed block header (`#9` + 9 digits)
pub const HEADER_LEN: usize = 11;

/// First byte of every block
pub const BLOCK_INTRODUCER: u8 = b'#';

/// Byte that must follow the payload
pub const END_MARKER: u8 = 0x0A;

/// Largest capture the MSO5000 can return (250 Mpts at one byte per point)
pub const MAX_PAYLOAD_BYTES: usize = 250_000_000;

/// Default time the resync drain waits for stray bytes
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Parsed block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Count-of-digits field as sent by the instrument
    pub digit_count: u8,
    /// Declared payload length in bytes
    pub declared_len: usize,
}

impl BlockHeader {
    /// Validate a raw header against the decoder capacity.
    pub fn parse(raw: &[u8; HEADER_LEN], capacity: usize) -> Result<Self, FrameError> {
        let reject = |fault| FrameError::HeaderInvalid {
            header: String::from_utf8_lossy(raw).into_owned(),
            fault,
        };

        if raw[0] != BLOCK_INTRODUCER {
            return Err(reject(HeaderFault::BadIntroducer(raw[0])));
        }
        if !raw[1].is_ascii_digit() {
            return Err(reject(HeaderFault::BadDigitCount(raw[1])));
        }

        let declared = parse_length(&raw[2..]).ok_or_else(|| reject(HeaderFault::MissingLength))?;
        if declared < 0 {
            return Err(reject(HeaderFault::Negative(declared)));
        }
        let declared_len = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= capacity)
            .ok_or_else(|| {
                reject(HeaderFault::ExceedsCapacity {
                    declared,
                    capacity,
                })
            })?;

        Ok(Self {
            digit_count: raw[1] - b'0',
            declared_len,
        })
    }
}

/// Parse a leading decimal integer the way C `atoi` does: optional leading
/// whitespace and sign, then digits up to the first non-digit.
fn parse_length(field: &[u8]) -> Option<i64> {
    let mut bytes = field
        .iter()
        .copied()
        .skip_while(u8::is_ascii_whitespace)
        .peekable();

    let negative = match bytes.peek() {
        Some(b'-') => {
            bytes.next();
            true
        }
        Some(b'+') => {
            bytes.next();
            false
        }
        _ => false,
    };

    let mut value: i64 = 0;
    let mut seen_digit = false;
    for digit in bytes.take_while(u8::is_ascii_digit) {
        value = value.checked_mul(10)?.checked_add(i64::from(digit - b'0'))?;
        seen_digit = true;
    }

    seen_digit.then_some(if negative { -value } else { value })
}

/// One successfully decoded block. The payload borrows the decoder buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct BlockFrame<'a> {
    /// Length announced in the header
    pub declared_len: usize,
    /// Exactly `declared_len` payload bytes
    pub payload: &'a [u8],
    /// Terminator byte, always [`END_MARKER`]
    pub terminator: u8,
}

/// Running payload transfer counters, kept for throughput diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferCounters {
    /// Payload bytes received across all blocks
    pub total_bytes: u64,
    /// Number of receives that delivered payload bytes
    pub packets: u64,
}

/// Decoder owning the single reusable payload buffer.
pub struct BlockDecoder {
    buf: Vec<u8>,
    drain_timeout: Duration,
    counters: TransferCounters,
}

impl BlockDecoder {
    /// Allocate a decoder able to hold payloads of up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            counters: TransferCounters::default(),
        }
    }

    /// Set how long the resync drain waits for stray bytes.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Maximum payload length accepted.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Counters accumulated over the decoder lifetime.
    pub fn counters(&self) -> TransferCounters {
        self.counters
    }

    /// Decode one block from `transport`.
    ///
    /// The request (`:WAV:DATA?`) must already have been sent.
    pub async fn decode<S>(
        &mut self,
        transport: &mut Transport<S>,
    ) -> Result<BlockFrame<'_>, FrameError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut raw = [0u8; HEADER_LEN];
        transport.read_exact(&mut raw).await?;
        let header = BlockHeader::parse(&raw, self.capacity())?;
        let declared = header.declared_len;
        tracing::debug!(
            header = %String::from_utf8_lossy(&raw),
            declared,
            "Block header"
        );

        let mut received = 0;
        while received < declared {
            let n = match transport.read_some(&mut self.buf[received..declared]).await {
                Ok(0) => {
                    tracing::warn!(declared, received, "Connection closed mid-block");
                    return Err(FrameError::Incomplete {
                        declared,
                        received,
                        source: None,
                    });
                }
                Ok(n) => n,
                Err(err) => {
                    tracing::warn!(declared, received, error = %err, "Receive failed mid-block");
                    return Err(FrameError::Incomplete {
                        declared,
                        received,
                        source: Some(err),
                    });
                }
            };
            received += n;
            self.counters.total_bytes += n as u64;
            self.counters.packets += 1;
            tracing::trace!(
                packet = self.counters.packets,
                total_bytes = self.counters.total_bytes,
                recv = n,
                received,
                "Block fragment"
            );
        }

        let mut end = [0u8; 1];
        transport.read_exact(&mut end).await?;
        if end[0] == END_MARKER {
            return Ok(BlockFrame {
                declared_len: declared,
                payload: &self.buf[..declared],
                terminator: end[0],
            });
        }

        let first = self.buf.first().copied().filter(|_| declared > 0);
        let drained = match transport
            .read_some_within(&mut self.buf, self.drain_timeout)
            .await
        {
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(error = %err, "Nothing drained");
                0
            }
        };
        tracing::warn!(
            terminator = format_args!("0x{:02X}", end[0]),
            first_byte = ?first,
            drained,
            "Block terminator mismatch, stream flushed"
        );

        Err(FrameError::Desynchronized {
            found: end[0],
            drained,
        })
    }
}
