//! Simulated MSO5000 for testing without hardware.
//!
//! [`MockScope`] speaks the subset of SCPI used by the acquisition client over
//! any async byte stream: a `tokio::io::duplex` pipe in tests, or an accepted
//! `TcpStream` for end-to-end runs. Binary blocks can be corrupted on demand
//! through [`BlockFault`] to exercise the recovery paths.

use std::collections::VecDeque;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Number of analog inputs on the simulated instrument
pub const MOCK_CHANNELS: u8 = 4;

/// Default `*IDN?` response
pub const MOCK_IDENTITY: &str = "RIGOL TECHNOLOGIES,MSO5074,MOCK00000001,00.01.02.00.02";

/// Corruption applied to one `:WAV:DATA?` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockFault {
    /// Send the full block with this byte instead of 0x0A
    BadTerminator(u8),
    /// Send only a header declaring a length of -1
    NegativeLength,
    /// Send only a header declaring 999,999,999 bytes
    Oversized,
    /// Send the header and `after` payload bytes, then close the connection
    Hangup {
        /// Payload bytes sent before closing
        after: usize,
    },
}

/// One simulated analog channel.
#[derive(Debug, Clone)]
pub struct MockChannel {
    /// Answer to `:CHAN<n>:DISP?`
    pub displayed: bool,
    /// Answer to `:WAV:PRE?` while this channel is the source
    pub preamble: String,
    /// Raw samples returned by `:WAV:DATA?`
    pub samples: Vec<u8>,
    /// Faults applied to successive data requests, one per request
    pub faults: VecDeque<BlockFault>,
    /// Fault applied whenever `faults` is empty
    pub persistent_fault: Option<BlockFault>,
}

impl MockChannel {
    /// Displayed channel holding a `points`-sample ramp.
    pub fn displayed(points: usize) -> Self {
        Self {
            displayed: true,
            preamble: format!(
                "0,2,{points},1,1.000000e-09,-5.000000e-07,0,4.000000e-02,0,128"
            ),
            samples: (0..points).map(|i| (i % 256) as u8).collect(),
            faults: VecDeque::new(),
            persistent_fault: None,
        }
    }

    /// Channel that is switched off.
    pub fn hidden() -> Self {
        Self {
            displayed: false,
            ..Self::displayed(0)
        }
    }

    /// Replace the preamble response.
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    /// Queue faults for the next data requests.
    pub fn with_faults(mut self, faults: impl IntoIterator<Item = BlockFault>) -> Self {
        self.faults.extend(faults);
        self
    }

    /// Apply `fault` to every data request.
    pub fn always_failing(mut self, fault: BlockFault) -> Self {
        self.persistent_fault = Some(fault);
        self
    }
}

/// Behaviour of the simulated instrument.
#[derive(Debug, Clone)]
pub struct MockScopeConfig {
    /// `*IDN?` response
    pub identity: String,
    /// CH1..CH4, missing entries behave as hidden channels
    pub channels: Vec<MockChannel>,
    /// `:TRIG:STAT?` answers `WAIT` this many times after `:SING`
    pub trigger_polls_before_stop: usize,
    /// Payload bytes written per socket write
    pub fragment_size: usize,
}

impl Default for MockScopeConfig {
    fn default() -> Self {
        Self {
            identity: MOCK_IDENTITY.to_string(),
            channels: vec![
                MockChannel::displayed(1000),
                MockChannel::displayed(1000),
                MockChannel::hidden(),
                MockChannel::hidden(),
            ],
            trigger_polls_before_stop: 2,
            fragment_size: 1024,
        }
    }
}

/// What the simulated instrument saw during a session.
#[derive(Debug, Clone, Default)]
pub struct MockScopeLog {
    /// Every command line received, in order
    pub commands: Vec<String>,
    /// Number of `:WAV:DATA?` responses sent
    pub blocks_sent: usize,
}

impl MockScopeLog {
    /// How many times `command` was received.
    pub fn count(&self, command: &str) -> usize {
        self.commands.iter().filter(|c| c.as_str() == command).count()
    }
}

enum Served {
    Continue,
    HungUp,
}

/// Simulated instrument session.
pub struct MockScope {
    config: MockScopeConfig,
    source: u8,
    polls_remaining: usize,
    log: MockScopeLog,
}

impl MockScope {
    /// Create a simulated instrument.
    pub fn new(config: MockScopeConfig) -> Self {
        Self {
            config,
            source: 1,
            polls_remaining: 0,
            log: MockScopeLog::default(),
        }
    }

    /// Answer commands on `stream` until the client disconnects or a
    /// [`BlockFault::Hangup`] closes the connection.
    pub async fn serve<S>(mut self, stream: S) -> io::Result<MockScopeLog>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            let command = line.trim().to_string();
            if command.is_empty() {
                continue;
            }
            tracing::trace!(command = %command, "Mock scope received");
            self.log.commands.push(command.clone());

            if let Served::HungUp = self.respond(&command, &mut writer).await? {
                tracing::debug!("Mock scope hanging up");
                break;
            }
        }

        Ok(self.log)
    }

    async fn respond<W>(&mut self, command: &str, writer: &mut W) -> io::Result<Served>
    where
        W: AsyncWrite + Unpin,
    {
        let upper = command.to_ascii_uppercase();
        match upper.as_str() {
            "*CLS" | ":STOP" | "*WAI" | ":WAV:MODE RAW" | ":WAV:FORM BYTE" => {}
            "*OPC?" => reply(writer, "1").await?,
            "*IDN?" => {
                let identity = self.config.identity.clone();
                reply(writer, &identity).await?;
            }
            ":SING" => self.polls_remaining = self.config.trigger_polls_before_stop,
            ":TRIG:STAT?" => {
                let status = if self.polls_remaining == 0 {
                    "STOP"
                } else {
                    self.polls_remaining -= 1;
                    "WAIT"
                };
                reply(writer, status).await?;
            }
            ":WAV:PRE?" => {
                let preamble = self
                    .channel(self.source)
                    .map(|c| c.preamble.clone())
                    .unwrap_or_default();
                reply(writer, &preamble).await?;
            }
            ":WAV:DATA?" => return self.send_block(writer).await,
            other => {
                if let Some(channel) = parse_display_query(other) {
                    let displayed = self.channel(channel).is_some_and(|c| c.displayed);
                    reply(writer, if displayed { "1" } else { "0" }).await?;
                } else if let Some(channel) = other
                    .strip_prefix(":WAV:SOUR CHAN")
                    .and_then(|n| n.parse::<u8>().ok())
                {
                    self.source = channel;
                } else {
                    tracing::warn!(command, "Unknown mock command");
                }
            }
        }
        Ok(Served::Continue)
    }

    fn channel(&self, channel: u8) -> Option<&MockChannel> {
        usize::from(channel)
            .checked_sub(1)
            .and_then(|index| self.config.channels.get(index))
    }

    async fn send_block<W>(&mut self, writer: &mut W) -> io::Result<Served>
    where
        W: AsyncWrite + Unpin,
    {
        self.log.blocks_sent += 1;
        let fragment_size = self.config.fragment_size.max(1);
        let index = usize::from(self.source).checked_sub(1);
        let Some(channel) = index.and_then(|i| self.config.channels.get_mut(i)) else {
            writer.write_all(b"#9000000000\n").await?;
            writer.flush().await?;
            return Ok(Served::Continue);
        };

        let fault = channel
            .faults
            .pop_front()
            .or_else(|| channel.persistent_fault.clone());
        let samples = &channel.samples;
        let header = format!("#9{:09}", samples.len());

        let (payload, terminator, served) = match fault {
            None => (samples.as_slice(), Some(b'\n'), Served::Continue),
            Some(BlockFault::BadTerminator(byte)) => {
                (samples.as_slice(), Some(byte), Served::Continue)
            }
            Some(BlockFault::NegativeLength) => {
                writer.write_all(b"#9-00000001").await?;
                writer.flush().await?;
                return Ok(Served::Continue);
            }
            Some(BlockFault::Oversized) => {
                writer.write_all(b"#9999999999").await?;
                writer.flush().await?;
                return Ok(Served::Continue);
            }
            Some(BlockFault::Hangup { after }) => {
                (&samples[..after.min(samples.len())], None, Served::HungUp)
            }
        };

        writer.write_all(header.as_bytes()).await?;
        for fragment in payload.chunks(fragment_size) {
            writer.write_all(fragment).await?;
            writer.flush().await?;
        }
        if let Some(terminator) = terminator {
            writer.write_all(&[terminator]).await?;
        }
        writer.flush().await?;
        Ok(served)
    }
}

fn parse_display_query(command: &str) -> Option<u8> {
    command
        .strip_prefix(":CHAN")?
        .strip_suffix(":DISP?")?
        .parse()
        .ok()
}

async fn reply<W>(writer: &mut W, response: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(response.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockDecoder;
    use crate::error::FrameError;
    use crate::scpi::ScpiClient;
    use crate::transport::{Transport, DEFAULT_IO_TIMEOUT};

    fn spawn_scope(
        config: MockScopeConfig,
    ) -> (
        ScpiClient<tokio::io::DuplexStream>,
        tokio::task::JoinHandle<io::Result<MockScopeLog>>,
    ) {
        let (client_io, scope_io) = tokio::io::duplex(64 * 1024);
        let scope = tokio::spawn(MockScope::new(config).serve(scope_io));
        (
            ScpiClient::new(Transport::new(client_io, DEFAULT_IO_TIMEOUT)),
            scope,
        )
    }

    #[test]
    fn display_query_parsing() {
        assert_eq!(parse_display_query(":CHAN3:DISP?"), Some(3));
        assert_eq!(parse_display_query(":CHAN:DISP?"), None);
        assert_eq!(parse_display_query(":WAV:PRE?"), None);
    }

    #[tokio::test]
    async fn answers_identity_and_channels() -> anyhow::Result<()> {
        let (mut client, scope) = spawn_scope(MockScopeConfig::default());

        assert_eq!(client.identify().await?, MOCK_IDENTITY);
        assert!(client.channel_displayed(1).await?);
        assert!(!client.channel_displayed(3).await?);
        client.select_source(2).await?;
        assert_eq!(client.preamble().await?.points, 1000);

        client.close().await?;
        let log = scope.await??;
        assert_eq!(log.count(":WAV:SOUR CHAN2"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn trigger_stops_after_configured_polls() -> anyhow::Result<()> {
        let config = MockScopeConfig {
            trigger_polls_before_stop: 2,
            ..Default::default()
        };
        let (mut client, scope) = spawn_scope(config);

        client.single().await?;
        assert!(!client.trigger_status().await?.is_stopped());
        assert!(!client.trigger_status().await?.is_stopped());
        assert!(client.trigger_status().await?.is_stopped());

        client.close().await?;
        scope.await??;
        Ok(())
    }

    #[tokio::test]
    async fn serves_fragmented_blocks_and_faults() -> anyhow::Result<()> {
        let config = MockScopeConfig {
            channels: vec![MockChannel::displayed(300)
                .with_faults([BlockFault::BadTerminator(0xFF), BlockFault::NegativeLength])],
            fragment_size: 64,
            ..Default::default()
        };
        let (mut client, scope) = spawn_scope(config);
        let mut decoder = BlockDecoder::new(1024).with_drain_timeout(std::time::Duration::from_millis(20));

        client.request_waveform_data(false).await?;
        let err = decoder.decode(client.transport_mut()).await.unwrap_err();
        assert!(matches!(err, FrameError::Desynchronized { found: 0xFF, .. }));

        client.request_waveform_data(false).await?;
        let err = decoder.decode(client.transport_mut()).await.unwrap_err();
        assert!(matches!(err, FrameError::HeaderInvalid { .. }));

        client.request_waveform_data(false).await?;
        let frame = decoder.decode(client.transport_mut()).await?;
        assert_eq!(frame.declared_len, 300);
        assert_eq!(frame.payload[255], 255);
        assert_eq!(frame.payload[256], 0);

        client.close().await?;
        assert_eq!(scope.await??.blocks_sent, 3);
        Ok(())
    }

    #[tokio::test]
    async fn hangup_closes_the_stream() -> anyhow::Result<()> {
        let config = MockScopeConfig {
            channels: vec![MockChannel::displayed(100).always_failing(BlockFault::Hangup { after: 40 })],
            ..Default::default()
        };
        let (mut client, scope) = spawn_scope(config);
        let mut decoder = BlockDecoder::new(1024);

        client.request_waveform_data(false).await?;
        let err = decoder.decode(client.transport_mut()).await.unwrap_err();

        assert!(matches!(
            err,
            FrameError::Incomplete {
                declared: 100,
                received: 40,
                ..
            }
        ));
        scope.await??;
        Ok(())
    }
}
