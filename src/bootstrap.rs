//! Instrument session bootstrap.
//!
//! Puts the oscilloscope into a known state and discovers which analog
//! channels can be read:
//!
//! 1. `*CLS`, `:STOP`, `*OPC?` (a reply other than `1` is only logged)
//! 2. `*IDN?`
//! 3. `:WAV:MODE RAW` and `:WAV:FORM BYTE`
//! 4. For each of CH1..CH4, `:CHAN<n>:DISP?`; displayed channels are selected
//!    with `:WAV:SOUR CHAN<n>` and their `:WAV:PRE?` is parsed.
//!
//! A displayed channel whose preamble cannot be parsed, or whose record does
//! not fit the payload buffer, is marked [`ChannelState::Unusable`] and never
//! read by the acquisition engine.

use crate::error::AppResult;
use daq_driver_rigol::{ScpiClient, ScpiError, WaveformPreamble};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::instrument;

/// Number of analog inputs on the MSO5000
pub const CHANNEL_COUNT: u8 = 4;

/// Readiness of one analog channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelState {
    /// Not displayed on the instrument, skipped.
    Disabled,
    /// Displayed with a valid preamble.
    Ready(WaveformPreamble),
    /// Displayed, but its preamble was rejected.
    Unusable {
        /// Why the preamble was rejected
        reason: String,
    },
}

/// One analog channel and its state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDescriptor {
    /// 1-based channel number
    pub index: u8,
    /// Current state
    pub state: ChannelState,
}

impl ChannelDescriptor {
    /// True if blocks should be requested for this channel.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ChannelState::Ready(_))
    }

    /// Preamble of a ready channel.
    pub fn preamble(&self) -> Option<&WaveformPreamble> {
        match &self.state {
            ChannelState::Ready(preamble) => Some(preamble),
            _ => None,
        }
    }
}

/// What bootstrap learned about the instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentInfo {
    /// `*IDN?` response
    pub identity: String,
    /// CH1..CH4 in order
    pub channels: Vec<ChannelDescriptor>,
}

impl InstrumentInfo {
    /// Channels the engine will read, in ascending order.
    pub fn ready_channels(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.iter().filter(|c| c.is_ready())
    }
}

/// Reset the instrument and discover its readable channels.
///
/// `capacity` is the payload buffer size; a channel whose point count exceeds
/// it is unusable.
#[instrument(skip(client))]
pub async fn bootstrap<S>(client: &mut ScpiClient<S>, capacity: usize) -> AppResult<InstrumentInfo>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    client.clear_status().await?;
    client.stop().await?;

    match client.operation_complete().await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("Operation complete query returned 0"),
        Err(ScpiError::UnexpectedResponse { response, .. }) => {
            tracing::warn!(%response, "Operation complete query did not return 1");
        }
        Err(err) => return Err(err.into()),
    }

    let identity = client.identify().await?;
    tracing::info!(identity = %identity, "Instrument identified");

    client.configure_raw_byte_transfer().await?;

    let mut channels = Vec::with_capacity(usize::from(CHANNEL_COUNT));
    for index in 1..=CHANNEL_COUNT {
        let state = if client.channel_displayed(index).await? {
            refresh_channel(client, index, capacity).await?
        } else {
            tracing::debug!(channel = index, "Channel not displayed");
            ChannelState::Disabled
        };
        channels.push(ChannelDescriptor { index, state });
    }

    let ready = channels.iter().filter(|c| c.is_ready()).count();
    if ready == 0 {
        tracing::warn!("No readable channels, waveform cycles will only poll the trigger");
    }
    tracing::info!(ready, "Bootstrap complete");

    Ok(InstrumentInfo { identity, channels })
}

/// Select `channel` and re-query its preamble.
///
/// A malformed or oversized preamble yields [`ChannelState::Unusable`]; only
/// transport-level failures are returned as errors.
#[instrument(skip(client, capacity))]
pub async fn refresh_channel<S>(
    client: &mut ScpiClient<S>,
    channel: u8,
    capacity: usize,
) -> AppResult<ChannelState>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    client.select_source(channel).await?;

    let preamble = match client.preamble().await {
        Ok(preamble) => preamble,
        Err(ScpiError::Preamble(err)) => {
            tracing::warn!(channel, error = %err, "Unusable preamble");
            return Ok(ChannelState::Unusable {
                reason: err.to_string(),
            });
        }
        Err(err) => return Err(err.into()),
    };

    if let Err(err) = preamble.check_capacity(capacity) {
        tracing::warn!(channel, error = %err, "Channel record too large");
        return Ok(ChannelState::Unusable {
            reason: err.to_string(),
        });
    }

    tracing::info!(
        channel,
        points = preamble.points,
        x_origin = preamble.x_origin,
        x_reference = preamble.x_reference,
        fs_per_sample = preamble.femtoseconds_per_sample(),
        "Channel ready"
    );
    tracing::debug!(
        channel,
        y_increment = preamble.y_increment,
        y_origin = preamble.y_origin,
        y_reference = preamble.y_reference,
        "Vertical scale"
    );

    Ok(ChannelState::Ready(preamble))
}
