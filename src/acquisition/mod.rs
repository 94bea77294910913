//! Acquisition retry engine.
//!
//! Each waveform cycle arms a single-shot capture, polls the trigger until the
//! instrument reports `STOP`, then reads one binary block per ready channel.
//! A channel read that fails with a recoverable
//! [`FrameError`](daq_driver_rigol::FrameError) is retried up
//! to the configured budget; once the budget is spent the engine moves on to
//! the next channel. Transport failures end the run.
//!
//! Cycles repeat until the waveform limit is reached or the cancellation
//! token fires. Cancellation is a normal stop, not an error. The token is
//! checked between protocol steps (before each cycle, between trigger polls
//! and before each block request), so a block that has been decoded is always
//! written to the raw dump in full before the engine stops.

pub mod sink;
pub mod stats;

use crate::bootstrap::{ChannelDescriptor, InstrumentInfo};
use crate::config::AcquisitionConfig;
use crate::error::{AppResult, DaqError};
use crate::session::Session;
use daq_driver_rigol::BlockDecoder;
use serde::Serialize;
use sink::RawSink;
use stats::{AcquisitionStats, AcquisitionSummary, ChannelReport, WaveformReport};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Why [`AcquisitionEngine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// The waveform limit was reached
    Completed,
    /// The cancellation token fired
    Cancelled,
}

/// Drives waveform cycles over one instrument session.
pub struct AcquisitionEngine<S> {
    session: Session<S>,
    channels: Vec<ChannelDescriptor>,
    decoder: BlockDecoder,
    settings: AcquisitionConfig,
    sink: Option<RawSink>,
    stats: AcquisitionStats,
    cancel: CancellationToken,
}

impl<S: AsyncRead + AsyncWrite + Unpin> AcquisitionEngine<S> {
    /// Create an engine for the channels discovered by bootstrap.
    ///
    /// Allocates the payload buffer (`max_payload_bytes`) once.
    pub fn new(
        session: Session<S>,
        info: &InstrumentInfo,
        settings: AcquisitionConfig,
        cancel: CancellationToken,
    ) -> Self {
        let decoder = BlockDecoder::new(settings.max_payload_bytes)
            .with_drain_timeout(settings.drain_timeout);
        Self {
            session,
            channels: info.channels.clone(),
            decoder,
            settings,
            sink: None,
            stats: AcquisitionStats::new(),
            cancel,
        }
    }

    /// Append every successful payload to `sink`.
    pub fn with_sink(mut self, sink: RawSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Statistics so far.
    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    /// Channel descriptors in use.
    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    /// Run waveform cycles until the limit is reached or the run is cancelled.
    pub async fn run(&mut self) -> AppResult<StopReason> {
        let cancel = self.cancel.clone();
        tracing::info!(
            limit = ?self.settings.waveform_limit,
            retry_budget = self.settings.retry_budget,
            channels = self.channels.iter().filter(|c| c.is_ready()).count(),
            "Acquisition started"
        );

        loop {
            if let Some(limit) = self.settings.waveform_limit {
                if self.stats.waveforms() >= limit {
                    tracing::info!(waveforms = limit, "Waveform limit reached");
                    return Ok(StopReason::Completed);
                }
            }

            if cancel.is_cancelled() || self.acquire_waveform().await?.is_none() {
                tracing::info!(waveforms = self.stats.waveforms(), "Acquisition cancelled");
                return Ok(StopReason::Cancelled);
            }
        }
    }

    /// Run one complete waveform cycle.
    ///
    /// Returns `None` when the run was cancelled part way through; the
    /// unfinished cycle is not counted.
    #[instrument(skip(self))]
    pub async fn acquire_waveform(&mut self) -> AppResult<Option<WaveformReport>> {
        let started = Instant::now();
        let index = self.stats.waveforms() + 1;

        self.session.client_mut()?.single().await?;
        let Some(trigger_polls) = self.wait_for_trigger().await? else {
            return Ok(None);
        };

        let ready: Vec<u8> = self
            .channels
            .iter()
            .filter(|c| c.is_ready())
            .map(|c| c.index)
            .collect();

        let mut channels = Vec::with_capacity(ready.len());
        for (position, channel) in ready.into_iter().enumerate() {
            match self.read_channel(channel, position == 0).await? {
                Some(report) => channels.push(report),
                None => return Ok(None),
            }
        }

        let report = WaveformReport {
            index,
            trigger_polls,
            channels,
            elapsed: started.elapsed(),
        };
        self.stats.record_waveform(&report);

        tracing::info!(
            waveform = index,
            elapsed_s = report.elapsed.as_secs_f64(),
            bytes = report.bytes(),
            channels = report.channels.len(),
            failures = report.failures(),
            "Waveform acquired"
        );
        Ok(Some(report))
    }

    /// Poll `:TRIG:STAT?` until it reports `STOP`. Returns the number of polls,
    /// or `None` if cancelled while waiting.
    async fn wait_for_trigger(&mut self) -> AppResult<Option<u64>> {
        let started = Instant::now();
        let mut polls: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let status = self.session.client_mut()?.trigger_status().await?;
            polls += 1;
            if status.is_stopped() {
                tracing::debug!(polls, "Capture complete");
                return Ok(Some(polls));
            }

            let elapsed = started.elapsed();
            let polls_exhausted = self
                .settings
                .max_trigger_polls
                .is_some_and(|max| polls >= max);
            let deadline_passed = self
                .settings
                .trigger_timeout
                .is_some_and(|limit| elapsed >= limit);
            if polls_exhausted || deadline_passed {
                tracing::warn!(polls, ?elapsed, last = %status, "Trigger never stopped");
                return Err(DaqError::AcquisitionTimeout { polls, elapsed });
            }

            if !self.settings.trigger_poll_interval.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(self.settings.trigger_poll_interval) => {}
                }
            }
        }
    }

    /// Read one channel's block, retrying recoverable frame failures.
    ///
    /// `first` marks the first ready channel of the cycle, which additionally
    /// sends `*WAI` after source selection and after each data request. The
    /// conventional MSO5000 sequence attaches `*WAI` to CH1 itself; here it
    /// follows whichever channel is read first, so a cycle with CH1 disabled
    /// still synchronises on its first read.
    ///
    /// Returns `None` if cancelled before a block request.
    #[instrument(skip(self))]
    async fn read_channel(&mut self, channel: u8, first: bool) -> AppResult<Option<ChannelReport>> {
        let started = Instant::now();
        let budget = self.settings.retry_budget;

        let client = self.session.client_mut()?;
        client.select_source(channel).await?;
        if first {
            client.wait().await?;
        }

        let mut attempts = 0;
        let mut failures = 0;
        let mut bytes = 0;
        let mut completed = false;

        while attempts < budget {
            if self.cancel.is_cancelled() {
                tracing::debug!(channel, attempts, "Cancelled before block request");
                return Ok(None);
            }
            attempts += 1;
            let client = self.session.client_mut()?;
            client.request_waveform_data(first).await?;

            match self.decoder.decode(client.transport_mut()).await {
                Ok(frame) => {
                    bytes = frame.payload.len();
                    if let Some(sink) = self.sink.as_mut() {
                        if let Err(err) = sink.append(frame.payload).await {
                            tracing::warn!(channel, error = %err, "Raw dump write failed");
                        }
                    }
                    completed = true;
                    break;
                }
                Err(err) if err.is_recoverable() => {
                    failures += 1;
                    self.stats.record_failure();
                    tracing::warn!(
                        channel,
                        attempt = attempts,
                        budget,
                        error = %err,
                        "Channel read failed"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        if !completed {
            tracing::warn!(channel, attempts, "Retry budget exhausted, skipping channel");
        }

        let report = ChannelReport {
            channel,
            attempts,
            failures,
            bytes,
            completed,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            channel,
            elapsed_s = report.elapsed.as_secs_f64(),
            bytes,
            mib_per_s = report.throughput(),
            failures,
            "Channel read"
        );
        Ok(Some(report))
    }

    /// Close the sink and the session and return the final statistics.
    pub async fn shutdown(mut self) -> AcquisitionSummary {
        if let Some(sink) = self.sink.take() {
            let path = sink.path().to_path_buf();
            if let Err(err) = sink.close().await {
                tracing::warn!(path = %path.display(), error = %err, "Raw dump close failed");
            }
        }
        self.session.close().await;
        self.stats.summary(self.decoder.counters())
    }
}
