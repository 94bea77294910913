//! Acquisition timing and throughput statistics.

use chrono::{DateTime, Utc};
use daq_driver_rigol::TransferCounters;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;

fn mib_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / MIB / secs
    } else {
        0.0
    }
}

/// Outcome of reading one channel within a waveform cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReport {
    /// 1-based channel number
    pub channel: u8,
    /// Block requests issued
    pub attempts: u32,
    /// Attempts that failed and were retried or abandoned
    pub failures: u32,
    /// Payload bytes of the successful block, 0 if the budget ran out
    pub bytes: usize,
    /// False when the retry budget was exhausted
    pub completed: bool,
    /// Time from source selection to the last attempt
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl ChannelReport {
    /// Payload throughput in MiB/s.
    pub fn throughput(&self) -> f64 {
        mib_per_second(self.bytes as u64, self.elapsed)
    }
}

/// Outcome of one waveform cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformReport {
    /// 1-based cycle number
    pub index: u64,
    /// Trigger status polls before `STOP`
    pub trigger_polls: u64,
    /// Per-channel results in channel order
    pub channels: Vec<ChannelReport>,
    /// Time from `:SING` to the last channel read
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl WaveformReport {
    /// Failed attempts across all channels.
    pub fn failures(&self) -> u64 {
        self.channels.iter().map(|c| u64::from(c.failures)).sum()
    }

    /// Payload bytes across all channels.
    pub fn bytes(&self) -> u64 {
        self.channels.iter().map(|c| c.bytes as u64).sum()
    }
}

/// Running statistics, owned and mutated by the acquisition engine only.
#[derive(Debug, Clone)]
pub struct AcquisitionStats {
    started_at: DateTime<Utc>,
    waveforms: u64,
    channel_failures: u64,
    total_bytes: u64,
    min_acquisition: Option<Duration>,
    max_acquisition: Duration,
    total_acquisition: Duration,
}

impl Default for AcquisitionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionStats {
    /// Empty statistics stamped with the current time.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            waveforms: 0,
            channel_failures: 0,
            total_bytes: 0,
            min_acquisition: None,
            max_acquisition: Duration::ZERO,
            total_acquisition: Duration::ZERO,
        }
    }

    /// Completed waveform cycles.
    pub fn waveforms(&self) -> u64 {
        self.waveforms
    }

    /// Failed channel reads, including attempts of cycles that did not finish.
    pub fn channel_failures(&self) -> u64 {
        self.channel_failures
    }

    /// Count one failed channel read attempt.
    pub fn record_failure(&mut self) {
        self.channel_failures += 1;
    }

    /// Fold a completed cycle into the statistics.
    ///
    /// Failures are counted as they happen through
    /// [`record_failure`](Self::record_failure), not here.
    pub fn record_waveform(&mut self, report: &WaveformReport) {
        self.waveforms += 1;
        self.total_bytes += report.bytes();
        self.total_acquisition += report.elapsed;
        self.max_acquisition = self.max_acquisition.max(report.elapsed);
        self.min_acquisition = Some(
            self.min_acquisition
                .map_or(report.elapsed, |min| min.min(report.elapsed)),
        );
    }

    /// Snapshot for reporting.
    pub fn summary(&self, transfer: TransferCounters) -> AcquisitionSummary {
        let average_acquisition = u32::try_from(self.waveforms)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| self.total_acquisition / n);

        AcquisitionSummary {
            started_at: self.started_at,
            finished_at: Utc::now(),
            waveforms: self.waveforms,
            channel_failures: self.channel_failures,
            total_bytes: self.total_bytes,
            received_bytes: transfer.total_bytes,
            packets: transfer.packets,
            min_acquisition: self.min_acquisition.unwrap_or_default(),
            max_acquisition: self.max_acquisition,
            average_acquisition,
            throughput_mib_s: mib_per_second(self.total_bytes, self.total_acquisition),
        }
    }
}

/// Final report printed at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionSummary {
    /// When the engine was created
    pub started_at: DateTime<Utc>,
    /// When the summary was taken
    pub finished_at: DateTime<Utc>,
    /// Completed waveform cycles
    pub waveforms: u64,
    /// Failed channel read attempts
    pub channel_failures: u64,
    /// Payload bytes of completed cycles
    pub total_bytes: u64,
    /// Payload bytes received by the decoder, including failed attempts and
    /// unfinished cycles
    pub received_bytes: u64,
    /// Socket receives behind `received_bytes`
    pub packets: u64,
    /// Fastest cycle
    #[serde(with = "humantime_serde")]
    pub min_acquisition: Duration,
    /// Slowest cycle
    #[serde(with = "humantime_serde")]
    pub max_acquisition: Duration,
    /// Mean cycle time
    #[serde(with = "humantime_serde")]
    pub average_acquisition: Duration,
    /// Payload bytes over total cycle time
    pub throughput_mib_s: f64,
}

impl fmt::Display for AcquisitionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Acquisition summary ({} to {})",
            self.started_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.finished_at.format("%H:%M:%S%.3f")
        )?;
        writeln!(f, "  waveforms:        {}", self.waveforms)?;
        writeln!(f, "  channel failures: {}", self.channel_failures)?;
        writeln!(
            f,
            "  acq time:         min={:.4}s max={:.4}s avg={:.4}s",
            self.min_acquisition.as_secs_f64(),
            self.max_acquisition.as_secs_f64(),
            self.average_acquisition.as_secs_f64()
        )?;
        writeln!(
            f,
            "  payload:          {} bytes in completed cycles ({:.3} MiB/s)",
            self.total_bytes, self.throughput_mib_s
        )?;
        write!(
            f,
            "  received:         {} bytes in {} packets",
            self.received_bytes, self.packets
        )
    }
}
