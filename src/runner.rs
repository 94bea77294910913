//! Run orchestration: bootstrap, acquire, shut down.
//!
//! Every exit path closes the session exactly once: bootstrap failure, sink
//! creation failure, cancellation, fatal acquisition error and normal
//! completion.

use crate::acquisition::sink::RawSink;
use crate::acquisition::stats::{AcquisitionStats, AcquisitionSummary};
use crate::acquisition::{AcquisitionEngine, StopReason};
use crate::bootstrap::{bootstrap, InstrumentInfo};
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::session::Session;
use daq_driver_rigol::mock::{MockScope, MockScopeConfig};
use daq_driver_rigol::TransferCounters;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Result of a run that ended without a fatal error.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Why the run stopped
    pub reason: StopReason,
    /// `*IDN?` response, absent if cancelled during bootstrap
    pub identity: Option<String>,
    /// Final statistics
    pub summary: AcquisitionSummary,
}

/// Connect to the configured instrument and run.
pub async fn connect_and_run(config: &AppConfig, cancel: CancellationToken) -> AppResult<RunOutcome> {
    let session = Session::connect(&config.instrument).await?;
    run_session(session, config, cancel).await
}

/// Run against the built-in simulated instrument.
pub async fn run_mock(
    config: &AppConfig,
    scope: MockScopeConfig,
    cancel: CancellationToken,
) -> AppResult<RunOutcome> {
    let (client_io, scope_io) = tokio::io::duplex(256 * 1024);
    let server = tokio::spawn(MockScope::new(scope).serve(scope_io));
    let session = Session::from_stream(client_io, config.instrument.io_timeout, "mock");

    let outcome = run_session(session, config, cancel).await;

    match server.await {
        Ok(Ok(log)) => tracing::debug!(
            commands = log.commands.len(),
            blocks = log.blocks_sent,
            "Mock scope finished"
        ),
        Ok(Err(err)) => tracing::debug!(error = %err, "Mock scope stopped with error"),
        Err(err) => tracing::warn!(error = %err, "Mock scope task failed"),
    }
    outcome
}

/// Bootstrap the instrument, run the acquisition engine and shut down.
///
/// On a fatal error the summary is logged, the session closed, and the error
/// returned.
pub async fn run_session<S>(
    mut session: Session<S>,
    config: &AppConfig,
    cancel: CancellationToken,
) -> AppResult<RunOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let capacity = config.acquisition.max_payload_bytes;

    let bootstrapped = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = bootstrap_session(&mut session, capacity) => Some(result),
    };
    let info = match bootstrapped {
        Some(Ok(info)) => info,
        Some(Err(err)) => {
            tracing::error!(error = %err, "Bootstrap failed");
            session.close().await;
            return Err(err);
        }
        None => {
            tracing::info!("Cancelled during bootstrap");
            session.close().await;
            return Ok(RunOutcome {
                reason: StopReason::Cancelled,
                identity: None,
                summary: AcquisitionStats::new().summary(TransferCounters::default()),
            });
        }
    };

    let sink = match &config.output.raw_dump {
        Some(path) => match RawSink::create(path).await {
            Ok(sink) => Some(sink),
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "Cannot create raw dump file");
                session.close().await;
                return Err(err.into());
            }
        },
        None => None,
    };

    let mut engine = AcquisitionEngine::new(session, &info, config.acquisition.clone(), cancel);
    if let Some(sink) = sink {
        engine = engine.with_sink(sink);
    }

    let result = engine.run().await;
    let summary = engine.shutdown().await;

    match result {
        Ok(reason) => Ok(RunOutcome {
            reason,
            identity: Some(info.identity),
            summary,
        }),
        Err(err) => {
            tracing::error!(error = %err, "Acquisition aborted");
            tracing::info!("{summary}");
            Err(err)
        }
    }
}

async fn bootstrap_session<S>(session: &mut Session<S>, capacity: usize) -> AppResult<InstrumentInfo>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    bootstrap(session.client_mut()?, capacity).await
}
