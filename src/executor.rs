use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{DeliveryMode, HarvestSettings, PartialFailurePolicy};
use crate::harvest::flatten::RecordFlattener;
use crate::harvest::pipeline::{
    HarvestStats, HarvestStatus, PaginationDriver, PausePolicy, StopReason, Transition,
};
use crate::harvest::traits::HarvestFormat;
use crate::harvest::transport::BackoffPolicy;
use crate::model::{FlatRow, HarvestRequest};
use crate::traits::{Sink, SinkError, SinkReport, Transport, TransportError};

/// How a run ended, from the caller's point of view.
#[derive(Debug)]
pub enum RunStatus {
    /// All pages harvested and every row delivered.
    Completed(StopReason),

    /// Stopped by the cancellation token.
    Cancelled,

    /// The transport failed; `partial_flushed` says whether rows gathered
    /// before the failure reached the sink. `sink_error` is set when flushing
    /// them was attempted and refused.
    HarvestFailed {
        error: TransportError,
        partial_flushed: bool,
        sink_error: Option<SinkError>,
    },

    /// The sink refused rows. They are still in [`RunResult::rows`].
    SinkFailed { error: SinkError },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed(_))
    }
}

#[derive(Debug)]
pub struct RunResult {
    /// Rows harvested (delivered or not)
    pub row_count: usize,
    pub status: RunStatus,
    pub stats: HarvestStats,
    pub rows: Vec<FlatRow>,
    /// What the sink acknowledged
    pub report: SinkReport,
}

impl RunResult {
    /// Rows the sink has not acknowledged yet.
    pub fn undelivered(&self) -> &[FlatRow] {
        let delivered = self.report.rows_written.min(self.rows.len());
        &self.rows[delivered..]
    }
}

/// Runs one harvest end to end: builds the driver for a harvest kind, pages
/// through the API and hands the rows to a sink.
pub struct HarvestExecutor {
    on_failure: PartialFailurePolicy,
    delivery: DeliveryMode,
    backoff: BackoffPolicy,
    pause: PausePolicy,
    cancel: CancellationToken,
}

impl HarvestExecutor {
    /// The partial-failure policy has no default and must be chosen here.
    pub fn new(on_failure: PartialFailurePolicy) -> Self {
        Self {
            on_failure,
            delivery: DeliveryMode::Batch,
            backoff: BackoffPolicy::default(),
            pause: PausePolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_settings(settings: &HarvestSettings) -> Self {
        Self::new(settings.on_failure)
            .with_delivery(settings.delivery)
            .with_backoff(settings.backoff.policy())
            .with_pause(settings.pause_policy())
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_pause(mut self, pause: PausePolicy) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run between pages or during a wait.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Builds a driver for `format` and runs it against `sink`.
    #[instrument(skip_all, fields(kind = format.name(), endpoint = %request.endpoint))]
    pub async fn run<T, S>(
        &self,
        request: HarvestRequest,
        format: &dyn HarvestFormat,
        transport: T,
        sink: &mut S,
    ) -> RunResult
    where
        T: Transport,
        S: Sink + ?Sized,
    {
        info!(
            start = %request.date_range.start,
            end = %request.date_range.end,
            sink = sink.name(),
            "Starting harvest"
        );

        let driver = PaginationDriver::new(
            transport,
            request,
            RecordFlattener::new(format.flatten_spec()),
        )
        .with_advance(format.offset_advance())
        .with_continuation(format.continuation());

        self.drive(driver, sink).await
    }

    /// Runs an already configured driver. The executor's backoff, pause and
    /// cancellation settings replace the driver's.
    pub async fn drive<T, S>(&self, driver: PaginationDriver<T>, sink: &mut S) -> RunResult
    where
        T: Transport,
        S: Sink + ?Sized,
    {
        let driver = driver
            .with_backoff(self.backoff.clone())
            .with_pause(self.pause)
            .with_cancellation(self.cancel.clone());

        let result = match self.delivery {
            DeliveryMode::Batch => self.run_batch(&driver, sink).await,
            DeliveryMode::Streaming => self.run_streaming(&driver, sink).await,
        };

        match &result.status {
            RunStatus::Completed(reason) => info!(
                reason = %reason,
                rows = result.row_count,
                written = result.report.rows_written,
                "Harvest completed"
            ),
            RunStatus::Cancelled => warn!(rows = result.row_count, "Harvest cancelled"),
            RunStatus::HarvestFailed {
                error,
                partial_flushed,
                sink_error,
            } => error!(
                error = %error,
                rows = result.row_count,
                partial_flushed,
                sink_error = sink_error.as_ref().map(tracing::field::display),
                "Harvest failed"
            ),
            RunStatus::SinkFailed { error } => error!(
                error = %error,
                rows = result.row_count,
                "Sink rejected rows, kept in memory for redelivery"
            ),
        }
        result
    }

    /// Writes the rows a previous run could not deliver, without fetching
    /// anything again.
    pub async fn redeliver<S>(
        &self,
        result: &mut RunResult,
        sink: &mut S,
    ) -> Result<SinkReport, SinkError>
    where
        S: Sink + ?Sized,
    {
        let pending = result.undelivered();
        if pending.is_empty() {
            return Ok(SinkReport::default());
        }
        let report = sink.write(pending).await?;
        result.report.merge(report);
        info!(rows = report.rows_written, sink = sink.name(), "Redelivered rows");
        Ok(report)
    }

    // ========================================================================
    // Delivery modes
    // ========================================================================

    async fn run_batch<T, S>(&self, driver: &PaginationDriver<T>, sink: &mut S) -> RunResult
    where
        T: Transport,
        S: Sink + ?Sized,
    {
        let outcome = driver.run().await;
        let mut report = SinkReport::default();

        let status = match outcome.status {
            HarvestStatus::Completed(reason) => {
                if outcome.rows.is_empty() {
                    info!("No rows harvested, sink not called");
                    RunStatus::Completed(reason)
                } else {
                    match sink.write(&outcome.rows).await {
                        Ok(written) => {
                            report = written;
                            RunStatus::Completed(reason)
                        }
                        Err(error) => RunStatus::SinkFailed { error },
                    }
                }
            }
            HarvestStatus::Cancelled => RunStatus::Cancelled,
            HarvestStatus::Failed(error) => {
                let flushed = match self.on_failure {
                    PartialFailurePolicy::FlushPartial if !outcome.rows.is_empty() => {
                        Some(sink.write(&outcome.rows).await)
                    }
                    _ => None,
                };
                let (partial_flushed, sink_error) = match flushed {
                    Some(Ok(written)) => {
                        report = written;
                        (true, None)
                    }
                    Some(Err(sink_error)) => (false, Some(sink_error)),
                    None => (false, None),
                };
                RunStatus::HarvestFailed {
                    error,
                    partial_flushed,
                    sink_error,
                }
            }
        };

        RunResult {
            row_count: outcome.rows.len(),
            status,
            stats: outcome.stats,
            rows: outcome.rows,
            report,
        }
    }

    async fn run_streaming<T, S>(&self, driver: &PaginationDriver<T>, sink: &mut S) -> RunResult
    where
        T: Transport,
        S: Sink + ?Sized,
    {
        let mut state = driver.start();
        let mut report = SinkReport::default();

        let ended: Result<HarvestStatus, SinkError> = loop {
            let transition = driver.step(&mut state).await;

            // A failed fetch adds no rows, so only finished pages are pending
            // here. Under Discard nothing more is written after a failure.
            let discard = matches!(
                (&transition, self.on_failure),
                (
                    Transition::Stop(HarvestStatus::Failed(_)),
                    PartialFailurePolicy::Discard
                )
            );
            if !discard && !state.undelivered().is_empty() {
                match sink.write(state.undelivered()).await {
                    Ok(written) => {
                        report.merge(written);
                        state.mark_delivered();
                    }
                    Err(error) => break Err(error),
                }
            }

            if let Transition::Stop(status) = transition {
                break Ok(status);
            }
        };

        let status = match ended {
            Ok(HarvestStatus::Completed(reason)) => RunStatus::Completed(reason),
            Ok(HarvestStatus::Cancelled) => RunStatus::Cancelled,
            Ok(HarvestStatus::Failed(error)) => RunStatus::HarvestFailed {
                error,
                partial_flushed: report.rows_written > 0,
                sink_error: None,
            },
            Err(error) => RunStatus::SinkFailed { error },
        };
        let (rows, stats) = state.close();

        RunResult {
            row_count: rows.len(),
            status,
            stats,
            rows,
            report,
        }
    }
}
