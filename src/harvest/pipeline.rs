//! Offset/cursor pagination driver.
//!
//! This module provides the [`PaginationDriver`] that walks one harvest run
//! page by page:
//!
//! ```text
//! FETCHING → PROCESSING → CONTINUE ─┐
//!    ▲                    PAUSING ──┤
//!    └──────────────────────────────┘
//!                         DONE | FAILED | CANCELLED
//! ```
//!
//! - Rate limits are absorbed by [`RateLimitedTransport`]
//! - Records are deduplicated per run by [`DeduplicationTracker`]
//! - Admitted records are expanded by [`RecordFlattener`]
//! - A [`CancellationToken`] is checked before every fetch and races every wait

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::harvest::dedup::DeduplicationTracker;
use crate::harvest::flatten::RecordFlattener;
use crate::harvest::transport::{BackoffPolicy, RateLimitedTransport};
use crate::model::{FlatRow, HarvestRequest, NextPage, Page};
use crate::traits::{Transport, TransportError};

// ============================================================================
// Pagination Policies
// ============================================================================

/// How the next page position is derived from the page just processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetAdvance {
    /// Always move by the same step, whatever the server returned.
    Fixed(u64),

    /// Prefer the server's `nextOffset` (an offset ahead of the current one,
    /// or a new cursor), then `offset + limit`, then `offset + fallback`.
    ServerReported { fallback: u64 },
}

impl OffsetAdvance {
    /// `None` when the position cannot move: a cursor page without a new
    /// cursor has no offset to step from.
    pub fn next(&self, current: &NextPage, page: &Page) -> Option<NextPage> {
        match *self {
            OffsetAdvance::Fixed(step) => current
                .offset()
                .map(|offset| NextPage::Offset(offset + step.max(1))),
            OffsetAdvance::ServerReported { fallback } => {
                let reported = page.next_page.as_ref().filter(|&next| match (next, current) {
                    (NextPage::Offset(next), NextPage::Offset(offset)) => next > offset,
                    _ => next != current,
                });
                match reported {
                    Some(next) => Some(next.clone()),
                    None => current.offset().map(|offset| {
                        let step = page.limit.filter(|l| *l > 0).unwrap_or(fallback.max(1));
                        NextPage::Offset(offset + step)
                    }),
                }
            }
        }
    }
}

/// Which response field says whether another page exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationSignal {
    /// `hasMore`; anything but an explicit `true` ends the run.
    HasMoreFlag,

    /// `numResults`; zero or absent ends the run.
    ResultCount,
}

/// Periodic cool-down independent of 429 handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PausePolicy {
    /// Requests since the last pause that trigger a new one (0 disables).
    pub after_requests: u32,

    pub interval: Duration,
}

impl Default for PausePolicy {
    fn default() -> Self {
        Self {
            after_requests: 60,
            interval: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Why a run ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Response had no `data` list (or could not be decoded).
    MissingData,
    /// `data` was an empty list.
    EmptyPage,
    /// `hasMore` was not `true`.
    NoMorePages,
    /// `numResults` was zero or missing.
    NoResults,
    /// The API served an entity already seen in this run.
    Overlap,
    /// A cursor page gave no new cursor.
    Stalled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StopReason::MissingData => "missing data",
            StopReason::EmptyPage => "empty page",
            StopReason::NoMorePages => "no more pages",
            StopReason::NoResults => "no results",
            StopReason::Overlap => "overlapping page",
            StopReason::Stalled => "no next cursor",
        };
        f.write_str(label)
    }
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum HarvestStatus {
    Completed(StopReason),
    Failed(TransportError),
    Cancelled,
}

impl HarvestStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, HarvestStatus::Completed(_))
    }
}

/// Result of one [`PaginationDriver::step`].
#[derive(Debug)]
pub enum Transition {
    Continue,
    Stop(HarvestStatus),
}

/// Counters collected over one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestStats {
    /// Pages successfully fetched
    pub pages: usize,

    /// Records read from pages (including duplicates)
    pub records_seen: usize,

    /// Records admitted by the deduplication tracker
    pub records_admitted: usize,

    /// Repeated records skipped inside a page
    pub duplicates_skipped: usize,

    /// Rows produced by the flattener
    pub rows: usize,

    /// 429 responses absorbed by backoff
    pub rate_limited: u32,

    /// Periodic pauses taken
    pub pauses: u32,

    /// Wall-clock duration of the run (milliseconds)
    pub total_duration_ms: u64,
}

/// Mutable state of one run. Owned by the caller of
/// [`PaginationDriver::step`] and never shared.
#[derive(Debug)]
pub struct HarvestState {
    position: NextPage,
    request_count: u32,
    tracker: DeduplicationTracker,
    rows: Vec<FlatRow>,
    delivered: usize,
    stats: HarvestStats,
    started: Instant,
}

impl HarvestState {
    fn new() -> Self {
        Self {
            position: NextPage::default(),
            request_count: 0,
            tracker: DeduplicationTracker::new(),
            rows: Vec::new(),
            delivered: 0,
            stats: HarvestStats::default(),
            started: Instant::now(),
        }
    }

    /// Position of the next page to fetch.
    pub fn position(&self) -> &NextPage {
        &self.position
    }

    pub fn rows(&self) -> &[FlatRow] {
        &self.rows
    }

    pub fn stats(&self) -> &HarvestStats {
        &self.stats
    }

    pub fn tracker(&self) -> &DeduplicationTracker {
        &self.tracker
    }

    /// Rows accumulated since the last [`mark_delivered`](Self::mark_delivered).
    pub fn undelivered(&self) -> &[FlatRow] {
        &self.rows[self.delivered..]
    }

    pub fn mark_delivered(&mut self) {
        self.delivered = self.rows.len();
    }

    /// Ends the run, handing back the rows and final counters.
    pub fn close(mut self) -> (Vec<FlatRow>, HarvestStats) {
        self.stats.rows = self.rows.len();
        self.stats.total_duration_ms = self.started.elapsed().as_millis() as u64;
        (self.rows, self.stats)
    }

    pub fn finish(self, status: HarvestStatus) -> HarvestOutcome {
        let (rows, stats) = self.close();
        HarvestOutcome {
            rows,
            stats,
            status,
        }
    }
}

/// Everything a finished run hands back: the rows gathered so far (even on
/// failure), the counters, and how it ended.
#[derive(Debug)]
pub struct HarvestOutcome {
    pub rows: Vec<FlatRow>,
    pub stats: HarvestStats,
    pub status: HarvestStatus,
}

// ============================================================================
// Pagination Driver
// ============================================================================

/// Pages through one [`HarvestRequest`] until the data runs out, the API
/// starts repeating itself, a fatal error occurs, or the run is cancelled.
///
/// # Example
///
/// ```ignore
/// let driver = PaginationDriver::new(transport, request, flattener)
///     .with_backoff(BackoffPolicy::fixed(Duration::from_secs(60)))
///     .with_pause(PausePolicy::default());
///
/// let outcome = driver.run().await;
/// println!("{} rows ({:?})", outcome.rows.len(), outcome.status);
/// ```
pub struct PaginationDriver<T> {
    transport: RateLimitedTransport<T>,
    request: HarvestRequest,
    flattener: RecordFlattener,
    advance: OffsetAdvance,
    continuation: ContinuationSignal,
    pause: PausePolicy,
    cancel: CancellationToken,
}

impl<T: Transport> PaginationDriver<T> {
    /// Creates a driver with default policies:
    /// - Backoff: [`BackoffPolicy::default`]
    /// - Advance: server-reported, falling back to the page size (or 50)
    /// - Continuation: `hasMore`
    /// - Pause: 60 s after every 60 requests
    pub fn new(transport: T, request: HarvestRequest, flattener: RecordFlattener) -> Self {
        let fallback = request.page_size.unwrap_or(50);
        Self {
            transport: RateLimitedTransport::new(transport, BackoffPolicy::default()),
            request,
            flattener,
            advance: OffsetAdvance::ServerReported { fallback },
            continuation: ContinuationSignal::HasMoreFlag,
            pause: PausePolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.transport = self.transport.with_backoff(backoff);
        self
    }

    pub fn with_advance(mut self, advance: OffsetAdvance) -> Self {
        self.advance = advance;
        self
    }

    pub fn with_continuation(mut self, continuation: ContinuationSignal) -> Self {
        self.continuation = continuation;
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

    pub fn request(&self) -> &HarvestRequest {
        &self.request
    }

    /// Fresh state for a new run: offset 0, empty seen-set.
    pub fn start(&self) -> HarvestState {
        HarvestState::new()
    }

    /// Runs the state machine to a terminal state.
    pub async fn run(&self) -> HarvestOutcome {
        let mut state = self.start();
        let status = loop {
            if let Transition::Stop(status) = self.step(&mut state).await {
                break status;
            }
        };

        let outcome = state.finish(status);
        match &outcome.status {
            HarvestStatus::Completed(reason) => info!(
                reason = %reason,
                pages = outcome.stats.pages,
                rows = outcome.rows.len(),
                "Harvest finished"
            ),
            HarvestStatus::Failed(e) => warn!(
                error = %e,
                pages = outcome.stats.pages,
                rows = outcome.rows.len(),
                "Harvest failed, partial rows kept"
            ),
            HarvestStatus::Cancelled => info!(rows = outcome.rows.len(), "Harvest cancelled"),
        }
        outcome
    }

    /// Fetches and processes one page, then decides whether to continue.
    pub async fn step(&self, state: &mut HarvestState) -> Transition {
        // ====================================================================
        // FETCHING
        // ====================================================================

        if self.cancel.is_cancelled() {
            return Transition::Stop(HarvestStatus::Cancelled);
        }

        let request = self.request.page_request(&state.position);
        debug!(position = %state.position, url = %request.url, "Fetching page");

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Transition::Stop(HarvestStatus::Cancelled),
            result = self.transport.send(&request) => result,
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => return Transition::Stop(HarvestStatus::Failed(e)),
        };
        state.stats.pages += 1;
        state.stats.rate_limited += fetched.rate_limited;
        let page = fetched.page;

        // ====================================================================
        // PROCESSING
        // ====================================================================

        let Some(records) = page.records.as_ref() else {
            return Transition::Stop(HarvestStatus::Completed(StopReason::MissingData));
        };
        if records.is_empty() {
            return Transition::Stop(HarvestStatus::Completed(StopReason::EmptyPage));
        }

        let rows_before = state.rows.len();
        for (index, record) in records.iter().enumerate() {
            state.stats.records_seen += 1;

            match self.flattener.entity_id(record) {
                Some(id) if !state.tracker.admit(&id) => {
                    if index == 0 {
                        info!(
                            entity_id = %id,
                            position = %state.position,
                            "First record of page already seen, stopping"
                        );
                        return Transition::Stop(HarvestStatus::Completed(StopReason::Overlap));
                    }
                    debug!(entity_id = %id, "Skipping repeated entity");
                    state.stats.duplicates_skipped += 1;
                    continue;
                }
                Some(_) => {}
                None => debug!(
                    field = %self.flattener.spec().entity_id,
                    "Record has no entity id, admitting untracked"
                ),
            }

            state.stats.records_admitted += 1;
            state.rows.extend(self.flattener.flatten(record));
        }

        info!(
            position = %state.position,
            records = records.len(),
            rows = state.rows.len() - rows_before,
            total_rows = state.rows.len(),
            "Processed page"
        );

        // ====================================================================
        // Termination
        // ====================================================================

        match self.continuation {
            ContinuationSignal::HasMoreFlag if page.has_more != Some(true) => {
                return Transition::Stop(HarvestStatus::Completed(StopReason::NoMorePages));
            }
            ContinuationSignal::ResultCount if page.num_results.unwrap_or(0) == 0 => {
                return Transition::Stop(HarvestStatus::Completed(StopReason::NoResults));
            }
            _ => {}
        }

        if state.tracker.is_exhausted() {
            info!(position = %state.position, "Page repeated earlier entities, stopping");
            return Transition::Stop(HarvestStatus::Completed(StopReason::Overlap));
        }

        // ====================================================================
        // CONTINUE / PAUSING
        // ====================================================================

        match self.advance.next(&state.position, &page) {
            Some(next) => state.position = next,
            None => {
                info!(position = %state.position, "No next page position, stopping");
                return Transition::Stop(HarvestStatus::Completed(StopReason::Stalled));
            }
        }
        state.request_count += 1;

        if self.pause.after_requests > 0 && state.request_count >= self.pause.after_requests {
            info!(
                requests = state.request_count,
                pause_ms = self.pause.interval.as_millis() as u64,
                "Request budget reached, pausing"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Transition::Stop(HarvestStatus::Cancelled),
                _ = tokio::time::sleep(self.pause.interval) => {}
            }
            state.request_count = 0;
            state.stats.pauses += 1;
        }

        Transition::Continue
    }
}

// ============================================================================
// Tests
// ============================================================================
