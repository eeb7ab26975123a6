//! Per-order accrual reconciliation.
//!
//! An [`OrderReconciler`] drives one order from registration to a terminal
//! scoring result:
//!
//! ```text
//! every poll_interval:
//!   fetch ──► 200 REGISTERED          keep polling (order stays NEW)
//!         ├─► 200 PROCESSING          persist PROCESSING, keep polling
//!         ├─► 200 PROCESSED/INVALID   write terminal result once, stop
//!         ├─► 429                     sleep rate_limit_backoff, resume
//!         ├─► 204                     keep polling, up to max_unknown_polls in a row
//!         └─► error / malformed       log, retry on next tick
//! ```
//!
//! Every suspension point (tick, request, backoff) races the shared
//! cancellation token; a cancelled task exits without writing anything.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use loyalty_core::{OrderNumber, OrderOutcome, OrderStatus};

use crate::scoring::{AccrualStatus, ScoringClient, ScoringReply};
use crate::store::LedgerStore;

/// Reconciler timing and give-up policy.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay between two scoring requests for the same order.
    pub poll_interval: Duration,
    /// Pause after a 429 when the service sends no usable `Retry-After`.
    pub rate_limit_backoff: Duration,
    /// Consecutive 204 responses tolerated before the task gives up and
    /// leaves the order to the next startup recovery pass. `None` never gives up.
    pub max_unknown_polls: Option<u32>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            rate_limit_backoff: Duration::from_secs(60),
            max_unknown_polls: Some(30),
        }
    }
}

/// Why a reconciliation task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileExit {
    /// The terminal result was written.
    Completed(OrderOutcome),
    /// The order was already terminal (or gone); nothing was written.
    AlreadyTerminal,
    /// The process is shutting down.
    Cancelled,
    /// The scoring service kept answering 204.
    UnknownToScoring,
    /// The terminal write failed; recovery is left to the next startup.
    StoreFailed,
}

/// Drives single orders to a terminal state. Shared by all tasks.
pub struct OrderReconciler {
    store: Arc<dyn LedgerStore>,
    client: Arc<dyn ScoringClient>,
    config: ReconcilerConfig,
}

impl OrderReconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        client: Arc<dyn ScoringClient>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    /// Poll the scoring service for `number` until a terminal result is
    /// written, the task is cancelled, or the 204 budget runs out.
    pub async fn run(&self, number: OrderNumber, cancel: CancellationToken) -> ReconcileExit {
        debug!(order = %number, "reconciliation started");
        let exit = self.poll_until_done(&number, &cancel).await;
        debug!(order = %number, exit = ?exit, "reconciliation finished");
        exit
    }

    async fn poll_until_done(&self, number: &OrderNumber, cancel: &CancellationToken) -> ReconcileExit {
        let period = self.config.poll_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut unknown_streak = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return ReconcileExit::Cancelled,
                _ = ticker.tick() => {}
            }

            // Dropping the request future on cancellation aborts it.
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return ReconcileExit::Cancelled,
                r = self.client.fetch(number) => r,
            };

            let reply = match fetched {
                Ok(response) => response.classify(number),
                Err(e) => {
                    warn!(order = %number, error = %e, "scoring request failed");
                    continue;
                }
            };

            if !matches!(reply, ScoringReply::Unknown) {
                unknown_streak = 0;
            }

            match reply {
                ScoringReply::Report(report) => {
                    if let Some(outcome) = report.outcome() {
                        return self.finish(number, outcome).await;
                    }
                    if report.status == AccrualStatus::Processing {
                        self.persist_in_flight(number).await;
                    }
                }
                ScoringReply::RateLimited { retry_after } => {
                    let pause = retry_after.unwrap_or(self.config.rate_limit_backoff);
                    warn!(order = %number, pause_secs = pause.as_secs(), "scoring service rate limited");
                    tokio::select! {
                        _ = cancel.cancelled() => return ReconcileExit::Cancelled,
                        _ = time::sleep(pause) => {}
                    }
                }
                ScoringReply::Unknown => {
                    unknown_streak += 1;
                    debug!(order = %number, streak = unknown_streak, "order unknown to scoring service");
                    if self
                        .config
                        .max_unknown_polls
                        .is_some_and(|max| unknown_streak >= max)
                    {
                        info!(
                            order = %number,
                            "scoring service does not know the order; leaving it for recovery"
                        );
                        return ReconcileExit::UnknownToScoring;
                    }
                }
                ScoringReply::Malformed(reason) => {
                    warn!(order = %number, reason = %reason, "malformed scoring payload");
                }
                ScoringReply::Unexpected(status) => {
                    warn!(order = %number, status = %status, "unexpected scoring status");
                }
            }
        }
    }

    async fn persist_in_flight(&self, number: &OrderNumber) {
        if let Err(e) = self.store.mark_in_flight(number, OrderStatus::Processing).await {
            warn!(order = %number, error = %e, "failed to persist in-flight status");
        }
    }

    async fn finish(&self, number: &OrderNumber, outcome: OrderOutcome) -> ReconcileExit {
        match self.store.complete_order(number, outcome).await {
            Ok(true) => {
                info!(
                    order = %number,
                    status = %outcome.status(),
                    accrual = ?outcome.accrual(),
                    "order reconciled"
                );
                ReconcileExit::Completed(outcome)
            }
            Ok(false) => {
                debug!(order = %number, "order already terminal");
                ReconcileExit::AlreadyTerminal
            }
            Err(e) => {
                error!(order = %number, error = %e, "failed to write terminal order state");
                ReconcileExit::StoreFailed
            }
        }
    }
}
