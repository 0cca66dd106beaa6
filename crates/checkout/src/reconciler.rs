//! Reservation Reconciler: releases holds that outlived their deadline.
//!
//! Backstop for abandoned checkouts. Any pending order placed at or before
//! `now - reservation_hold` is compensated with reason `expired`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::CompensationReason;
use serde::Serialize;
use store::CheckoutStore;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use crate::error::{CheckoutError, Result};
use crate::lifecycle::OrderLifecycle;

/// Summary of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired pending orders found.
    pub examined: usize,
    pub released: usize,
    /// Orders settled by someone else between the scan and the release.
    pub skipped: usize,
    /// Orders whose release failed; retried on the next sweep.
    pub failed: usize,
}

pub struct Reconciler<S> {
    lifecycle: Arc<OrderLifecycle<S>>,
    interval: Duration,
}

impl<S: CheckoutStore> Reconciler<S> {
    pub fn new(lifecycle: Arc<OrderLifecycle<S>>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
        }
    }

    /// Releases every pending order whose hold elapsed by `now`.
    ///
    /// A failed release is logged and counted; it never stops the orders
    /// behind it from being released.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = self.lifecycle.config().hold_cutoff(now);
        let expired = self
            .lifecycle
            .store()
            .pending_orders_placed_before(cutoff)
            .await?;

        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };

        for order_id in expired {
            match self
                .lifecycle
                .compensate_with(order_id, CompensationReason::Expired, None)
                .await
            {
                Ok((_, true)) => {
                    metrics::counter!("reconciler_released_total").increment(1);
                    report.released += 1;
                }
                Ok((_, false)) => report.skipped += 1,
                // Paid while we were looking
                Err(CheckoutError::ConsistencyViolation(detail)) => {
                    tracing::info!(%order_id, %detail, "order settled concurrently, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    metrics::counter!("reconciler_failures_total").increment(1);
                    tracing::error!(%order_id, error = %e, "failed to release expired reservation");
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                released = report.released,
                skipped = report.skipped,
                failed = report.failed,
                "reservation sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweeps on a fixed interval until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.interval, "reconciler started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(self.lifecycle.now()).await {
                        tracing::warn!(error = %e, "reservation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("reconciler stopped");
    }
}
