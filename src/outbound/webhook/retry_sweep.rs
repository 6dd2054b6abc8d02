use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::domain::ports::{DeliveryStore, WorkQueue};
use crate::domain::{DeliveryError, DeliveryId, DeliveryRecord, StatusKind};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

/// What one sweep pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Due failed records flipped back to `pending` and enqueued.
    pub requeued: usize,

    /// Stale `pending` records enqueued again.
    pub recovered_pending: usize,

    /// Stale `retrying` records reconciled to `failed`.
    pub recovered_in_flight: usize,
}

/// Periodic scheduler of re-attempts.
///
/// This is the only place a failed delivery is re-enqueued from. Every state
/// flip is a conditional update, so overlapping sweeps or a concurrent manual
/// retry enqueue each record at most once.
pub struct RetrySweeper {
    deliveries: Arc<dyn DeliveryStore>,
    queue: Arc<dyn WorkQueue>,
    max_tries: u32,

    /// `pending` or `retrying` records untouched for this long are considered orphaned.
    stale_after: Duration,
}

impl RetrySweeper {
    pub fn new(deliveries: Arc<dyn DeliveryStore>, queue: Arc<dyn WorkQueue>, max_tries: u32) -> Self {
        Self {
            deliveries,
            queue,
            max_tries,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Run the sweep on a fixed interval until the task is aborted.
    pub fn start(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "Retry sweep starting");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.run_once(OffsetDateTime::now_utc()).await {
                    Ok(report) if report != SweepReport::default() => {
                        info!(
                            requeued = report.requeued,
                            recovered_pending = report.recovered_pending,
                            recovered_in_flight = report.recovered_in_flight,
                            "Retry sweep finished"
                        );
                    }
                    Ok(_) => debug!("Retry sweep found nothing to do"),
                    Err(e) => error!(error = %e, "Retry sweep failed"),
                }
            }
        })
    }

    /// One idempotent sweep pass: recover orphans, then requeue due retries.
    pub async fn run_once(&self, now: OffsetDateTime) -> Result<SweepReport, DeliveryError> {
        let mut report = SweepReport::default();

        let cutoff = now - self.stale_after;
        for record in self.deliveries.stale(cutoff).await? {
            match record.kind() {
                StatusKind::Pending => {
                    if self.recover_pending(record, now).await? {
                        report.recovered_pending += 1;
                    }
                }
                StatusKind::Retrying => {
                    if self.recover_in_flight(record, now).await? {
                        report.recovered_in_flight += 1;
                    }
                }
                StatusKind::Success | StatusKind::Failed => {}
            }
        }

        for record in self.deliveries.due_for_retry(now, self.max_tries).await? {
            let expected = record.precondition();
            let mut rearmed = record;
            if rearmed.rearm(now).is_err() {
                continue;
            }

            let delivery_id = rearmed.id;
            if self.deliveries.update_if(expected, rearmed).await? {
                debug!(delivery_id = %delivery_id, "Requeuing delivery for retry");
                self.enqueue(delivery_id).await;
                report.requeued += 1;
            }
        }

        Ok(report)
    }

    async fn recover_pending(
        &self,
        mut record: DeliveryRecord,
        now: OffsetDateTime,
    ) -> Result<bool, DeliveryError> {
        let expected = record.precondition();
        record.touch(now);

        let delivery_id = record.id;
        if !self.deliveries.update_if(expected, record).await? {
            return Ok(false);
        }

        warn!(delivery_id = %delivery_id, "Re-enqueuing orphaned pending delivery");
        self.enqueue(delivery_id).await;
        Ok(true)
    }

    /// A record stuck in `retrying` lost its worker; count the attempt as failed.
    async fn recover_in_flight(
        &self,
        mut record: DeliveryRecord,
        now: OffsetDateTime,
    ) -> Result<bool, DeliveryError> {
        let expected = record.precondition();
        let next_retry_at = (record.attempt_count < self.max_tries).then_some(now);

        if record
            .record_failure(
                None,
                "Attempt interrupted before completion".to_string(),
                next_retry_at,
                now,
            )
            .is_err()
        {
            return Ok(false);
        }

        let delivery_id = record.id;
        let applied = self.deliveries.update_if(expected, record).await?;
        if applied {
            warn!(
                delivery_id = %delivery_id,
                will_retry = next_retry_at.is_some(),
                "Recovered delivery stuck in flight"
            );
        }
        Ok(applied)
    }

    /// A failed enqueue leaves the record `pending`; the next sweep recovers it.
    async fn enqueue(&self, delivery_id: DeliveryId) {
        if let Err(e) = self.queue.enqueue(delivery_id, None).await {
            warn!(
                delivery_id = %delivery_id,
                lane = %self.queue.lane(),
                error = %e,
                "Failed to enqueue delivery"
            );
        }
    }
}
