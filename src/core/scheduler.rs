//! Background sweeps over live reservations.
//!
//! - The claim-ready sweep tells students whose cancellation window has just
//!   closed that their items can be picked up. A reservation is marked before
//!   its email goes out, so overlapping or repeated runs notify it once.
//! - The auto-expire sweep expires reservations whose claim deadline has
//!   passed and returns their stock. Each reservation is expired in its own
//!   transaction; one failure does not stop the rest.
//!
//! Both sweeps read `now` from the context clock and can be driven directly
//! in tests. [`RepeatingTask`] runs them on a timer in the service.

use crate::{
    config::SchedulerSettings,
    core::{context::StoreContext, purchase, reservation as reservations},
    entities::{Reservation, ReservationStatus, reservation},
    errors::{Error, Result},
    notify::NoticeKind,
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, TransactionTrait, prelude::*, sea_query::Expr};
use std::{future::Future, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations that matched the sweep's query
    pub examined: usize,
    /// Reservations the sweep acted on
    pub processed: usize,
    /// Reservations another writer got to first
    pub skipped: usize,
    /// Reservations whose handling failed and was rolled back
    pub failed: usize,
}

/// Marks and notifies Pending reservations whose cancellation window closed
/// within the last `lookback`.
///
/// # Errors
/// Returns an error only if the candidate query fails; per-reservation
/// failures are counted in the report.
#[instrument(skip(ctx))]
pub async fn run_claim_ready_sweep(
    ctx: &StoreContext,
    lookback: chrono::Duration,
) -> Result<SweepReport> {
    let now = ctx.now();
    let since = now - lookback;

    let candidates: Vec<reservation::Model> = Reservation::find()
        .filter(reservation::Column::Status.eq(ReservationStatus::Pending))
        .filter(reservation::Column::ClaimNotifiedAt.is_null())
        .order_by_asc(reservation::Column::Id)
        .all(&ctx.db)
        .await?
        .into_iter()
        .filter(|r| r.cancel_window_expires >= since && r.cancel_window_expires <= now)
        .collect();

    let mut report = SweepReport {
        examined: candidates.len(),
        ..SweepReport::default()
    };

    for candidate in candidates {
        match mark_claim_ready(ctx, &candidate, now).await {
            Ok(true) => report.processed += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                error!(code = %candidate.code, error = %e, "Claim-ready notice failed");
                report.failed += 1;
            }
        }
    }

    if report.examined > 0 {
        info!(?report, "Claim-ready sweep finished");
    }
    Ok(report)
}

async fn mark_claim_ready(
    ctx: &StoreContext,
    candidate: &reservation::Model,
    now: DateTime<Utc>,
) -> Result<bool> {
    let marked = Reservation::update_many()
        .col_expr(reservation::Column::ClaimNotifiedAt, Expr::value(now))
        .filter(reservation::Column::Id.eq(candidate.id))
        .filter(reservation::Column::Status.eq(ReservationStatus::Pending))
        .filter(reservation::Column::ClaimNotifiedAt.is_null())
        .exec(&ctx.db)
        .await?;
    if marked.rows_affected == 0 {
        debug!(code = %candidate.code, "Already notified or no longer pending");
        return Ok(false);
    }

    let details = reservations::load_details(&ctx.db, candidate.clone()).await?;
    reservations::notify_student(
        ctx,
        NoticeKind::ClaimReady,
        &details,
        candidate.claim_deadline,
    )
    .await;
    Ok(true)
}

/// Expires every Pending or Approved reservation whose claim deadline is
/// strictly before now, returning its stock and rejecting its pending payments.
///
/// # Errors
/// Returns an error only if the candidate query fails; per-reservation
/// failures are counted in the report.
#[instrument(skip(ctx))]
pub async fn run_auto_expire_sweep(ctx: &StoreContext) -> Result<SweepReport> {
    let now = ctx.now();

    let candidates: Vec<reservation::Model> = Reservation::find()
        .filter(reservation::Column::Status.is_in(ReservationStatus::ACTIVE))
        .order_by_asc(reservation::Column::Id)
        .all(&ctx.db)
        .await?
        .into_iter()
        .filter(|r| r.claim_deadline.is_some_and(|deadline| deadline < now))
        .collect();

    let mut report = SweepReport {
        examined: candidates.len(),
        ..SweepReport::default()
    };

    for candidate in candidates {
        match expire_one(ctx, &candidate, now).await {
            Ok(true) => report.processed += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                error!(code = %candidate.code, error = %e, "Failed to expire reservation");
                report.failed += 1;
            }
        }
    }

    if report.examined > 0 {
        info!(?report, "Auto-expire sweep finished");
    }
    Ok(report)
}

async fn expire_one(
    ctx: &StoreContext,
    candidate: &reservation::Model,
    now: DateTime<Utc>,
) -> Result<bool> {
    let txn = ctx.db.begin().await?;
    match reservations::transition(
        &txn,
        candidate,
        &ReservationStatus::ACTIVE,
        ReservationStatus::Expired,
        "expire",
    )
    .await
    {
        Ok(()) => {}
        Err(Error::InvalidTransition { status, .. }) => {
            debug!(code = %candidate.code, %status, "Reservation moved on before expiry");
            return Ok(false);
        }
        Err(e) => return Err(e),
    }

    let reference = format!("Expired {}", candidate.code);
    let lines = reservations::release_lines(&txn, candidate, now, &reference).await?;
    let rejected = purchase::reject_pending_for_reservation(&txn, candidate.id).await?;
    txn.commit().await?;

    info!(
        code = %candidate.code,
        lines = lines.len(),
        rejected_payments = rejected,
        "Reservation expired"
    );
    Ok(true)
}

/// A job run on a fixed period until shutdown.
#[derive(Debug, Clone, Copy)]
pub struct RepeatingTask {
    name: &'static str,
    period: Duration,
}

impl RepeatingTask {
    /// Creates a task definition; nothing runs until [`RepeatingTask::spawn`].
    #[must_use]
    pub const fn new(name: &'static str, period: Duration) -> Self {
        Self { name, period }
    }

    /// Runs `job` now and then every period until `shutdown` turns true or
    /// its sender is dropped. Job errors are logged and the loop continues.
    pub fn spawn<F, Fut>(self, mut shutdown: watch::Receiver<bool>, mut job: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<SweepReport>> + Send + 'static,
    {
        tokio::spawn(async move {
            info!(task = self.name, period_secs = self.period.as_secs(), "Background task started");
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = job().await {
                            warn!(task = self.name, error = %e, "Background task run failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(task = self.name, "Background task stopped");
        })
    }
}

/// Starts both sweeps. The claim-ready lookback equals its period so
/// consecutive runs cover time without gaps.
pub fn spawn_sweeps(
    ctx: &StoreContext,
    settings: &SchedulerSettings,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let claim_period = Duration::from_secs(settings.claim_ready_interval_secs.max(1));
    let expire_period = Duration::from_secs(settings.auto_expire_interval_secs.max(1));
    let lookback = chrono::Duration::from_std(claim_period).unwrap_or(chrono::Duration::minutes(5));

    let claim_ctx = ctx.clone();
    let claim_ready = RepeatingTask::new("claim_ready", claim_period).spawn(shutdown.clone(), move || {
        let ctx = claim_ctx.clone();
        async move { run_claim_ready_sweep(&ctx, lookback).await }
    });

    let expire_ctx = ctx.clone();
    let auto_expire = RepeatingTask::new("auto_expire", expire_period).spawn(shutdown.clone(), move || {
        let ctx = expire_ctx.clone();
        async move { run_auto_expire_sweep(&ctx).await }
    });

    vec![claim_ready, auto_expire]
}
