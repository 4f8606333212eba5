use std::time::Duration;

use chrono::{NaiveDate, Timelike, Utc};
use sqlx::PgPool;
use tokio::time::sleep;

use crate::{
    error::AppResult,
    repository::{bills as bills_repo, map_db_error, property as property_repo},
    services::contract_lifecycle::refresh_contract_statuses,
    state::AppState,
};

/// Hour of the business day after which the daily jobs may run.
const DAILY_JOBS_HOUR: u32 = 1;

/// Spawn the background scheduler that runs the daily lease sweeps.
///
/// Each job runs in its own `tokio::spawn` so a failure in one job
/// never crashes the scheduler loop or other jobs.
pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("Background scheduler started");

    let pool = match state.db_pool.as_ref() {
        Some(p) => p.clone(),
        None => {
            tracing::warn!("Scheduler: no database pool configured, exiting");
            return;
        }
    };

    let timezone = state.config.business_timezone;
    let mut last_daily_run: Option<NaiveDate> = None;

    loop {
        let local_now = Utc::now().with_timezone(&timezone);
        let today = local_now.date_naive();

        if last_daily_run != Some(today) && local_now.hour() >= DAILY_JOBS_HOUR {
            last_daily_run = Some(today);
            tracing::info!("Scheduler: running daily jobs for {today}");

            // Contract status sweep, then overdue bookkeeping on the result.
            let pool = pool.clone();
            tokio::spawn(async move {
                match refresh_contract_statuses(&pool, today, timezone).await {
                    Ok(sweep) => tracing::info!(
                        expired = sweep.expired,
                        activated = sweep.activated,
                        skipped = sweep.skipped,
                        failed = sweep.failed,
                        "Scheduler: contract status sweep completed"
                    ),
                    Err(e) => {
                        tracing::warn!(error = %e, "Scheduler: contract status sweep failed");
                    }
                }

                match run_overdue_sweep(&pool, today).await {
                    Ok((bills, rooms)) => tracing::info!(
                        overdue_bills = bills,
                        rooms_refreshed = rooms,
                        "Scheduler: overdue sweep completed"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Scheduler: overdue sweep failed"),
                }
            });
        }

        sleep(Duration::from_secs(60)).await;
    }
}

/// Flags past-due bills OVERDUE and recomputes each room's overdue days.
pub async fn run_overdue_sweep(pool: &PgPool, today: NaiveDate) -> AppResult<(u64, u64)> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let bills = bills_repo::mark_overdue_bills(&mut tx, today).await?;
    let rooms = property_repo::refresh_overdue_days(&mut tx, today).await?;
    tx.commit().await.map_err(map_db_error)?;
    Ok((bills, rooms))
}
