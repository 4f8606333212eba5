use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::ReadingStatus,
    repository::{map_db_error, meters as meters_repo, meters::ReadingBillingState},
};

/// Correct billing flags for a reading, derived from whether any bill points at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingRepair {
    MarkBilled,
    MarkUnbilled,
}

/// `None` when `is_billed`, `status == BILLED` and the bill reference agree.
pub fn classify_reading(state: &ReadingBillingState) -> Option<ReadingRepair> {
    let status_billed = state.status == ReadingStatus::Billed;
    if state.has_bill_reference {
        (!state.is_billed || !status_billed).then_some(ReadingRepair::MarkBilled)
    } else {
        (state.is_billed || status_billed).then_some(ReadingRepair::MarkUnbilled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub dry_run: bool,
    pub checked: usize,
    pub inconsistent: usize,
    pub fixed: u64,
    /// Flagged billed, but no bill or bill detail references the reading.
    pub billed_without_reference: Vec<Uuid>,
    /// Referenced by a bill, but not flagged billed.
    pub referenced_but_unbilled: Vec<Uuid>,
}

pub fn plan_consistency_repair(states: &[ReadingBillingState], dry_run: bool) -> ConsistencyReport {
    let mut report = ConsistencyReport {
        dry_run,
        checked: states.len(),
        ..ConsistencyReport::default()
    };
    for state in states {
        match classify_reading(state) {
            Some(ReadingRepair::MarkBilled) => report.referenced_but_unbilled.push(state.id),
            Some(ReadingRepair::MarkUnbilled) => report.billed_without_reference.push(state.id),
            None => {}
        }
    }
    report.inconsistent =
        report.billed_without_reference.len() + report.referenced_but_unbilled.len();
    report
}

/// Re-derives every reading's billing flags from the bills that reference
/// it. With `dry_run` nothing is written and `fixed` stays 0.
pub async fn check_reading_bill_consistency(
    pool: &PgPool,
    dry_run: bool,
) -> AppResult<ConsistencyReport> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let states = meters_repo::list_reading_billing_states(&mut tx).await?;
    let mut report = plan_consistency_repair(&states, dry_run);

    if report.inconsistent > 0 {
        warn!(
            inconsistent = report.inconsistent,
            billed_without_reference = report.billed_without_reference.len(),
            referenced_but_unbilled = report.referenced_but_unbilled.len(),
            "Meter readings disagree with bill references"
        );
    }

    if !dry_run && report.inconsistent > 0 {
        report.fixed +=
            meters_repo::set_reading_billing_state(&mut tx, &report.referenced_but_unbilled, true)
                .await?;
        report.fixed +=
            meters_repo::set_reading_billing_state(&mut tx, &report.billed_without_reference, false)
                .await?;
        tx.commit().await.map_err(map_db_error)?;
        info!(fixed = report.fixed, "Meter reading billing flags repaired");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{classify_reading, plan_consistency_repair, ReadingRepair};
    use crate::{models::ReadingStatus, repository::meters::ReadingBillingState};

    fn state(status: ReadingStatus, is_billed: bool, has_bill_reference: bool) -> ReadingBillingState {
        ReadingBillingState {
            id: Uuid::new_v4(),
            status,
            is_billed,
            has_bill_reference,
        }
    }

    #[test]
    fn consistent_readings_need_nothing() {
        assert_eq!(classify_reading(&state(ReadingStatus::Billed, true, true)), None);
        assert_eq!(classify_reading(&state(ReadingStatus::Confirmed, false, false)), None);
        assert_eq!(classify_reading(&state(ReadingStatus::Pending, false, false)), None);
    }

    #[test]
    fn bill_reference_decides_the_flags() {
        assert_eq!(
            classify_reading(&state(ReadingStatus::Confirmed, false, true)),
            Some(ReadingRepair::MarkBilled)
        );
        assert_eq!(
            classify_reading(&state(ReadingStatus::Billed, false, true)),
            Some(ReadingRepair::MarkBilled)
        );
        assert_eq!(
            classify_reading(&state(ReadingStatus::Billed, true, false)),
            Some(ReadingRepair::MarkUnbilled)
        );
        assert_eq!(
            classify_reading(&state(ReadingStatus::Confirmed, true, false)),
            Some(ReadingRepair::MarkUnbilled)
        );
    }

    #[test]
    fn report_counts_each_direction() {
        let orphan = state(ReadingStatus::Billed, true, false);
        let unflagged = state(ReadingStatus::Confirmed, false, true);
        let states = vec![
            state(ReadingStatus::Billed, true, true),
            orphan.clone(),
            unflagged.clone(),
        ];

        let report = plan_consistency_repair(&states, true);
        assert!(report.dry_run);
        assert_eq!(report.checked, 3);
        assert_eq!(report.inconsistent, 2);
        assert_eq!(report.fixed, 0);
        assert_eq!(report.billed_without_reference, vec![orphan.id]);
        assert_eq!(report.referenced_but_unbilled, vec![unflagged.id]);
    }
}
