use chrono::{Duration, Months, NaiveDate};
use sqlx::PgPool;
use tracing::info;

use crate::{
    error::{AppError, AppResult},
    models::{Bill, BillMetadata, BillType, Contract, NewBill, PaymentCycle},
    repository::{bills as bills_repo, contracts as contracts_repo, map_db_error},
    services::bill_calculation::round2,
};

/// Billable months of a term. Whole years count as 12 months each; shorter
/// terms round up to 30-day months; anything under 30 days is one month.
/// Both dates are inclusive.
pub fn term_months(start_date: NaiveDate, end_date: NaiveDate) -> u32 {
    let days = (end_date - start_date).num_days() + 1;
    if days >= 365 {
        (days / 365) as u32 * 12
    } else if days >= 30 {
        (days as u32).div_ceil(30)
    } else {
        1
    }
}

pub fn contract_total_rent(monthly_rent: f64, start_date: NaiveDate, end_date: NaiveDate) -> f64 {
    round2(monthly_rent * f64::from(term_months(start_date, end_date)))
}

/// Bills issued at signing: deposit (with key deposit), cleaning fee, then
/// one RENT bill per payment cycle. The RENT amounts add up to the
/// contract's term months times the monthly rent.
pub fn plan_contract_bills(contract: &Contract, cycle: PaymentCycle) -> Vec<NewBill> {
    let mut bills = Vec::new();

    let deposit_total = round2(contract.deposit + contract.key_deposit);
    if deposit_total > 0.0 {
        let mut bill = NewBill::pending(
            contract.id,
            BillType::Deposit,
            deposit_total,
            contract.start_date,
        );
        bill.remarks = Some(format!(
            "押金{:.2}元，钥匙押金{:.2}元",
            contract.deposit, contract.key_deposit
        ));
        bill.metadata = Some(BillMetadata::Deposit {
            deposit: contract.deposit,
            key_deposit: contract.key_deposit,
        });
        bills.push(bill);
    }

    if contract.cleaning_fee > 0.0 {
        let mut bill = NewBill::pending(
            contract.id,
            BillType::Other,
            contract.cleaning_fee,
            contract.start_date,
        );
        bill.remarks = Some("保洁费".to_string());
        bills.push(bill);
    }

    bills.extend(plan_rent_periods(contract, cycle));
    bills
}

fn plan_rent_periods(contract: &Contract, cycle: PaymentCycle) -> Vec<NewBill> {
    let term = term_months(contract.start_date, contract.end_date);
    let mut bills = Vec::new();
    let mut billed = 0u32;
    let mut period_start = contract.start_date;

    while billed < term && period_start <= contract.end_date {
        let mut months = cycle.months().min(term - billed);
        // Offsets are taken from the start date so month-end starts do not drift.
        let Some(next_start) = contract
            .start_date
            .checked_add_months(Months::new(billed + months))
        else {
            break;
        };
        if next_start > contract.end_date {
            months = term - billed;
        }
        let period_end = (next_start - Duration::days(1)).min(contract.end_date);

        let mut bill = NewBill::pending(
            contract.id,
            BillType::Rent,
            contract.monthly_rent * f64::from(months),
            period_start,
        );
        bill.period = Some(period_start.format("%Y-%m").to_string());
        bill.remarks = Some(format!("房租 {period_start} 至 {period_end}"));
        bill.metadata = Some(BillMetadata::RentPeriod {
            period_start,
            period_end,
            months,
            monthly_rent: contract.monthly_rent,
        });
        bills.push(bill);

        billed += months;
        period_start = next_start;
    }

    bills
}

/// Issues the signing bills for a contract. Runs in its own transaction and
/// is idempotent: a contract that already has RENT bills gets its existing
/// bills back unchanged.
pub async fn generate_contract_bills(
    pool: &PgPool,
    contract_id: uuid::Uuid,
    default_cycle: PaymentCycle,
) -> AppResult<Vec<Bill>> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let contract = contracts_repo::lock_contract(&mut tx, contract_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Contract not found.".to_string()))?;

    if bills_repo::count_bills_of_type(&mut tx, contract.id, BillType::Rent).await? > 0 {
        let existing = bills_repo::list_bills_for_contract(&mut tx, contract.id).await?;
        tx.commit().await.map_err(map_db_error)?;
        return Ok(existing);
    }

    let cycle = match contract.payment_timing.as_deref() {
        Some(raw) if !raw.trim().is_empty() => PaymentCycle::parse_lenient(Some(raw)),
        _ => default_cycle,
    };

    let mut created = Vec::new();
    for bill in plan_contract_bills(&contract, cycle) {
        created.push(bills_repo::insert_bill(&mut tx, &contract.contract_number, &bill).await?);
    }
    tx.commit().await.map_err(map_db_error)?;

    info!(
        contract_number = %contract.contract_number,
        bill_count = created.len(),
        cycle = cycle.as_str(),
        "Contract bills generated"
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use super::{contract_total_rent, plan_contract_bills, term_months};
    use crate::models::{BillMetadata, BillType, Contract, ContractStatus, PaymentCycle};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn contract(start: NaiveDate, end: NaiveDate, cleaning_fee: f64) -> Contract {
        Contract {
            id: Uuid::new_v4(),
            contract_number: "CT20260301000042".to_string(),
            room_id: Uuid::new_v4(),
            renter_id: Uuid::new_v4(),
            start_date: start,
            end_date: end,
            monthly_rent: 1500.0,
            total_rent: contract_total_rent(1500.0, start, end),
            deposit: 1500.0,
            key_deposit: 100.0,
            cleaning_fee,
            status: ContractStatus::Active,
            business_status: None,
            payment_method: None,
            payment_timing: None,
            signed_by: None,
            signed_date: None,
            renewed_from_id: None,
            remarks: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn term_month_heuristic() {
        assert_eq!(term_months(date(2026, 3, 1), date(2027, 2, 28)), 12);
        assert_eq!(term_months(date(2026, 3, 1), date(2028, 2, 29)), 24);
        assert_eq!(term_months(date(2026, 3, 1), date(2026, 4, 4)), 2);
        assert_eq!(term_months(date(2026, 3, 1), date(2026, 3, 10)), 1);
        assert_eq!(
            contract_total_rent(1500.0, date(2026, 3, 1), date(2027, 2, 28)),
            18000.0
        );
    }

    #[test]
    fn monthly_schedule_covers_the_term() {
        let contract = contract(date(2026, 3, 1), date(2027, 2, 28), 0.0);
        let bills = plan_contract_bills(&contract, PaymentCycle::Monthly);

        assert_eq!(bills.len(), 13);
        assert_eq!(bills[0].bill_type, BillType::Deposit);
        assert_eq!(bills[0].amount, 1600.0);

        let rent = bills
            .iter()
            .filter(|bill| bill.bill_type == BillType::Rent)
            .collect::<Vec<_>>();
        assert_eq!(rent.len(), 12);
        assert_eq!(rent.iter().map(|bill| bill.amount).sum::<f64>(), 18000.0);
        assert_eq!(rent[0].due_date, date(2026, 3, 1));
        assert_eq!(rent[11].due_date, date(2027, 2, 1));
        match &rent[11].metadata {
            Some(BillMetadata::RentPeriod { period_end, .. }) => {
                assert_eq!(*period_end, date(2027, 2, 28));
            }
            other => panic!("unexpected metadata: {other:?}"),
        }
    }

    #[test]
    fn quarterly_schedule_with_cleaning_fee() {
        let contract = contract(date(2026, 3, 1), date(2027, 2, 28), 200.0);
        let bills = plan_contract_bills(&contract, PaymentCycle::Quarterly);

        assert!(bills
            .iter()
            .any(|bill| bill.bill_type == BillType::Other && bill.amount == 200.0));
        let rent = bills
            .iter()
            .filter(|bill| bill.bill_type == BillType::Rent)
            .map(|bill| bill.amount)
            .collect::<Vec<_>>();
        assert_eq!(rent, vec![4500.0, 4500.0, 4500.0, 4500.0]);
    }

    #[test]
    fn last_period_takes_the_remaining_months() {
        // 35 days: two billable months, the second period is cut at the end date.
        let contract = contract(date(2026, 3, 1), date(2026, 4, 4), 0.0);
        let rent = plan_contract_bills(&contract, PaymentCycle::Quarterly)
            .into_iter()
            .filter(|bill| bill.bill_type == BillType::Rent)
            .collect::<Vec<_>>();

        assert_eq!(rent.len(), 1);
        assert_eq!(rent[0].amount, 3000.0);
    }
}
