//! Turns confirmed meter readings into UTILITIES bills, either one bill per
//! reading or one aggregated bill per contract with a detail row per reading.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Bill, BillDetail, BillMetadata, BillType, MeterType, NewBill, NewBillDetail, PriceSource,
        ReadingStatus, UtilityBreakdownItem,
    },
    repository::{
        bills as bills_repo, contracts as contracts_repo, map_db_error,
        meters::{self as meters_repo, ReadingRecord},
    },
    services::bill_calculation::round2,
};

/// A reading that passed grouping: it belongs to a contract and a known meter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillableReading {
    pub meter_reading_id: Uuid,
    pub meter_id: Uuid,
    pub contract_id: Uuid,
    pub meter_type: MeterType,
    pub meter_name: String,
    pub unit: String,
    pub usage: f64,
    pub unit_price: f64,
    pub amount: f64,
    pub previous_reading: f64,
    pub current_reading: f64,
    pub reading_date: NaiveDate,
    pub period: Option<String>,
    pub price_source: PriceSource,
}

impl BillableReading {
    fn from_record(record: ReadingRecord) -> Option<Self> {
        let Some(contract_id) = record.contract_id else {
            warn!(meter_reading_id = %record.id, "Skipping reading without a contract");
            return None;
        };
        let Some(meter_type) = record.meter_type else {
            warn!(meter_reading_id = %record.id, "Skipping reading without a meter");
            return None;
        };

        let mut amount = round2(record.amount);
        if amount == 0.0 && record.usage > 0.0 && record.unit_price > 0.0 {
            amount = round2(record.usage * record.unit_price);
        }
        let price_source = if record.meter_unit_price.is_some_and(|price| price > 0.0) {
            PriceSource::MeterConfig
        } else {
            PriceSource::GlobalSetting
        };

        Some(Self {
            meter_reading_id: record.id,
            meter_id: record.meter_id,
            contract_id,
            meter_type,
            meter_name: record
                .meter_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| meter_type.display_name().to_string()),
            unit: record
                .meter_unit
                .filter(|unit| !unit.trim().is_empty())
                .unwrap_or_else(|| meter_type.default_unit().to_string()),
            usage: record.usage,
            unit_price: record.unit_price,
            amount,
            previous_reading: record.previous_reading,
            current_reading: record.current_reading,
            reading_date: record.reading_date,
            period: record.period,
            price_source,
        })
    }

    fn period_label(&self) -> String {
        self.period
            .clone()
            .unwrap_or_else(|| self.reading_date.format("%Y-%m").to_string())
    }

    fn breakdown_item(&self) -> UtilityBreakdownItem {
        UtilityBreakdownItem {
            meter_reading_id: self.meter_reading_id,
            meter_id: self.meter_id,
            meter_type: self.meter_type,
            meter_name: self.meter_name.clone(),
            usage: self.usage,
            unit: self.unit.clone(),
            unit_price: self.unit_price,
            amount: self.amount,
            price_source: self.price_source,
            previous_reading: self.previous_reading,
            current_reading: self.current_reading,
            reading_date: self.reading_date,
        }
    }

    fn detail(&self) -> NewBillDetail {
        NewBillDetail {
            meter_reading_id: self.meter_reading_id,
            meter_type: self.meter_type,
            meter_name: self.meter_name.clone(),
            usage: self.usage,
            unit_price: self.unit_price,
            amount: self.amount,
            previous_reading: self.previous_reading,
            current_reading: self.current_reading,
            reading_date: self.reading_date,
            price_source: self.price_source,
        }
    }
}

/// Buckets readings by contract. Readings missing either link are dropped
/// and logged, never billed.
pub fn group_readings_by_contract(
    records: impl IntoIterator<Item = ReadingRecord>,
) -> BTreeMap<Uuid, Vec<BillableReading>> {
    let mut groups: BTreeMap<Uuid, Vec<BillableReading>> = BTreeMap::new();
    for reading in records.into_iter().filter_map(BillableReading::from_record) {
        groups.entry(reading.contract_id).or_default().push(reading);
    }
    groups
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationStrategy {
    Single,
    Aggregated,
}

impl FromStr for AggregationStrategy {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SINGLE" => Ok(Self::Single),
            "AGGREGATED" => Ok(Self::Aggregated),
            _ => Err(AppError::BadRequest(format!(
                "Unknown aggregation strategy '{}'. Use SINGLE or AGGREGATED.",
                raw.trim()
            ))),
        }
    }
}

/// An explicit choice wins; otherwise readings from more than one meter are aggregated.
pub fn select_aggregation_strategy(
    readings: &[BillableReading],
    requested: Option<AggregationStrategy>,
) -> AggregationStrategy {
    if let Some(strategy) = requested {
        return strategy;
    }
    let meters = readings
        .iter()
        .map(|reading| reading.meter_id)
        .collect::<HashSet<_>>();
    if meters.len() > 1 {
        AggregationStrategy::Aggregated
    } else {
        AggregationStrategy::Single
    }
}

#[derive(Debug, Clone)]
pub struct UtilityBillingOptions {
    pub due_days: i64,
    pub operator: Option<String>,
}

fn single_remark(reading: &BillableReading) -> String {
    format!(
        "{}账单 - {:.2}元({}{})",
        reading.meter_type.display_name(),
        reading.amount,
        reading.usage,
        reading.unit
    )
}

fn aggregated_remark(readings: &[BillableReading]) -> String {
    let parts = readings
        .iter()
        .map(|reading| {
            format!(
                "{}{:.2}元({}{})",
                reading.meter_type.display_name(),
                reading.amount,
                reading.usage,
                reading.unit
            )
        })
        .collect::<Vec<_>>();
    format!("水电费账单 - {}", parts.join("，"))
}

fn breakdown_metadata(readings: &[BillableReading]) -> BillMetadata {
    BillMetadata::UtilitiesBreakdown {
        items: readings.iter().map(BillableReading::breakdown_item).collect(),
        meter_count: readings
            .iter()
            .map(|reading| reading.meter_id)
            .collect::<HashSet<_>>()
            .len(),
        total_usage: round2(readings.iter().map(|reading| reading.usage).sum()),
        total_amount: round2(readings.iter().map(|reading| reading.amount).sum()),
    }
}

/// One bill for one reading, linked back through `meter_reading_id`.
pub fn plan_single_bill(reading: &BillableReading, options: &UtilityBillingOptions) -> NewBill {
    let mut bill = NewBill::pending(
        reading.contract_id,
        BillType::Utilities,
        reading.amount,
        reading.reading_date + Duration::days(options.due_days),
    );
    bill.period = Some(reading.period_label());
    bill.meter_reading_id = Some(reading.meter_reading_id);
    bill.operator = options.operator.clone();
    bill.remarks = Some(single_remark(reading));
    bill.metadata = Some(breakdown_metadata(std::slice::from_ref(reading)));
    bill
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBillPlan {
    pub bill: NewBill,
    pub details: Vec<NewBillDetail>,
}

impl AggregatedBillPlan {
    pub fn reading_ids(&self) -> Vec<Uuid> {
        self.details
            .iter()
            .map(|detail| detail.meter_reading_id)
            .collect()
    }
}

/// One bill for all readings of a contract; its amount is the sum of the
/// detail amounts and it falls due after the first reading's date. `None`
/// when there is nothing to bill.
pub fn plan_aggregated_bill(
    readings: &[BillableReading],
    options: &UtilityBillingOptions,
) -> Option<AggregatedBillPlan> {
    let first = readings.first()?;
    let total = round2(readings.iter().map(|reading| reading.amount).sum());

    let mut bill = NewBill::pending(
        first.contract_id,
        BillType::Utilities,
        total,
        first.reading_date + Duration::days(options.due_days),
    );
    bill.period = Some(first.period_label());
    bill.operator = options.operator.clone();
    bill.remarks = Some(aggregated_remark(readings));
    bill.metadata = Some(breakdown_metadata(readings));

    Some(AggregatedBillPlan {
        bill,
        details: readings.iter().map(BillableReading::detail).collect(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedUtilityBill {
    pub bill: Bill,
    pub details: Vec<BillDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractUtilityBills {
    pub contract_id: Uuid,
    pub contract_number: String,
    pub strategy: AggregationStrategy,
    pub bills: Vec<GeneratedUtilityBill>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UtilityBillingRun {
    pub contracts: Vec<ContractUtilityBills>,
    pub billed_reading_ids: Vec<Uuid>,
    pub skipped_reading_ids: Vec<Uuid>,
}

/// Bills the given readings in one transaction. Already-billed, cancelled or
/// unlinked readings are reported as skipped. Any failure rolls back every
/// bill, detail and status flip of the run.
pub async fn generate_utility_bills(
    pool: &PgPool,
    reading_ids: &[Uuid],
    requested: Option<AggregationStrategy>,
    options: &UtilityBillingOptions,
) -> AppResult<UtilityBillingRun> {
    if reading_ids.is_empty() {
        return Err(AppError::BadRequest("No meter readings selected.".to_string()));
    }

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let records = meters_repo::lock_reading_records(&mut tx, reading_ids).await?;
    if records.is_empty() {
        return Err(AppError::NotFound("Meter readings not found.".to_string()));
    }

    let mut skipped = Vec::new();
    let billable = records
        .into_iter()
        .filter(|record| {
            let open = !record.is_billed
                && matches!(record.status, ReadingStatus::Pending | ReadingStatus::Confirmed);
            if !open {
                warn!(meter_reading_id = %record.id, status = ?record.status, "Reading already billed or cancelled");
            }
            open
        })
        .collect::<Vec<_>>();
    let known = billable.iter().map(|record| record.id).collect::<HashSet<_>>();
    skipped.extend(reading_ids.iter().copied().filter(|id| !known.contains(id)));

    let groups = group_readings_by_contract(billable);
    let grouped = groups
        .values()
        .flatten()
        .map(|reading| reading.meter_reading_id)
        .collect::<HashSet<_>>();
    skipped.extend(known.iter().copied().filter(|id| !grouped.contains(id)));

    let mut contracts = Vec::with_capacity(groups.len());
    let mut billed = Vec::new();

    for (contract_id, readings) in groups {
        let Some(contract) = contracts_repo::get_contract(&mut tx, contract_id).await? else {
            warn!(contract_id = %contract_id, "Skipping readings of an unknown contract");
            skipped.extend(readings.iter().map(|reading| reading.meter_reading_id));
            continue;
        };

        let strategy = select_aggregation_strategy(&readings, requested);
        let mut bills = Vec::new();

        match strategy {
            AggregationStrategy::Single => {
                for reading in &readings {
                    let bill = bills_repo::insert_bill(
                        &mut tx,
                        &contract.contract_number,
                        &plan_single_bill(reading, options),
                    )
                    .await?;
                    flip_to_billed(&mut tx, &[reading.meter_reading_id]).await?;
                    billed.push(reading.meter_reading_id);
                    bills.push(GeneratedUtilityBill {
                        bill,
                        details: Vec::new(),
                    });
                }
            }
            AggregationStrategy::Aggregated => {
                let Some(plan) = plan_aggregated_bill(&readings, options) else {
                    continue;
                };
                let bill =
                    bills_repo::insert_bill(&mut tx, &contract.contract_number, &plan.bill).await?;
                let mut details = Vec::with_capacity(plan.details.len());
                for detail in &plan.details {
                    details.push(bills_repo::insert_bill_detail(&mut tx, bill.id, detail).await?);
                }
                let ids = plan.reading_ids();
                flip_to_billed(&mut tx, &ids).await?;
                billed.extend(ids);
                bills.push(GeneratedUtilityBill { bill, details });
            }
        }

        info!(
            contract_number = %contract.contract_number,
            strategy = ?strategy,
            bill_count = bills.len(),
            "Utility bills generated"
        );
        contracts.push(ContractUtilityBills {
            contract_id,
            contract_number: contract.contract_number,
            strategy,
            bills,
        });
    }

    tx.commit().await.map_err(map_db_error)?;

    Ok(UtilityBillingRun {
        contracts,
        billed_reading_ids: billed,
        skipped_reading_ids: skipped,
    })
}

async fn flip_to_billed(conn: &mut sqlx::PgConnection, reading_ids: &[Uuid]) -> AppResult<()> {
    let flipped = meters_repo::mark_readings_billed(conn, reading_ids).await?;
    ensure_all_flipped(reading_ids.len(), flipped)
}

/// Every reading of a bill must flip to BILLED; a short count aborts the run
/// so the caller's transaction rolls back.
fn ensure_all_flipped(expected: usize, flipped: u64) -> AppResult<()> {
    if flipped != expected as u64 {
        return Err(AppError::Conflict(
            "Meter readings changed while billing; nothing was billed.".to_string(),
        ));
    }
    Ok(())
}
