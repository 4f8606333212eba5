//! Contract signing, renewal, checkout and the date-driven status sweep.
//!
//! Each transactional operation is split into pure checks and plans, which
//! carry the business rules, and an executor that loads rows under lock,
//! runs the plan and writes everything in one transaction.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        contract::{
            BUSINESS_STATUS_AWAITING_MOVE_IN, BUSINESS_STATUS_CHECKED_OUT, BUSINESS_STATUS_EXPIRED,
            BUSINESS_STATUS_SIGNED,
        },
        Bill, BillMetadata, BillStatus, BillType, Contract, ContractStatus, Meter, MeterReading,
        MeterType, NewBill, NewContract, NewMeterReading, PaymentCycle, ReadingStatus, Renter,
        Room, RoomStatus,
    },
    repository::{
        bills as bills_repo, contracts as contracts_repo, map_db_error, meters as meters_repo,
        property as property_repo,
    },
    services::{
        bill_calculation::resolve_meter_price,
        meter_validation::{calculate_amount, calculate_usage, MAX_READING_VALUE},
        remarks::append_remark,
        rent_schedule::{contract_total_rent, generate_contract_bills},
        settings::BillingSettings,
        settlement::{
            apply_line_overrides, build_detailed_settlement, calculate_checkout_settlement,
            CheckoutSettlement, ContractSnapshot, DetailedSettlement, LineOverride, SettlementType,
        },
    },
    state::AppState,
};

/// Financial and signing terms shared by new contracts and renewals.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractTerms {
    pub room_id: Uuid,
    pub renter_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_rent: f64,
    pub deposit: f64,
    pub key_deposit: f64,
    pub cleaning_fee: f64,
    pub payment_method: Option<String>,
    pub payment_timing: Option<String>,
    pub signed_by: Option<String>,
    pub signed_date: Option<NaiveDate>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateContractRequest {
    pub terms: ContractTerms,
    pub generate_bills: bool,
    /// Baseline readings keyed by meter id or meter type.
    pub meter_readings: BTreeMap<String, f64>,
    pub operator: Option<String>,
}

pub fn validate_contract_terms(terms: &ContractTerms) -> AppResult<()> {
    if terms.end_date <= terms.start_date {
        return Err(AppError::BadRequest(
            "结束日期必须晚于开始日期".to_string(),
        ));
    }
    if !terms.monthly_rent.is_finite() || terms.monthly_rent <= 0.0 {
        return Err(AppError::BadRequest("月租金必须大于0".to_string()));
    }
    for (label, amount) in [
        ("押金", terms.deposit),
        ("钥匙押金", terms.key_deposit),
        ("保洁费", terms.cleaning_fee),
    ] {
        if !amount.is_finite() || amount < 0.0 {
            return Err(AppError::BadRequest(format!("{label}不能为负数")));
        }
    }
    Ok(())
}

/// What else currently holds the room and the renter, read inside the
/// signing transaction.
#[derive(Debug, Clone, Copy)]
pub struct Occupancy<'a> {
    pub room: &'a Room,
    pub room_active: Option<&'a Contract>,
    pub room_pending: Option<&'a Contract>,
    pub renter_active: Option<&'a Contract>,
}

/// Room must be vacant and the renter free of other active contracts. A
/// renewal of the same room and renter may sign while its source contract
/// still occupies the room.
pub fn check_availability(
    terms: &ContractTerms,
    occupancy: Occupancy<'_>,
    renewal_of: Option<&Contract>,
) -> AppResult<()> {
    let same_pair = renewal_of.filter(|source| {
        source.room_id == terms.room_id && source.renter_id == terms.renter_id
    });

    if let Some(source) = renewal_of {
        ensure_renewable(source)?;
        if terms.start_date <= source.end_date {
            return Err(AppError::BadRequest(format!(
                "续约开始日期必须晚于原合同结束日期{}",
                source.end_date
            )));
        }
    }

    let held_by_source = match (same_pair, occupancy.room_active) {
        (Some(source), Some(active)) => active.id == source.id,
        _ => false,
    };
    if occupancy.room.status != RoomStatus::Vacant && !held_by_source {
        return Err(AppError::Conflict(format!(
            "房间不可用，当前状态：{}",
            occupancy.room.status.as_str()
        )));
    }
    if let Some(active) = occupancy.room_active.filter(|_| !held_by_source) {
        return Err(AppError::Conflict(format!(
            "房间已有生效中的合同：{}",
            active.contract_number
        )));
    }
    if let Some(pending) = occupancy.room_pending {
        return Err(AppError::Conflict(format!(
            "房间在该时间段已有待生效合同：{}",
            pending.contract_number
        )));
    }
    if let Some(active) = occupancy.renter_active {
        return Err(AppError::Conflict(format!(
            "租客已有生效中的合同：{}",
            active.contract_number
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractPlan {
    pub contract: NewContract,
    pub occupy_room: bool,
    /// Active source of a renewal that has already run past its end date and
    /// must expire before the renewal can become active.
    pub expire_source: Option<Uuid>,
}

pub fn plan_new_contract(
    terms: &ContractTerms,
    renewal_of: Option<&Contract>,
    today: NaiveDate,
    now: DateTime<Utc>,
    timezone: Tz,
) -> ContractPlan {
    let status = ContractStatus::initial_for(terms.start_date, today);
    let business_status = match status {
        ContractStatus::Pending => BUSINESS_STATUS_AWAITING_MOVE_IN,
        _ => BUSINESS_STATUS_SIGNED,
    };

    let mut remarks = None;
    if let Some(source) = renewal_of {
        remarks = Some(append_remark(
            None,
            now,
            timezone,
            &format!("续约自合同{}", source.contract_number),
        ));
    }
    if let Some(text) = terms.remarks.as_deref().filter(|text| !text.trim().is_empty()) {
        remarks = Some(append_remark(remarks.as_deref(), now, timezone, text));
    }

    let expire_source = renewal_of
        .filter(|source| source.status == ContractStatus::Active && status == ContractStatus::Active)
        .map(|source| source.id);

    ContractPlan {
        contract: NewContract {
            room_id: terms.room_id,
            renter_id: terms.renter_id,
            start_date: terms.start_date,
            end_date: terms.end_date,
            monthly_rent: terms.monthly_rent,
            total_rent: contract_total_rent(terms.monthly_rent, terms.start_date, terms.end_date),
            deposit: terms.deposit,
            key_deposit: terms.key_deposit,
            cleaning_fee: terms.cleaning_fee,
            status,
            business_status: business_status.to_string(),
            payment_method: terms.payment_method.clone(),
            payment_timing: terms.payment_timing.clone(),
            signed_by: terms.signed_by.clone(),
            signed_date: terms.signed_date.or(Some(today)),
            renewed_from_id: renewal_of.map(|source| source.id),
            remarks,
        },
        occupy_room: status == ContractStatus::Active,
        expire_source,
    }
}

/// Maps supplied reading keys (meter id or meter type) onto the room's
/// active meters. Unknown keys and out-of-range values are rejected.
pub fn resolve_reading_targets<'a>(
    meters: &'a [Meter],
    readings: &BTreeMap<String, f64>,
) -> AppResult<Vec<(&'a Meter, f64)>> {
    let active = meters.iter().filter(|meter| meter.is_active).collect::<Vec<_>>();
    let mut targets: Vec<(&Meter, f64)> = Vec::with_capacity(readings.len());

    for (key, value) in readings {
        let meter = match Uuid::parse_str(key.trim()) {
            Ok(meter_id) => active.iter().find(|meter| meter.id == meter_id).copied(),
            Err(_) => MeterType::parse(key)
                .and_then(|meter_type| active.iter().find(|meter| meter.meter_type == meter_type))
                .copied(),
        }
        .ok_or_else(|| AppError::BadRequest(format!("未找到仪表：{key}")))?;

        if !value.is_finite() || *value < 0.0 || *value > MAX_READING_VALUE {
            return Err(AppError::BadRequest(format!(
                "{}读数必须在0到{MAX_READING_VALUE}之间",
                meter.display_name
            )));
        }
        if targets.iter().any(|(existing, _)| existing.id == meter.id) {
            return Err(AppError::BadRequest(format!(
                "{}重复提交读数",
                meter.display_name
            )));
        }
        targets.push((meter, *value));
    }

    Ok(targets)
}

/// Move-in baseline: usage 0, so nothing is billed for it.
pub fn plan_baseline_reading(
    meter: &Meter,
    value: f64,
    contract_id: Uuid,
    reading_date: NaiveDate,
    settings: &BillingSettings,
    operator: Option<String>,
) -> NewMeterReading {
    NewMeterReading {
        meter_id: meter.id,
        contract_id: Some(contract_id),
        previous_reading: value,
        current_reading: value,
        usage: 0.0,
        unit_price: resolve_meter_price(meter, settings).unit_price,
        amount: 0.0,
        reading_date,
        period: Some("入住".to_string()),
        status: ReadingStatus::Confirmed,
        operator,
        remarks: Some("入住初始读数".to_string()),
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingState {
    Skipped,
    Generated,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractCreated {
    pub contract: Contract,
    pub bills: Vec<Bill>,
    pub billing: BillingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_message: Option<String>,
    pub baseline_readings: Vec<MeterReading>,
}

pub async fn create_contract(
    state: &AppState,
    request: CreateContractRequest,
) -> AppResult<ContractCreated> {
    sign_contract(state, request, None).await
}

async fn sign_contract(
    state: &AppState,
    request: CreateContractRequest,
    renewal_of: Option<Uuid>,
) -> AppResult<ContractCreated> {
    validate_contract_terms(&request.terms)?;
    let pool = state.db_pool()?.clone();
    let settings = state.settings.get_billing_settings().await;
    let limit = StdDuration::from_secs(state.config.contract_tx_timeout_seconds);

    let write = write_contract(
        &pool,
        &request,
        renewal_of,
        &settings,
        state.config.today(),
        state.config.business_timezone,
    );
    let (contract, baseline_readings) = match tokio::time::timeout(limit, write).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(
                room_id = %request.terms.room_id,
                timeout_seconds = limit.as_secs(),
                "Contract creation timed out and was rolled back"
            );
            return Err(AppError::Dependency(
                "合同创建超时，请稍后重试".to_string(),
            ));
        }
    };

    info!(
        contract_number = %contract.contract_number,
        status = contract.status.as_str(),
        renewal = renewal_of.is_some(),
        "Contract signed"
    );

    if !request.generate_bills {
        return Ok(ContractCreated {
            contract,
            bills: Vec::new(),
            billing: BillingState::Skipped,
            billing_message: None,
            baseline_readings,
        });
    }

    let (bills, billing, billing_message) = generate_bills_time_boxed(
        pool,
        contract.id,
        settings.default_rent_cycle,
        StdDuration::from_millis(state.config.bill_generation_timeout_ms),
    )
    .await;

    Ok(ContractCreated {
        contract,
        bills,
        billing,
        billing_message,
        baseline_readings,
    })
}

async fn write_contract(
    pool: &PgPool,
    request: &CreateContractRequest,
    renewal_of: Option<Uuid>,
    settings: &BillingSettings,
    today: NaiveDate,
    timezone: Tz,
) -> AppResult<(Contract, Vec<MeterReading>)> {
    let terms = &request.terms;
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    // Lock order everywhere: contract, room, renter.
    let source = match renewal_of {
        Some(source_id) => Some(
            contracts_repo::lock_contract(&mut tx, source_id)
                .await?
                .ok_or_else(|| AppError::NotFound("原合同不存在".to_string()))?,
        ),
        None => None,
    };
    let room = property_repo::lock_room(&mut tx, terms.room_id)
        .await?
        .ok_or_else(|| AppError::NotFound("房间不存在".to_string()))?;
    let renter = property_repo::lock_renter(&mut tx, terms.renter_id)
        .await?
        .ok_or_else(|| AppError::NotFound("租客不存在".to_string()))?;

    let room_active = contracts_repo::find_active_contract_for_room(&mut tx, room.id, None).await?;
    let room_pending = contracts_repo::find_overlapping_pending_contract(
        &mut tx,
        room.id,
        terms.start_date,
        terms.end_date,
    )
    .await?;
    let renter_active = contracts_repo::find_active_contract_for_renter(
        &mut tx,
        renter.id,
        source.as_ref().map(|source| source.id),
    )
    .await?;

    check_availability(
        terms,
        Occupancy {
            room: &room,
            room_active: room_active.as_ref(),
            room_pending: room_pending.as_ref(),
            renter_active: renter_active.as_ref(),
        },
        source.as_ref(),
    )?;

    let plan = plan_new_contract(terms, source.as_ref(), today, Utc::now(), timezone);

    if let Some(source_id) = plan.expire_source {
        let source_remarks = source.as_ref().and_then(|source| source.remarks.as_deref());
        expire_contract_row(&mut tx, source_id, source_remarks, timezone).await?;
    }

    let contract = contracts_repo::insert_contract(&mut tx, &plan.contract).await?;
    if plan.occupy_room {
        property_repo::occupy_room(&mut tx, room.id, &renter.name).await?;
        property_repo::record_move_in(&mut tx, renter.id, contract.start_date).await?;
    }

    let mut baseline_readings = Vec::new();
    if !request.meter_readings.is_empty() {
        let meters = meters_repo::list_room_meters(&mut tx, room.id).await?;
        for (meter, value) in resolve_reading_targets(&meters, &request.meter_readings)? {
            let reading = plan_baseline_reading(
                meter,
                value,
                contract.id,
                contract.start_date.min(today),
                settings,
                request.operator.clone(),
            );
            baseline_readings.push(meters_repo::insert_reading(&mut tx, &reading).await?);
        }
    }

    tx.commit().await.map_err(map_db_error)?;
    Ok((contract, baseline_readings))
}

/// Runs signing bill generation on its own task and waits at most `limit`.
/// A slow run keeps going in the background and is reported as pending.
async fn generate_bills_time_boxed(
    pool: PgPool,
    contract_id: Uuid,
    default_cycle: PaymentCycle,
    limit: StdDuration,
) -> (Vec<Bill>, BillingState, Option<String>) {
    let mut handle = tokio::spawn(async move {
        let result = generate_contract_bills(&pool, contract_id, default_cycle).await;
        if let Err(error) = &result {
            warn!(contract_id = %contract_id, error = %error, "Contract bill generation failed");
        }
        result
    });

    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(Ok(bills))) => (bills, BillingState::Generated, None),
        Ok(Ok(Err(error))) => (
            Vec::new(),
            BillingState::Failed,
            Some(format!("账单生成失败，可稍后重试：{error}")),
        ),
        Ok(Err(join_error)) => {
            error!(contract_id = %contract_id, error = %join_error, "Bill generation task aborted");
            (
                Vec::new(),
                BillingState::Failed,
                Some("账单生成失败，可稍后重试".to_string()),
            )
        }
        Err(_) => {
            info!(contract_id = %contract_id, "Bill generation continues in the background");
            (
                Vec::new(),
                BillingState::Pending,
                Some("账单正在后台生成".to_string()),
            )
        }
    }
}

/// Re-runs signing bill generation for a contract; a no-op when its bills exist.
pub async fn regenerate_contract_bills(state: &AppState, contract_id: Uuid) -> AppResult<Vec<Bill>> {
    let pool = state.db_pool()?;
    let settings = state.settings.get_billing_settings().await;
    generate_contract_bills(pool, contract_id, settings.default_rent_cycle).await
}

#[derive(Debug, Clone, Serialize)]
pub struct RenewalDefaults {
    pub source_contract_id: Uuid,
    pub source_contract_number: String,
    pub room_id: Uuid,
    pub renter_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_rent: f64,
    pub total_rent: f64,
    pub deposit: f64,
    pub key_deposit: f64,
    pub cleaning_fee: f64,
    pub payment_method: Option<String>,
    pub payment_timing: Option<String>,
}

/// Renewals run from the day after the source ends, for one year.
pub fn renewal_defaults(source: &Contract) -> RenewalDefaults {
    let start_date = source.end_date + Duration::days(1);
    let end_date = start_date
        .checked_add_months(Months::new(12))
        .map(|date| date - Duration::days(1))
        .unwrap_or(start_date + Duration::days(364));

    RenewalDefaults {
        source_contract_id: source.id,
        source_contract_number: source.contract_number.clone(),
        room_id: source.room_id,
        renter_id: source.renter_id,
        start_date,
        end_date,
        monthly_rent: source.monthly_rent,
        total_rent: contract_total_rent(source.monthly_rent, start_date, end_date),
        deposit: source.deposit,
        key_deposit: source.key_deposit,
        cleaning_fee: source.cleaning_fee,
        payment_method: source.payment_method.clone(),
        payment_timing: source.payment_timing.clone(),
    }
}

pub fn ensure_renewable(source: &Contract) -> AppResult<()> {
    match source.status {
        ContractStatus::Active | ContractStatus::Expired => Ok(()),
        status => Err(AppError::Conflict(format!(
            "合同状态不允许续约，当前状态：{}",
            status.as_str()
        ))),
    }
}

/// Operator edits on top of the renewal defaults; `None` keeps the default.
#[derive(Debug, Clone, Default)]
pub struct RenewContractRequest {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub monthly_rent: Option<f64>,
    pub deposit: Option<f64>,
    pub key_deposit: Option<f64>,
    pub cleaning_fee: Option<f64>,
    pub payment_method: Option<String>,
    pub payment_timing: Option<String>,
    pub signed_by: Option<String>,
    pub signed_date: Option<NaiveDate>,
    pub remarks: Option<String>,
    pub generate_bills: bool,
    pub operator: Option<String>,
}

pub fn renewal_terms(defaults: &RenewalDefaults, request: &RenewContractRequest) -> ContractTerms {
    ContractTerms {
        room_id: defaults.room_id,
        renter_id: defaults.renter_id,
        start_date: request.start_date.unwrap_or(defaults.start_date),
        end_date: request.end_date.unwrap_or(defaults.end_date),
        monthly_rent: request.monthly_rent.unwrap_or(defaults.monthly_rent),
        deposit: request.deposit.unwrap_or(defaults.deposit),
        key_deposit: request.key_deposit.unwrap_or(defaults.key_deposit),
        cleaning_fee: request.cleaning_fee.unwrap_or(defaults.cleaning_fee),
        payment_method: request
            .payment_method
            .clone()
            .or_else(|| defaults.payment_method.clone()),
        payment_timing: request
            .payment_timing
            .clone()
            .or_else(|| defaults.payment_timing.clone()),
        signed_by: request.signed_by.clone(),
        signed_date: request.signed_date,
        remarks: request.remarks.clone(),
    }
}

pub async fn get_renewal_defaults(state: &AppState, contract_id: Uuid) -> AppResult<RenewalDefaults> {
    let pool = state.db_pool()?;
    let mut conn = pool.acquire().await.map_err(map_db_error)?;
    let source = contracts_repo::get_contract(&mut conn, contract_id)
        .await?
        .ok_or_else(|| AppError::NotFound("合同不存在".to_string()))?;
    ensure_renewable(&source)?;
    Ok(renewal_defaults(&source))
}

/// Signs a fresh contract for the source's room and renter. The source row
/// is left to expire on its own end date.
pub async fn renew_contract(
    state: &AppState,
    contract_id: Uuid,
    request: RenewContractRequest,
) -> AppResult<ContractCreated> {
    let defaults = get_renewal_defaults(state, contract_id).await?;
    let create = CreateContractRequest {
        terms: renewal_terms(&defaults, &request),
        generate_bills: request.generate_bills,
        meter_readings: BTreeMap::new(),
        operator: request.operator,
    };
    sign_contract(state, create, Some(contract_id)).await
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub checkout_date: NaiveDate,
    pub checkout_reason: Option<String>,
    pub damage_assessment: f64,
    /// Final readings keyed by meter id or meter type.
    pub final_meter_readings: BTreeMap<String, f64>,
    pub remarks: Option<String>,
    pub operator: Option<String>,
}

pub fn validate_checkout(
    contract: &Contract,
    request: &CheckoutRequest,
    today: NaiveDate,
) -> AppResult<()> {
    if contract.status != ContractStatus::Active {
        return Err(AppError::Conflict(format!(
            "合同状态不允许退房，当前状态：{}",
            contract.status.as_str()
        )));
    }
    if request.checkout_date < today {
        return Err(AppError::BadRequest("退房日期不能早于今天".to_string()));
    }
    if request.checkout_date > contract.end_date {
        return Err(AppError::Conflict(format!(
            "退房日期不能晚于合同结束日期{}",
            contract.end_date
        )));
    }
    if !request.damage_assessment.is_finite() || request.damage_assessment < 0.0 {
        return Err(AppError::BadRequest(
            "损坏赔偿金额不能为负数".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalReadingPlan {
    pub meter: Meter,
    pub reading: NewMeterReading,
}

/// Final readings at checkout, measured against each meter's latest reading.
pub fn plan_final_readings(
    contract: &Contract,
    meters: &[Meter],
    latest_readings: &HashMap<Uuid, f64>,
    request: &CheckoutRequest,
    settings: &BillingSettings,
) -> AppResult<Vec<FinalReadingPlan>> {
    let targets = resolve_reading_targets(meters, &request.final_meter_readings)?;
    Ok(targets
        .into_iter()
        .map(|(meter, value)| {
            let previous = latest_readings.get(&meter.id).copied();
            let usage = calculate_usage(value, previous);
            let unit_price = resolve_meter_price(meter, settings).unit_price;
            FinalReadingPlan {
                meter: meter.clone(),
                reading: NewMeterReading {
                    meter_id: meter.id,
                    contract_id: Some(contract.id),
                    previous_reading: previous.unwrap_or(value),
                    current_reading: value,
                    usage,
                    unit_price,
                    amount: calculate_amount(usage, unit_price),
                    reading_date: request.checkout_date,
                    period: Some("退房".to_string()),
                    status: ReadingStatus::Confirmed,
                    operator: request.operator.clone(),
                    remarks: Some("退房读数".to_string()),
                },
            }
        })
        .collect())
}

/// Already-paid UTILITIES bill for a final reading; none when nothing was used.
pub fn final_reading_bill(
    reading: &MeterReading,
    meter: &Meter,
    checkout_date: NaiveDate,
    operator: Option<String>,
) -> Option<NewBill> {
    let contract_id = reading.contract_id?;
    if reading.usage <= 0.0 {
        return None;
    }
    let mut bill = NewBill::pending(contract_id, BillType::Utilities, reading.amount, checkout_date)
        .settled(BillStatus::Paid, checkout_date);
    bill.period = Some("退房".to_string());
    bill.meter_reading_id = Some(reading.id);
    bill.operator = operator;
    bill.remarks = Some(format!(
        "退房{}费用 - {:.2}元({}{})",
        meter.display_name, reading.amount, reading.usage, meter.unit
    ));
    bill.metadata = Some(BillMetadata::FinalReading {
        meter_reading_id: reading.id,
        meter_type: meter.meter_type,
        usage: reading.usage,
        unit_price: reading.unit_price,
    });
    Some(bill)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutPlan {
    pub settlement: CheckoutSettlement,
    /// Signed OTHER bill for the net settlement, booked as completed.
    pub settlement_bill: Option<NewBill>,
    pub contract_remarks: String,
    pub renter_remarks: String,
}

pub fn plan_checkout(
    contract: &Contract,
    renter: &Renter,
    request: &CheckoutRequest,
    now: DateTime<Utc>,
    timezone: Tz,
) -> CheckoutPlan {
    let settlement = calculate_checkout_settlement(
        &ContractSnapshot::from(contract),
        request.checkout_date,
        request.damage_assessment,
        None,
    );

    let net = settlement.net_amount();
    let settlement_bill = (net != 0.0).then(|| {
        let mut bill = NewBill::pending(contract.id, BillType::Other, net, request.checkout_date)
            .settled(BillStatus::Completed, request.checkout_date);
        bill.period = Some("退房结算".to_string());
        bill.operator = request.operator.clone();
        bill.remarks = Some(settlement.description.clone());
        bill.metadata = Some(BillMetadata::Settlement(settlement.clone()));
        bill
    });

    let outcome = match settlement.settlement_type {
        SettlementType::Refund => format!("退还{:.2}元", settlement.refund_amount),
        SettlementType::Charge => format!("补缴{:.2}元", settlement.additional_amount),
        SettlementType::Balanced => "无需结算".to_string(),
    };
    let reason = request
        .checkout_reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .unwrap_or("正常退房");

    let mut contract_remarks = append_remark(
        contract.remarks.as_deref(),
        now,
        timezone,
        &format!(
            "退房：{reason}，退房日期{}，{outcome}",
            request.checkout_date
        ),
    );
    if let Some(note) = request.remarks.as_deref() {
        contract_remarks = append_remark(Some(&contract_remarks), now, timezone, note);
    }

    let renter_remarks = append_remark(
        renter.remarks.as_deref(),
        now,
        timezone,
        &format!(
            "{}退租，合同{}，{reason}",
            request.checkout_date, contract.contract_number
        ),
    );

    CheckoutPlan {
        settlement,
        settlement_bill,
        contract_remarks,
        renter_remarks,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub contract: Contract,
    pub settlement: CheckoutSettlement,
    pub settlement_bill: Option<Bill>,
    pub settled_bill_count: u64,
    pub final_readings: Vec<MeterReading>,
    pub final_reading_bills: Vec<Bill>,
}

/// Terminates the contract. Settlement bill, blanket settlement of open
/// bills, contract and room state, final readings and renter notes commit
/// together or not at all.
pub async fn checkout_contract(
    state: &AppState,
    contract_id: Uuid,
    request: CheckoutRequest,
) -> AppResult<CheckoutOutcome> {
    let pool = state.db_pool()?;
    let settings = state.settings.get_billing_settings().await;
    let timezone = state.config.business_timezone;
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let contract = contracts_repo::lock_contract(&mut tx, contract_id)
        .await?
        .ok_or_else(|| AppError::NotFound("合同不存在".to_string()))?;
    validate_checkout(&contract, &request, state.config.today())?;
    property_repo::lock_room(&mut tx, contract.room_id).await?;
    let renter = property_repo::lock_renter(&mut tx, contract.renter_id)
        .await?
        .ok_or_else(|| AppError::NotFound("租客不存在".to_string()))?;

    let meters = meters_repo::list_room_meters(&mut tx, contract.room_id).await?;
    let mut latest_readings = HashMap::new();
    for meter in meters.iter().filter(|meter| meter.is_active) {
        if let Some(reading) = meters_repo::latest_reading(&mut tx, meter.id).await? {
            latest_readings.insert(meter.id, reading.current_reading);
        }
    }
    let final_plans =
        plan_final_readings(&contract, &meters, &latest_readings, &request, &settings)?;
    let plan = plan_checkout(&contract, &renter, &request, Utc::now(), timezone);

    let settlement_bill = match &plan.settlement_bill {
        Some(bill) => {
            Some(bills_repo::insert_bill(&mut tx, &contract.contract_number, bill).await?)
        }
        None => None,
    };
    let settled_bill_count =
        bills_repo::settle_open_bills(&mut tx, contract.id, request.checkout_date).await?;

    let terminated = contracts_repo::transition_contract(
        &mut tx,
        contract.id,
        ContractStatus::Active,
        ContractStatus::Terminated,
        BUSINESS_STATUS_CHECKED_OUT,
        Some(&plan.contract_remarks),
    )
    .await?
    .ok_or_else(|| AppError::Conflict("合同状态已变更，请刷新后重试".to_string()))?;

    property_repo::vacate_room(&mut tx, contract.room_id).await?;

    let mut final_readings = Vec::with_capacity(final_plans.len());
    let mut final_reading_bills = Vec::new();
    for final_plan in final_plans {
        let mut reading = meters_repo::insert_reading(&mut tx, &final_plan.reading).await?;
        if let Some(bill) = final_reading_bill(
            &reading,
            &final_plan.meter,
            request.checkout_date,
            request.operator.clone(),
        ) {
            final_reading_bills
                .push(bills_repo::insert_bill(&mut tx, &contract.contract_number, &bill).await?);
            meters_repo::mark_readings_billed(&mut tx, &[reading.id]).await?;
            reading.status = ReadingStatus::Billed;
            reading.is_billed = true;
        }
        final_readings.push(reading);
    }

    property_repo::update_renter_remarks(&mut tx, renter.id, &plan.renter_remarks).await?;
    tx.commit().await.map_err(map_db_error)?;

    info!(
        contract_number = %terminated.contract_number,
        settlement_type = ?plan.settlement.settlement_type,
        net_amount = plan.settlement.net_amount(),
        settled_bill_count,
        "Contract checked out"
    );

    Ok(CheckoutOutcome {
        contract: terminated,
        settlement: plan.settlement,
        settlement_bill,
        settled_bill_count,
        final_readings,
        final_reading_bills,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementPreview {
    pub settlement: CheckoutSettlement,
    pub detailed: DetailedSettlement,
}

/// Read-only checkout preview with the unpaid-bill lines and operator edits.
pub async fn preview_settlement(
    state: &AppState,
    contract_id: Uuid,
    checkout_date: NaiveDate,
    damage_assessment: f64,
    paid_rent: Option<f64>,
    overrides: &[LineOverride],
) -> AppResult<SettlementPreview> {
    let pool = state.db_pool()?;
    let mut conn = pool.acquire().await.map_err(map_db_error)?;
    let contract = contracts_repo::get_contract(&mut conn, contract_id)
        .await?
        .ok_or_else(|| AppError::NotFound("合同不存在".to_string()))?;
    if checkout_date < contract.start_date {
        return Err(AppError::BadRequest(
            "退房日期不能早于合同开始日期".to_string(),
        ));
    }
    let bills = bills_repo::list_bills_for_contract(&mut conn, contract.id).await?;

    let settlement = calculate_checkout_settlement(
        &ContractSnapshot::from(&contract),
        checkout_date,
        damage_assessment,
        paid_rent,
    );
    let detailed = apply_line_overrides(
        build_detailed_settlement(settlement.clone(), contract.key_deposit, &bills),
        overrides,
    );
    Ok(SettlementPreview {
        settlement,
        detailed,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSweep {
    pub expired: usize,
    pub activated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Date-driven transitions: expire ACTIVE contracts past their end date,
/// then activate PENDING contracts whose start date has arrived. Expiry runs
/// first so a renewal can take over the room on the same day. Each contract
/// is handled in its own transaction.
pub async fn refresh_contract_statuses(
    pool: &PgPool,
    today: NaiveDate,
    timezone: Tz,
) -> AppResult<StatusSweep> {
    let mut sweep = StatusSweep::default();
    let mut conn = pool.acquire().await.map_err(map_db_error)?;
    let past_end = contracts_repo::list_contracts_past_end(&mut conn, today).await?;
    let due_to_start = contracts_repo::list_contracts_due_to_start(&mut conn, today).await?;
    drop(conn);

    for contract in past_end {
        match expire_contract(pool, contract.id, today, timezone).await {
            Ok(true) => sweep.expired += 1,
            Ok(false) => sweep.skipped += 1,
            Err(error) => {
                sweep.failed += 1;
                warn!(contract_number = %contract.contract_number, error = %error, "Contract expiry failed");
            }
        }
    }

    for contract in due_to_start {
        match activate_contract(pool, contract.id, today, timezone).await {
            Ok(true) => sweep.activated += 1,
            Ok(false) => sweep.skipped += 1,
            Err(error) => {
                sweep.failed += 1;
                warn!(contract_number = %contract.contract_number, error = %error, "Contract activation failed");
            }
        }
    }

    Ok(sweep)
}

async fn expire_contract_row(
    conn: &mut PgConnection,
    contract_id: Uuid,
    existing_remarks: Option<&str>,
    timezone: Tz,
) -> AppResult<Option<Contract>> {
    let remarks = append_remark(existing_remarks, Utc::now(), timezone, "合同到期");
    contracts_repo::transition_contract(
        conn,
        contract_id,
        ContractStatus::Active,
        ContractStatus::Expired,
        BUSINESS_STATUS_EXPIRED,
        Some(&remarks),
    )
    .await
}

async fn expire_contract(
    pool: &PgPool,
    contract_id: Uuid,
    today: NaiveDate,
    timezone: Tz,
) -> AppResult<bool> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let Some(contract) = contracts_repo::lock_contract(&mut tx, contract_id).await? else {
        return Ok(false);
    };
    if contract.status != ContractStatus::Active || contract.end_date >= today {
        return Ok(false);
    }

    expire_contract_row(&mut tx, contract.id, contract.remarks.as_deref(), timezone).await?;
    property_repo::lock_room(&mut tx, contract.room_id).await?;
    if contracts_repo::find_active_contract_for_room(&mut tx, contract.room_id, None)
        .await?
        .is_none()
    {
        property_repo::vacate_room(&mut tx, contract.room_id).await?;
    }
    tx.commit().await.map_err(map_db_error)?;

    info!(contract_number = %contract.contract_number, "Contract expired");
    Ok(true)
}

async fn activate_contract(
    pool: &PgPool,
    contract_id: Uuid,
    today: NaiveDate,
    timezone: Tz,
) -> AppResult<bool> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;
    let Some(contract) = contracts_repo::lock_contract(&mut tx, contract_id).await? else {
        return Ok(false);
    };
    if contract.status != ContractStatus::Pending || contract.start_date > today {
        return Ok(false);
    }

    if contract.end_date < today {
        // The whole term passed without the contract ever starting.
        let remarks = append_remark(
            contract.remarks.as_deref(),
            Utc::now(),
            timezone,
            "合同未生效即到期",
        );
        contracts_repo::transition_contract(
            &mut tx,
            contract.id,
            ContractStatus::Pending,
            ContractStatus::Expired,
            BUSINESS_STATUS_EXPIRED,
            Some(&remarks),
        )
        .await?;
        tx.commit().await.map_err(map_db_error)?;
        return Ok(true);
    }

    property_repo::lock_room(&mut tx, contract.room_id).await?;
    let room_taken = contracts_repo::find_active_contract_for_room(&mut tx, contract.room_id, None)
        .await?;
    let renter_taken =
        contracts_repo::find_active_contract_for_renter(&mut tx, contract.renter_id, None).await?;
    if let Some(blocking) = room_taken.or(renter_taken) {
        warn!(
            contract_number = %contract.contract_number,
            blocking_contract = %blocking.contract_number,
            "Pending contract cannot start while another contract is active"
        );
        return Ok(false);
    }

    let renter = property_repo::lock_renter(&mut tx, contract.renter_id)
        .await?
        .ok_or_else(|| AppError::NotFound("租客不存在".to_string()))?;
    contracts_repo::transition_contract(
        &mut tx,
        contract.id,
        ContractStatus::Pending,
        ContractStatus::Active,
        BUSINESS_STATUS_SIGNED,
        None,
    )
    .await?;
    property_repo::occupy_room(&mut tx, contract.room_id, &renter.name).await?;
    property_repo::record_move_in(&mut tx, renter.id, contract.start_date).await?;
    tx.commit().await.map_err(map_db_error)?;

    info!(contract_number = %contract.contract_number, "Contract activated");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    use super::{
        check_availability, final_reading_bill, plan_checkout, plan_final_readings,
        plan_new_contract, renewal_defaults, renewal_terms, resolve_reading_targets,
        validate_checkout, validate_contract_terms, CheckoutRequest, ContractTerms, Occupancy,
        RenewContractRequest,
    };
    use crate::{
        error::AppError,
        models::{
            property::RoomType, BillMetadata, BillStatus, BillType, Contract, ContractStatus,
            Meter, MeterReading, MeterType, ReadingStatus, Renter, Room, RoomStatus,
        },
        services::{settings::BillingSettings, settlement::SettlementType},
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn room(status: RoomStatus) -> Room {
        Room {
            id: Uuid::new_v4(),
            room_number: "302".to_string(),
            floor_number: 3,
            building_id: Uuid::new_v4(),
            room_type: RoomType::Single,
            area: 20.0,
            rent: 1500.0,
            status,
            current_renter: None,
            overdue_days: 0,
        }
    }

    fn renter() -> Renter {
        Renter {
            id: Uuid::new_v4(),
            name: "王五".to_string(),
            phone: None,
            email: None,
            id_card: None,
            move_in_date: None,
            tenant_count: 1,
            remarks: None,
        }
    }

    fn terms(room: &Room, renter: &Renter, start: NaiveDate) -> ContractTerms {
        ContractTerms {
            room_id: room.id,
            renter_id: renter.id,
            start_date: start,
            end_date: start + Duration::days(364),
            monthly_rent: 1500.0,
            deposit: 1500.0,
            key_deposit: 100.0,
            cleaning_fee: 0.0,
            payment_method: None,
            payment_timing: None,
            signed_by: None,
            signed_date: None,
            remarks: None,
        }
    }

    fn contract(terms: &ContractTerms, status: ContractStatus) -> Contract {
        Contract {
            id: Uuid::new_v4(),
            contract_number: "CT20260101000007".to_string(),
            room_id: terms.room_id,
            renter_id: terms.renter_id,
            start_date: terms.start_date,
            end_date: terms.end_date,
            monthly_rent: terms.monthly_rent,
            total_rent: 18000.0,
            deposit: terms.deposit,
            key_deposit: terms.key_deposit,
            cleaning_fee: terms.cleaning_fee,
            status,
            business_status: None,
            payment_method: None,
            payment_timing: None,
            signed_by: None,
            signed_date: None,
            renewed_from_id: None,
            remarks: Some("签约".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn meter(meter_type: MeterType) -> Meter {
        Meter {
            id: Uuid::new_v4(),
            room_id: Uuid::nil(),
            meter_type,
            display_name: meter_type.display_name().to_string(),
            unit_price: None,
            unit: meter_type.default_unit().to_string(),
            location: None,
            is_active: true,
            remarks: None,
        }
    }

    fn checkout_request(checkout_date: NaiveDate) -> CheckoutRequest {
        CheckoutRequest {
            checkout_date,
            checkout_reason: Some("工作调动".to_string()),
            damage_assessment: 0.0,
            final_meter_readings: BTreeMap::new(),
            remarks: None,
            operator: Some("front-desk".to_string()),
        }
    }

    fn free(room: &Room) -> Occupancy<'_> {
        Occupancy {
            room,
            room_active: None,
            room_pending: None,
            renter_active: None,
        }
    }

    #[test]
    fn rejects_bad_dates_and_amounts() {
        let (room, renter) = (room(RoomStatus::Vacant), renter());
        let mut bad = terms(&room, &renter, date(2026, 3, 1));
        bad.end_date = bad.start_date;
        assert!(matches!(
            validate_contract_terms(&bad),
            Err(AppError::BadRequest(_))
        ));

        let mut free_rent = terms(&room, &renter, date(2026, 3, 1));
        free_rent.monthly_rent = 0.0;
        assert!(validate_contract_terms(&free_rent).is_err());

        assert!(validate_contract_terms(&terms(&room, &renter, date(2026, 3, 1))).is_ok());
    }

    #[test]
    fn signing_today_occupies_the_room() {
        let (room, renter) = (room(RoomStatus::Vacant), renter());
        let today = date(2026, 3, 1);
        let terms = terms(&room, &renter, today);
        check_availability(&terms, free(&room), None).expect("room is free");

        let plan = plan_new_contract(&terms, None, today, Utc::now(), chrono_tz::Asia::Shanghai);
        assert_eq!(plan.contract.status, ContractStatus::Active);
        assert_eq!(plan.contract.total_rent, 18000.0);
        assert!(plan.occupy_room);
        assert_eq!(plan.expire_source, None);
    }

    #[test]
    fn future_start_leaves_the_room_vacant() {
        let (room, renter) = (room(RoomStatus::Vacant), renter());
        let today = date(2026, 3, 1);
        let terms = terms(&room, &renter, today + Duration::days(10));

        let plan = plan_new_contract(&terms, None, today, Utc::now(), chrono_tz::Asia::Shanghai);
        assert_eq!(plan.contract.status, ContractStatus::Pending);
        assert_eq!(plan.contract.business_status, "AWAITING_MOVE_IN");
        assert!(!plan.occupy_room);
    }

    #[test]
    fn occupied_room_and_busy_renter_are_conflicts() {
        let renter = renter();
        let occupied = room(RoomStatus::Occupied);
        let terms_occupied = terms(&occupied, &renter, date(2026, 3, 1));
        match check_availability(&terms_occupied, free(&occupied), None) {
            Err(AppError::Conflict(message)) => {
                assert_eq!(message, "房间不可用，当前状态：OCCUPIED");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let vacant = room(RoomStatus::Vacant);
        let terms_vacant = terms(&vacant, &renter, date(2026, 3, 1));
        let elsewhere = contract(&terms_vacant, ContractStatus::Active);
        let occupancy = Occupancy {
            renter_active: Some(&elsewhere),
            ..free(&vacant)
        };
        match check_availability(&terms_vacant, occupancy, None) {
            Err(AppError::Conflict(message)) => assert!(message.starts_with("租客已有生效中的合同")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn renewal_may_sign_while_the_source_holds_the_room() {
        let renter = renter();
        let occupied = room(RoomStatus::Occupied);
        let source_terms = terms(&occupied, &renter, date(2025, 3, 1));
        let source = contract(&source_terms, ContractStatus::Active);

        let defaults = renewal_defaults(&source);
        assert_eq!(defaults.start_date, source.end_date + Duration::days(1));
        assert_eq!(
            defaults.end_date,
            date(2027, 2, 28),
            "one year minus a day from {}",
            defaults.start_date
        );

        let renewal = renewal_terms(&defaults, &RenewContractRequest::default());
        let occupancy = Occupancy {
            room_active: Some(&source),
            ..free(&occupied)
        };
        check_availability(&renewal, occupancy, Some(&source)).expect("renewal allowed");

        let mut overlapping = renewal.clone();
        overlapping.start_date = source.end_date;
        assert!(matches!(
            check_availability(&overlapping, occupancy, Some(&source)),
            Err(AppError::BadRequest(_))
        ));

        let mut other_room = renewal.clone();
        other_room.room_id = Uuid::new_v4();
        assert!(matches!(
            check_availability(&other_room, occupancy, Some(&source)),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn late_renewal_expires_its_source_first() {
        let renter = renter();
        let occupied = room(RoomStatus::Occupied);
        let source = contract(&terms(&occupied, &renter, date(2025, 3, 1)), ContractStatus::Active);
        let renewal = renewal_terms(&renewal_defaults(&source), &RenewContractRequest::default());

        let today = renewal.start_date + Duration::days(2);
        let plan = plan_new_contract(
            &renewal,
            Some(&source),
            today,
            Utc::now(),
            chrono_tz::Asia::Shanghai,
        );
        assert_eq!(plan.contract.status, ContractStatus::Active);
        assert_eq!(plan.expire_source, Some(source.id));
        assert_eq!(plan.contract.renewed_from_id, Some(source.id));

        let early = plan_new_contract(
            &renewal,
            Some(&source),
            source.end_date,
            Utc::now(),
            chrono_tz::Asia::Shanghai,
        );
        assert_eq!(early.contract.status, ContractStatus::Pending);
        assert_eq!(early.expire_source, None);
    }

    #[test]
    fn checkout_requires_an_active_contract_within_its_term() {
        let (room, renter) = (room(RoomStatus::Occupied), renter());
        let active = contract(&terms(&room, &renter, date(2026, 1, 1)), ContractStatus::Active);
        let today = date(2026, 6, 1);

        assert!(validate_checkout(&active, &checkout_request(today), today).is_ok());
        assert!(matches!(
            validate_checkout(&active, &checkout_request(today - Duration::days(1)), today),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            validate_checkout(
                &active,
                &checkout_request(active.end_date + Duration::days(1)),
                today
            ),
            Err(AppError::Conflict(_))
        ));

        let terminated = Contract {
            status: ContractStatus::Terminated,
            ..active.clone()
        };
        match validate_checkout(&terminated, &checkout_request(today), today) {
            Err(AppError::Conflict(message)) => {
                assert_eq!(message, "合同状态不允许退房，当前状态：TERMINATED");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn checkout_plan_books_a_completed_refund_and_appends_notes() {
        let (room, renter) = (room(RoomStatus::Occupied), renter());
        let active = contract(&terms(&room, &renter, date(2026, 1, 1)), ContractStatus::Active);
        let checkout = date(2026, 1, 1) + Duration::days(179);
        let now = Utc
            .with_ymd_and_hms(2026, 6, 30, 2, 0, 0)
            .single()
            .expect("valid time");

        let plan = plan_checkout(
            &active,
            &renter,
            &checkout_request(checkout),
            now,
            chrono_tz::Asia::Shanghai,
        );
        assert_eq!(plan.settlement.settlement_type, SettlementType::Refund);
        assert_eq!(plan.settlement.refund_amount, 10500.0);

        let bill = plan.settlement_bill.expect("non-zero settlement");
        assert_eq!(bill.bill_type, BillType::Other);
        assert_eq!(bill.amount, -10500.0);
        assert_eq!(bill.status, BillStatus::Completed);
        assert_eq!(bill.pending_amount(), 0.0);
        assert!(matches!(bill.metadata, Some(BillMetadata::Settlement(_))));

        assert!(plan.contract_remarks.starts_with("签约\n[2026-06-30 10:00:00] 退房：工作调动"));
        assert!(plan.renter_remarks.contains("CT20260101000007"));
    }

    #[test]
    fn final_readings_bill_only_positive_usage() {
        let (room, renter) = (room(RoomStatus::Occupied), renter());
        let active = contract(&terms(&room, &renter, date(2026, 1, 1)), ContractStatus::Active);
        let electricity = meter(MeterType::Electricity);
        let water = meter(MeterType::ColdWater);
        let meters = vec![electricity.clone(), water.clone()];

        let mut request = checkout_request(date(2026, 6, 30));
        request
            .final_meter_readings
            .insert("ELECTRICITY".to_string(), 1250.0);
        request.final_meter_readings.insert(water.id.to_string(), 40.0);
        let latest = HashMap::from([(electricity.id, 1200.0), (water.id, 40.0)]);

        let plans = plan_final_readings(
            &active,
            &meters,
            &latest,
            &request,
            &BillingSettings::default(),
        )
        .expect("known meters");
        assert_eq!(plans.len(), 2);
        let electricity_plan = plans
            .iter()
            .find(|plan| plan.meter == electricity)
            .expect("electricity plan");
        assert_eq!(electricity_plan.reading.usage, 50.0);
        assert_eq!(electricity_plan.reading.previous_reading, 1200.0);

        let bills = plans
            .iter()
            .filter_map(|plan| {
                let reading = MeterReading {
                    id: Uuid::new_v4(),
                    meter_id: plan.reading.meter_id,
                    contract_id: plan.reading.contract_id,
                    previous_reading: plan.reading.previous_reading,
                    current_reading: plan.reading.current_reading,
                    usage: plan.reading.usage,
                    unit_price: plan.reading.unit_price,
                    amount: plan.reading.amount,
                    reading_date: plan.reading.reading_date,
                    period: plan.reading.period.clone(),
                    status: ReadingStatus::Confirmed,
                    is_billed: false,
                    operator: None,
                    remarks: None,
                    created_at: Utc::now(),
                };
                final_reading_bill(&reading, &plan.meter, request.checkout_date, None)
            })
            .collect::<Vec<_>>();

        assert_eq!(bills.len(), 1);
        assert_eq!(bills[0].amount, 30.0);
        assert_eq!(bills[0].status, BillStatus::Paid);
        assert_eq!(bills[0].pending_amount(), 0.0);
    }

    #[test]
    fn unknown_meter_keys_are_rejected() {
        let meters = vec![meter(MeterType::Electricity)];
        let readings = BTreeMap::from([("GAS".to_string(), 10.0)]);
        assert!(matches!(
            resolve_reading_targets(&meters, &readings),
            Err(AppError::BadRequest(_))
        ));

        let readings = BTreeMap::from([("electricity".to_string(), 10.0)]);
        assert_eq!(
            resolve_reading_targets(&meters, &readings)
                .expect("known meter")
                .len(),
            1
        );
    }
}
