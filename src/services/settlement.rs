//! Checkout settlement: prorated rent against what was paid, deposit
//! disposition and damage deductions.
//!
//! Every intermediate amount is rounded to cents where it is computed, and
//! months are the fixed 30-day convention rather than calendar months.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    models::{Bill, BillStatus, BillType, Contract},
    services::bill_calculation::round2,
};

pub const DAYS_PER_MONTH: f64 = 30.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementType {
    Refund,
    Charge,
    Balanced,
}

/// Contract fields the calculator depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContractSnapshot {
    pub start_date: NaiveDate,
    pub monthly_rent: f64,
    pub total_rent: f64,
    pub deposit: f64,
    pub key_deposit: f64,
}

impl From<&Contract> for ContractSnapshot {
    fn from(contract: &Contract) -> Self {
        Self {
            start_date: contract.start_date,
            monthly_rent: contract.monthly_rent,
            total_rent: contract.total_rent,
            deposit: contract.deposit,
            key_deposit: contract.key_deposit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSettlement {
    pub checkout_date: NaiveDate,
    pub actual_days: i64,
    pub daily_rent: f64,
    pub should_pay_rent: f64,
    pub paid_rent: f64,
    pub rent_difference: f64,
    pub deposit: f64,
    pub damage_assessment: f64,
    pub deposit_refund: f64,
    pub refund_amount: f64,
    pub additional_amount: f64,
    pub settlement_type: SettlementType,
    pub description: String,
}

impl CheckoutSettlement {
    /// Signed net from the landlord's side: negative is money back to the tenant.
    pub fn net_amount(&self) -> f64 {
        round2(self.additional_amount - self.refund_amount)
    }
}

/// `paid_rent` defaults to the contract's total rent, i.e. rent is assumed
/// collected up front for the whole term.
pub fn calculate_checkout_settlement(
    contract: &ContractSnapshot,
    checkout_date: NaiveDate,
    damage_assessment: f64,
    paid_rent: Option<f64>,
) -> CheckoutSettlement {
    let actual_days = (checkout_date - contract.start_date).num_days() + 1;
    let daily_rent = round2(contract.monthly_rent / DAYS_PER_MONTH);
    // Prorate from the unrounded daily rate so long stays do not drift.
    let should_pay_rent = round2(actual_days as f64 * contract.monthly_rent / DAYS_PER_MONTH);
    let paid_rent = round2(paid_rent.unwrap_or(contract.total_rent));
    let rent_difference = round2(paid_rent - should_pay_rent);
    let damage_assessment = round2(damage_assessment.max(0.0));
    let deposit = round2(contract.deposit);
    let deposit_refund = round2((deposit - damage_assessment).max(0.0));

    let (refund_amount, additional_amount) = if rent_difference > 0.0 {
        (round2(rent_difference + deposit_refund), 0.0)
    } else if rent_difference < 0.0 {
        let need_pay = rent_difference.abs();
        if deposit_refund >= need_pay {
            (round2(deposit_refund - need_pay), 0.0)
        } else {
            (0.0, round2(need_pay - deposit_refund))
        }
    } else {
        (deposit_refund, 0.0)
    };

    let settlement_type = if refund_amount > 0.0 {
        SettlementType::Refund
    } else if additional_amount > 0.0 {
        SettlementType::Charge
    } else {
        SettlementType::Balanced
    };

    let description = describe_settlement(
        actual_days,
        should_pay_rent,
        paid_rent,
        rent_difference,
        deposit,
        damage_assessment,
        deposit_refund,
        refund_amount,
        additional_amount,
    );

    CheckoutSettlement {
        checkout_date,
        actual_days,
        daily_rent,
        should_pay_rent,
        paid_rent,
        rent_difference,
        deposit,
        damage_assessment,
        deposit_refund,
        refund_amount,
        additional_amount,
        settlement_type,
        description,
    }
}

#[allow(clippy::too_many_arguments)]
fn describe_settlement(
    actual_days: i64,
    should_pay_rent: f64,
    paid_rent: f64,
    rent_difference: f64,
    deposit: f64,
    damage_assessment: f64,
    deposit_refund: f64,
    refund_amount: f64,
    additional_amount: f64,
) -> String {
    let mut parts = vec![format!(
        "实际居住{actual_days}天，应付租金{should_pay_rent:.2}元，已付租金{paid_rent:.2}元"
    )];

    if rent_difference > 0.0 {
        parts.push(format!("多付租金{rent_difference:.2}元"));
    } else if rent_difference < 0.0 {
        parts.push(format!("少付租金{:.2}元", rent_difference.abs()));
    } else {
        parts.push("租金已结清".to_string());
    }

    if damage_assessment > 0.0 {
        parts.push(format!(
            "押金{deposit:.2}元扣除损坏赔偿{damage_assessment:.2}元，可退押金{deposit_refund:.2}元"
        ));
    } else {
        parts.push(format!("押金{deposit:.2}元全额可退"));
    }

    if refund_amount > 0.0 {
        parts.push(format!("应退租客{refund_amount:.2}元"));
    } else if additional_amount > 0.0 {
        parts.push(format!("租客需补缴{additional_amount:.2}元"));
    } else {
        parts.push("双方无需补退".to_string());
    }

    parts.join("；")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineDirection {
    Refund,
    Charge,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    RentOverpaid,
    RentUnderpaid,
    DepositRefund,
    DamageDeduction,
    KeyDepositRefund,
    UnpaidBill,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementLine {
    pub code: String,
    pub kind: LineKind,
    pub label: String,
    pub direction: LineDirection,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailedSettlement {
    pub lines: Vec<SettlementLine>,
    pub total_refund: f64,
    pub total_charge: f64,
    /// Positive: the tenant receives money. Negative: the tenant owes.
    pub net_refund: f64,
    pub settlement_type: SettlementType,
    pub summary: CheckoutSettlement,
}

/// Operator edit of one computed line before checkout is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineOverride {
    pub code: String,
    pub amount: f64,
}

/// Review view for the operator: the core settlement split into lines, the
/// key deposit as a straight refund, and every still-unpaid bill as a charge.
pub fn build_detailed_settlement(
    summary: CheckoutSettlement,
    key_deposit: f64,
    bills: &[Bill],
) -> DetailedSettlement {
    let mut lines = Vec::new();

    if summary.rent_difference > 0.0 {
        lines.push(line(
            "rent",
            LineKind::RentOverpaid,
            "多付租金退还",
            LineDirection::Refund,
            summary.rent_difference,
            None,
        ));
    } else if summary.rent_difference < 0.0 {
        lines.push(line(
            "rent",
            LineKind::RentUnderpaid,
            "少付租金补缴",
            LineDirection::Charge,
            summary.rent_difference.abs(),
            None,
        ));
    }

    if summary.deposit > 0.0 {
        lines.push(line(
            "deposit",
            LineKind::DepositRefund,
            "押金退还",
            LineDirection::Refund,
            summary.deposit,
            None,
        ));
    }
    if summary.damage_assessment > 0.0 {
        lines.push(line(
            "damage",
            LineKind::DamageDeduction,
            "损坏赔偿扣除",
            LineDirection::Charge,
            // Damage beyond the deposit is not charged on top.
            summary.damage_assessment.min(summary.deposit),
            None,
        ));
    }
    if key_deposit > 0.0 {
        lines.push(line(
            "key_deposit",
            LineKind::KeyDepositRefund,
            "钥匙押金退还",
            LineDirection::Refund,
            key_deposit,
            None,
        ));
    }

    for bill in bills
        .iter()
        .filter(|bill| matches!(bill.status, BillStatus::Pending | BillStatus::Overdue))
        .filter(|bill| bill.pending_amount > 0.0)
    {
        lines.push(line(
            &format!("bill:{}", bill.id),
            LineKind::UnpaidBill,
            &format!("未付{}账单 {}", bill_type_label(bill.bill_type), bill.bill_number),
            LineDirection::Charge,
            bill.pending_amount,
            Some(bill.id),
        ));
    }

    summarize(lines, summary)
}

/// Replaces amounts of matching lines and recomputes every subtotal.
/// Unknown codes are ignored; negative amounts are clamped to zero.
pub fn apply_line_overrides(
    detailed: DetailedSettlement,
    overrides: &[LineOverride],
) -> DetailedSettlement {
    let lines = detailed
        .lines
        .into_iter()
        .map(|mut item| {
            if let Some(edit) = overrides.iter().find(|edit| edit.code == item.code) {
                item.amount = round2(edit.amount.max(0.0));
            }
            item
        })
        .collect();
    summarize(lines, detailed.summary)
}

fn summarize(lines: Vec<SettlementLine>, summary: CheckoutSettlement) -> DetailedSettlement {
    let total_refund = round2(
        lines
            .iter()
            .filter(|item| item.direction == LineDirection::Refund)
            .map(|item| item.amount)
            .sum(),
    );
    let total_charge = round2(
        lines
            .iter()
            .filter(|item| item.direction == LineDirection::Charge)
            .map(|item| item.amount)
            .sum(),
    );
    let net_refund = round2(total_refund - total_charge);
    let settlement_type = if net_refund > 0.0 {
        SettlementType::Refund
    } else if net_refund < 0.0 {
        SettlementType::Charge
    } else {
        SettlementType::Balanced
    };

    DetailedSettlement {
        lines,
        total_refund,
        total_charge,
        net_refund,
        settlement_type,
        summary,
    }
}

fn line(
    code: &str,
    kind: LineKind,
    label: &str,
    direction: LineDirection,
    amount: f64,
    bill_id: Option<Uuid>,
) -> SettlementLine {
    SettlementLine {
        code: code.to_string(),
        kind,
        label: label.to_string(),
        direction,
        amount: round2(amount),
        bill_id,
    }
}

pub fn bill_type_label(bill_type: BillType) -> &'static str {
    match bill_type {
        BillType::Rent => "租金",
        BillType::Deposit => "押金",
        BillType::Utilities => "水电",
        BillType::Other => "其他",
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};
    use uuid::Uuid;

    use super::{
        apply_line_overrides, build_detailed_settlement, calculate_checkout_settlement,
        ContractSnapshot, LineDirection, LineOverride, SettlementType,
    };
    use crate::models::{Bill, BillStatus, BillType};

    fn contract() -> ContractSnapshot {
        ContractSnapshot {
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
            monthly_rent: 1500.0,
            total_rent: 18000.0,
            deposit: 1500.0,
            key_deposit: 100.0,
        }
    }

    fn day_180() -> NaiveDate {
        contract().start_date + Duration::days(179)
    }

    fn unpaid_bill(amount: f64) -> Bill {
        Bill {
            id: Uuid::new_v4(),
            bill_number: "BILL001U123456".to_string(),
            bill_type: BillType::Utilities,
            amount,
            received_amount: 0.0,
            pending_amount: amount,
            due_date: day_180(),
            paid_date: None,
            period: None,
            status: BillStatus::Pending,
            contract_id: Uuid::new_v4(),
            meter_reading_id: None,
            payment_method: None,
            operator: None,
            remarks: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn overpaid_tenant_gets_rent_and_deposit_back() {
        let settlement = calculate_checkout_settlement(&contract(), day_180(), 0.0, None);
        assert_eq!(settlement.actual_days, 180);
        assert_eq!(settlement.daily_rent, 50.0);
        assert_eq!(settlement.should_pay_rent, 9000.0);
        assert_eq!(settlement.rent_difference, 9000.0);
        assert_eq!(settlement.deposit_refund, 1500.0);
        assert_eq!(settlement.refund_amount, 10500.0);
        assert_eq!(settlement.additional_amount, 0.0);
        assert_eq!(settlement.settlement_type, SettlementType::Refund);
        assert_eq!(settlement.net_amount(), -10500.0);
        assert!(settlement.description.contains("多付租金9000.00元"));
    }

    #[test]
    fn underpayment_beyond_deposit_is_charged() {
        let settlement = calculate_checkout_settlement(&contract(), day_180(), 0.0, Some(4000.0));
        assert_eq!(settlement.should_pay_rent, 9000.0);
        assert_eq!(settlement.rent_difference, -5000.0);
        assert_eq!(settlement.deposit_refund, 1500.0);
        assert_eq!(settlement.additional_amount, 3500.0);
        assert_eq!(settlement.refund_amount, 0.0);
        assert_eq!(settlement.settlement_type, SettlementType::Charge);
        assert!(settlement.description.contains("租客需补缴3500.00元"));
    }

    #[test]
    fn underpayment_absorbed_by_deposit() {
        let settlement = calculate_checkout_settlement(&contract(), day_180(), 0.0, Some(8000.0));
        assert_eq!(settlement.rent_difference, -1000.0);
        assert_eq!(settlement.refund_amount, 500.0);
        assert_eq!(settlement.additional_amount, 0.0);
        assert_eq!(settlement.settlement_type, SettlementType::Refund);
    }

    #[test]
    fn damage_reduces_deposit_but_never_below_zero() {
        let settlement = calculate_checkout_settlement(&contract(), day_180(), 2000.0, Some(9000.0));
        assert_eq!(settlement.rent_difference, 0.0);
        assert_eq!(settlement.deposit_refund, 0.0);
        assert_eq!(settlement.refund_amount, 0.0);
        assert_eq!(settlement.settlement_type, SettlementType::Balanced);

        let partial = calculate_checkout_settlement(&contract(), day_180(), 300.0, Some(9000.0));
        assert_eq!(partial.deposit_refund, 1200.0);
        assert_eq!(partial.refund_amount, 1200.0);
        assert!(partial.description.contains("损坏赔偿300.00元"));
    }

    #[test]
    fn checkout_on_start_date_counts_one_day() {
        let snapshot = contract();
        let settlement = calculate_checkout_settlement(&snapshot, snapshot.start_date, 0.0, None);
        assert_eq!(settlement.actual_days, 1);
        assert_eq!(settlement.should_pay_rent, 50.0);
    }

    #[test]
    fn detailed_view_lists_key_deposit_and_unpaid_bills() {
        let summary = calculate_checkout_settlement(&contract(), day_180(), 0.0, None);
        let bill = unpaid_bill(47.5);
        let mut paid = unpaid_bill(20.0);
        paid.status = BillStatus::Paid;

        let detailed = build_detailed_settlement(summary, 100.0, &[bill.clone(), paid]);
        assert_eq!(detailed.lines.len(), 4);
        assert_eq!(detailed.total_refund, 10600.0);
        assert_eq!(detailed.total_charge, 47.5);
        assert_eq!(detailed.net_refund, 10552.5);
        assert_eq!(detailed.settlement_type, SettlementType::Refund);
        let bill_line = detailed
            .lines
            .iter()
            .find(|item| item.bill_id == Some(bill.id))
            .expect("unpaid bill line");
        assert_eq!(bill_line.direction, LineDirection::Charge);
    }

    #[test]
    fn operator_overrides_recompute_totals() {
        let summary = calculate_checkout_settlement(&contract(), day_180(), 0.0, None);
        let detailed = build_detailed_settlement(summary, 100.0, &[]);
        let edited = apply_line_overrides(
            detailed,
            &[
                LineOverride {
                    code: "rent".to_string(),
                    amount: 100.0,
                },
                LineOverride {
                    code: "unknown".to_string(),
                    amount: 999.0,
                },
            ],
        );
        assert_eq!(edited.total_refund, 1700.0);
        assert_eq!(edited.total_charge, 0.0);
        assert_eq!(edited.net_refund, 1700.0);
    }
}
