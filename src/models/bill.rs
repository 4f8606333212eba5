use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use crate::models::meter::MeterType;
use crate::services::settlement::CheckoutSettlement;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillType {
    Rent,
    Deposit,
    Utilities,
    Other,
}

impl BillType {
    /// Letter embedded in bill numbers.
    pub fn letter(self) -> char {
        match self {
            Self::Rent => 'R',
            Self::Deposit => 'D',
            Self::Utilities => 'U',
            Self::Other => 'O',
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    Pending,
    Paid,
    Overdue,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceSource {
    MeterConfig,
    GlobalSetting,
}

/// One meter's share of an aggregated utilities bill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtilityBreakdownItem {
    pub meter_reading_id: Uuid,
    pub meter_id: Uuid,
    pub meter_type: MeterType,
    pub meter_name: String,
    pub usage: f64,
    pub unit: String,
    pub unit_price: f64,
    pub amount: f64,
    pub price_source: PriceSource,
    pub previous_reading: f64,
    pub current_reading: f64,
    pub reading_date: NaiveDate,
}

/// Structured explanation of a bill amount, persisted in the `metadata`
/// column so "why this amount" can be reconstructed later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillMetadata {
    RentPeriod {
        period_start: NaiveDate,
        period_end: NaiveDate,
        months: u32,
        monthly_rent: f64,
    },
    Deposit {
        deposit: f64,
        key_deposit: f64,
    },
    UtilitiesBreakdown {
        items: Vec<UtilityBreakdownItem>,
        meter_count: usize,
        total_usage: f64,
        total_amount: f64,
    },
    FinalReading {
        meter_reading_id: Uuid,
        meter_type: MeterType,
        usage: f64,
        unit_price: f64,
    },
    Settlement(CheckoutSettlement),
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bill {
    pub id: Uuid,
    pub bill_number: String,
    pub bill_type: BillType,
    pub amount: f64,
    pub received_amount: f64,
    pub pending_amount: f64,
    pub due_date: NaiveDate,
    pub paid_date: Option<NaiveDate>,
    pub period: Option<String>,
    pub status: BillStatus,
    pub contract_id: Uuid,
    pub meter_reading_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub operator: Option<String>,
    pub remarks: Option<String>,
    pub metadata: Option<Json<BillMetadata>>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload. `pending_amount` is always derived, never supplied, so
/// `amount == received_amount + pending_amount` holds for every new row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBill {
    pub contract_id: Uuid,
    pub bill_type: BillType,
    pub amount: f64,
    pub received_amount: f64,
    pub due_date: NaiveDate,
    pub paid_date: Option<NaiveDate>,
    pub period: Option<String>,
    pub status: BillStatus,
    pub meter_reading_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub operator: Option<String>,
    pub remarks: Option<String>,
    pub metadata: Option<BillMetadata>,
}

impl NewBill {
    pub fn pending(contract_id: Uuid, bill_type: BillType, amount: f64, due_date: NaiveDate) -> Self {
        Self {
            contract_id,
            bill_type,
            amount: crate::services::bill_calculation::round2(amount),
            received_amount: 0.0,
            due_date,
            paid_date: None,
            period: None,
            status: BillStatus::Pending,
            meter_reading_id: None,
            payment_method: None,
            operator: None,
            remarks: None,
            metadata: None,
        }
    }

    /// Same bill, already settled in full on `paid_on`.
    pub fn settled(mut self, status: BillStatus, paid_on: NaiveDate) -> Self {
        self.status = status;
        self.received_amount = self.amount;
        self.paid_date = Some(paid_on);
        self
    }

    pub fn pending_amount(&self) -> f64 {
        crate::services::bill_calculation::round2(self.amount - self.received_amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillDetail {
    pub id: Uuid,
    pub bill_id: Uuid,
    pub meter_reading_id: Uuid,
    pub meter_type: MeterType,
    pub meter_name: String,
    pub usage: f64,
    pub unit_price: f64,
    pub amount: f64,
    pub previous_reading: f64,
    pub current_reading: f64,
    pub reading_date: NaiveDate,
    pub price_source: PriceSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBillDetail {
    pub meter_reading_id: Uuid,
    pub meter_type: MeterType,
    pub meter_name: String,
    pub usage: f64,
    pub unit_price: f64,
    pub amount: f64,
    pub previous_reading: f64,
    pub current_reading: f64,
    pub reading_date: NaiveDate,
    pub price_source: PriceSource,
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{BillMetadata, BillStatus, BillType, NewBill};

    #[test]
    fn pending_amount_tracks_received_amount() {
        let due = NaiveDate::from_ymd_opt(2026, 5, 1).expect("valid date");
        let bill = NewBill::pending(Uuid::new_v4(), BillType::Rent, 1500.004, due);
        assert_eq!(bill.amount, 1500.0);
        assert_eq!(bill.pending_amount(), 1500.0);

        let paid = bill.settled(BillStatus::Paid, due);
        assert_eq!(paid.pending_amount(), 0.0);
        assert_eq!(paid.amount, paid.received_amount + paid.pending_amount());
    }

    #[test]
    fn refund_bills_keep_the_balance_invariant() {
        let due = NaiveDate::from_ymd_opt(2026, 5, 1).expect("valid date");
        let refund = NewBill::pending(Uuid::new_v4(), BillType::Other, -10500.0, due);
        assert_eq!(refund.pending_amount(), -10500.0);
        assert_eq!(
            refund.amount,
            refund.received_amount + refund.pending_amount()
        );
    }

    #[test]
    fn metadata_is_tagged_by_kind() {
        let metadata = BillMetadata::Deposit {
            deposit: 1500.0,
            key_deposit: 100.0,
        };
        let value = serde_json::to_value(&metadata).expect("serializable");
        assert_eq!(value["kind"], "DEPOSIT");
        let back: BillMetadata = serde_json::from_value(value).expect("deserializable");
        assert_eq!(back, metadata);
    }
}
