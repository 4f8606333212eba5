use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Pending,
    Active,
    Expired,
    Terminated,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Terminated => "TERMINATED",
        }
    }

    /// Status a freshly created contract starts in.
    pub fn initial_for(start_date: NaiveDate, today: NaiveDate) -> Self {
        if start_date > today {
            Self::Pending
        } else {
            Self::Active
        }
    }
}

pub const BUSINESS_STATUS_SIGNED: &str = "SIGNED";
pub const BUSINESS_STATUS_AWAITING_MOVE_IN: &str = "AWAITING_MOVE_IN";
pub const BUSINESS_STATUS_CHECKED_OUT: &str = "CHECKED_OUT";
pub const BUSINESS_STATUS_EXPIRED: &str = "EXPIRED";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contract {
    pub id: Uuid,
    pub contract_number: String,
    pub room_id: Uuid,
    pub renter_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_rent: f64,
    pub total_rent: f64,
    pub deposit: f64,
    pub key_deposit: f64,
    pub cleaning_fee: f64,
    pub status: ContractStatus,
    pub business_status: Option<String>,
    pub payment_method: Option<String>,
    pub payment_timing: Option<String>,
    pub signed_by: Option<String>,
    pub signed_date: Option<NaiveDate>,
    pub renewed_from_id: Option<Uuid>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload; `contract_number` is assigned by the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContract {
    pub room_id: Uuid,
    pub renter_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_rent: f64,
    pub total_rent: f64,
    pub deposit: f64,
    pub key_deposit: f64,
    pub cleaning_fee: f64,
    pub status: ContractStatus,
    pub business_status: String,
    pub payment_method: Option<String>,
    pub payment_timing: Option<String>,
    pub signed_by: Option<String>,
    pub signed_date: Option<NaiveDate>,
    pub renewed_from_id: Option<Uuid>,
    pub remarks: Option<String>,
}

/// How often rent is collected. Parsed leniently: anything unknown is monthly.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentCycle {
    #[default]
    Monthly,
    Quarterly,
    SemiAnnually,
    Annually,
}

impl PaymentCycle {
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw
            .map(str::trim)
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "quarterly" => Self::Quarterly,
            "semi_annually" | "semiannually" | "semi-annually" => Self::SemiAnnually,
            "annually" | "yearly" => Self::Annually,
            _ => Self::Monthly,
        }
    }

    pub fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::SemiAnnually => 6,
            Self::Annually => 12,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::SemiAnnually => "semi_annually",
            Self::Annually => "annually",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{ContractStatus, PaymentCycle};

    #[test]
    fn initial_status_follows_start_date() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).expect("valid date");
        assert_eq!(
            ContractStatus::initial_for(today, today),
            ContractStatus::Active
        );
        assert_eq!(
            ContractStatus::initial_for(today - chrono::Duration::days(3), today),
            ContractStatus::Active
        );
        assert_eq!(
            ContractStatus::initial_for(today + chrono::Duration::days(10), today),
            ContractStatus::Pending
        );
    }

    #[test]
    fn payment_cycle_parsing_defaults_to_monthly() {
        assert_eq!(
            PaymentCycle::parse_lenient(Some("Quarterly")),
            PaymentCycle::Quarterly
        );
        assert_eq!(
            PaymentCycle::parse_lenient(Some("semi_annually")).months(),
            6
        );
        assert_eq!(PaymentCycle::parse_lenient(Some("weekly")), PaymentCycle::Monthly);
        assert_eq!(PaymentCycle::parse_lenient(None).months(), 1);
    }
}
