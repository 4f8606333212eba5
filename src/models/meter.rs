use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterType {
    Electricity,
    ColdWater,
    HotWater,
    Gas,
}

impl MeterType {
    pub const ALL: [MeterType; 4] = [
        MeterType::Electricity,
        MeterType::ColdWater,
        MeterType::HotWater,
        MeterType::Gas,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Electricity => "ELECTRICITY",
            Self::ColdWater => "COLD_WATER",
            Self::HotWater => "HOT_WATER",
            Self::Gas => "GAS",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|meter_type| meter_type.as_str() == normalized)
    }

    /// Label used in bill remarks.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Electricity => "电表",
            Self::ColdWater => "冷水表",
            Self::HotWater => "热水表",
            Self::Gas => "燃气表",
        }
    }

    pub fn default_unit(self) -> &'static str {
        match self {
            Self::Electricity => "度",
            Self::ColdWater | Self::HotWater => "吨",
            Self::Gas => "立方米",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingStatus {
    Pending,
    Confirmed,
    Billed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Meter {
    pub id: Uuid,
    pub room_id: Uuid,
    pub meter_type: MeterType,
    pub display_name: String,
    pub unit_price: Option<f64>,
    pub unit: String,
    pub location: Option<String>,
    pub is_active: bool,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMeter {
    pub room_id: Uuid,
    pub meter_type: MeterType,
    pub display_name: String,
    pub unit_price: Option<f64>,
    pub unit: String,
    pub location: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MeterReading {
    pub id: Uuid,
    pub meter_id: Uuid,
    pub contract_id: Option<Uuid>,
    pub previous_reading: f64,
    pub current_reading: f64,
    pub usage: f64,
    pub unit_price: f64,
    pub amount: f64,
    pub reading_date: NaiveDate,
    pub period: Option<String>,
    pub status: ReadingStatus,
    pub is_billed: bool,
    pub operator: Option<String>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMeterReading {
    pub meter_id: Uuid,
    pub contract_id: Option<Uuid>,
    pub previous_reading: f64,
    pub current_reading: f64,
    pub usage: f64,
    pub unit_price: f64,
    pub amount: f64,
    pub reading_date: NaiveDate,
    pub period: Option<String>,
    pub status: ReadingStatus,
    pub operator: Option<String>,
    pub remarks: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::MeterType;

    #[test]
    fn parses_meter_types_case_insensitively() {
        assert_eq!(MeterType::parse("electricity"), Some(MeterType::Electricity));
        assert_eq!(MeterType::parse(" COLD_WATER "), Some(MeterType::ColdWater));
        assert_eq!(MeterType::parse("steam"), None);
    }
}
