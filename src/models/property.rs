use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    Shared,
    Whole,
    Single,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Vacant,
    Occupied,
    Overdue,
    Maintenance,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vacant => "VACANT",
            Self::Occupied => "OCCUPIED",
            Self::Overdue => "OVERDUE",
            Self::Maintenance => "MAINTENANCE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Room {
    pub id: Uuid,
    pub room_number: String,
    pub floor_number: i32,
    pub building_id: Uuid,
    pub room_type: RoomType,
    pub area: f64,
    pub rent: f64,
    pub status: RoomStatus,
    pub current_renter: Option<String>,
    pub overdue_days: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Renter {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub id_card: Option<String>,
    pub move_in_date: Option<NaiveDate>,
    pub tenant_count: i32,
    pub remarks: Option<String>,
}
