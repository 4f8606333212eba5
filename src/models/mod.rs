//! Typed rows for the portfolio, lease and billing tables.

pub mod bill;
pub mod contract;
pub mod meter;
pub mod property;
pub mod setting;

pub use bill::{
    Bill, BillDetail, BillMetadata, BillStatus, BillType, NewBill, NewBillDetail, PriceSource,
    UtilityBreakdownItem,
};
pub use contract::{Contract, ContractStatus, NewContract, PaymentCycle};
pub use meter::{Meter, MeterReading, MeterType, NewMeter, NewMeterReading, ReadingStatus};
pub use property::{Renter, Room, RoomStatus};
pub use setting::GlobalSetting;
