pub mod bill_aggregation;
pub mod bill_calculation;
pub mod bill_numbers;
pub mod contract_lifecycle;
pub mod meter_validation;
pub mod metering;
pub mod reading_consistency;
pub mod remarks;
pub mod rent_schedule;
pub mod scheduler;
pub mod settings;
pub mod settlement;
