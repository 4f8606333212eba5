use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::BillType;

/// Inserts retry on a unique-violation with a fresh suffix this many times.
pub const MAX_NUMBER_ATTEMPTS: u32 = 5;

const SUFFIX_MODULUS: u64 = 1_000_000;

/// `BILL` + last three characters of the contract number + type letter +
/// six-digit suffix, e.g. `BILL042U381920`.
pub fn format_bill_number(contract_number: &str, bill_type: BillType, suffix: u32) -> String {
    format!(
        "BILL{}{}{:06}",
        contract_tail(contract_number),
        bill_type.letter(),
        u64::from(suffix) % SUFFIX_MODULUS
    )
}

/// `CT` + signing date + six-digit suffix.
pub fn format_contract_number(signed_on: NaiveDate, suffix: u32) -> String {
    format!(
        "CT{}{:06}",
        signed_on.format("%Y%m%d"),
        u64::from(suffix) % SUFFIX_MODULUS
    )
}

/// First attempt is derived from the clock; retries mix in random bits so
/// two writers colliding on the same millisecond diverge.
pub fn number_suffix(now: DateTime<Utc>, attempt: u32) -> u32 {
    let millis = now.timestamp_millis().unsigned_abs();
    let base = millis % SUFFIX_MODULUS;
    if attempt == 0 {
        return base as u32;
    }
    let entropy = Uuid::new_v4().as_u128() as u64;
    ((base ^ entropy) % SUFFIX_MODULUS) as u32
}

fn contract_tail(contract_number: &str) -> String {
    let chars = contract_number
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<Vec<_>>();
    let start = chars.len().saturating_sub(3);
    let tail = chars[start..].iter().collect::<String>().to_ascii_uppercase();
    format!("{tail:0>3}")
}
