//! Translation of node sizes into runtime units

use crate::{Error, Result};

/// CFS scheduling period, in microseconds, used for every node
pub const CPU_PERIOD: i64 = 100_000;

/// Parses a binary memory quantity ("2Gi", "512Mi", "1Ki") into bytes.
///
/// Suffixes are matched case-insensitively and the prefix must be a whole
/// number. Bare numbers and decimal suffixes are rejected.
pub fn parse_memory(quantity: &str) -> Result<i64> {
    let q = quantity.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(n) = q.strip_suffix("ki") {
        (n, 1i64 << 10)
    } else if let Some(n) = q.strip_suffix("mi") {
        (n, 1i64 << 20)
    } else if let Some(n) = q.strip_suffix("gi") {
        (n, 1i64 << 30)
    } else {
        return Err(Error::invalid_quantity(format!(
            "memory {quantity:?} must end in Ki, Mi or Gi"
        )));
    };

    let value: i64 = digits.parse().map_err(|_| {
        Error::invalid_quantity(format!("memory {quantity:?} is not a whole number"))
    })?;
    if value < 0 {
        return Err(Error::invalid_quantity(format!(
            "memory {quantity:?} is negative"
        )));
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::invalid_quantity(format!("memory {quantity:?} is too large")))
}

/// Lenient form of [`parse_memory`]: unparseable input yields 0, which the
/// runtime treats as "no limit".
pub fn parse_memory_or_zero(quantity: &str) -> i64 {
    parse_memory(quantity).unwrap_or(0)
}

/// CPU quota and period (microseconds) for a whole-CPU count
pub fn cpu_limits(cpu_count: u32) -> (i64, i64) {
    (i64::from(cpu_count) * CPU_PERIOD, CPU_PERIOD)
}
