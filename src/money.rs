//! Conversion between decimal major units (what clients send) and the
//! integer minor units stored in the database and sent to the gateway.

use rust_decimal::{Decimal, prelude::ToPrimitive};

use crate::error::{AppError, AppResult};

pub const SCALE: u32 = 2;

pub fn to_minor(amount: Decimal, field: &str) -> AppResult<i64> {
    let normalized = amount.normalize();
    if normalized.scale() > SCALE {
        return Err(AppError::Validation(format!(
            "{field} has more than {SCALE} decimal places"
        )));
    }
    normalized
        .checked_mul(Decimal::from(10_i64.pow(SCALE)))
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| AppError::Validation(format!("{field} is out of range")))
}

pub fn from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn converts_major_units() {
        assert_eq!(to_minor(dec!(250.00), "total").unwrap(), 25000);
        assert_eq!(to_minor(dec!(0.5), "total").unwrap(), 50);
        assert_eq!(from_minor(25001).to_string(), "250.01");
    }

    #[test]
    fn rejects_sub_minor_precision() {
        let err = to_minor(dec!(10.005), "unit price").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        // trailing zeros are not extra precision
        assert_eq!(to_minor(dec!(10.500), "total").unwrap(), 1050);
    }

    #[test]
    fn rejects_out_of_range_amounts() {
        assert!(to_minor(Decimal::MAX, "total").is_err());
    }
}
