//! Point withdrawals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::{DomainError, DomainResult};
use crate::id::UserId;
use crate::number::OrderNumber;

/// An immutable, recorded withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    /// Caller-supplied transaction id, unique across all withdrawals.
    pub order_number: OrderNumber,
    pub owner: UserId,
    pub sum: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Withdrawal {
    /// Build a withdrawal, rejecting non-positive sums.
    pub fn new(
        owner: UserId,
        order_number: OrderNumber,
        sum: Decimal,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        validate_sum(sum)?;
        Ok(Self {
            order_number,
            owner,
            sum,
            created_at,
        })
    }
}

pub fn validate_sum(sum: Decimal) -> DomainResult<()> {
    if sum <= Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "withdrawal sum must be positive, got {sum}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn non_positive_sums_are_rejected() {
        let n = OrderNumber::parse("2377225624").unwrap();
        for sum in [dec!(0), dec!(-1), dec!(-0.01)] {
            let err = Withdrawal::new(UserId::new(), n.clone(), sum, Utc::now()).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
        assert!(Withdrawal::new(UserId::new(), n, dec!(0.01), Utc::now()).is_ok());
    }
}
