//! Derived per-user balance.

use rust_decimal::Decimal;
use serde::Serialize;

/// Balance view derived from accrued and withdrawn totals.
///
/// Not stored anywhere; recomputed from orders and withdrawals on read.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

impl Balance {
    /// `accrued` is the sum of accruals over the user's processed orders,
    /// `withdrawn` the sum over their withdrawals.
    pub fn from_totals(accrued: Decimal, withdrawn: Decimal) -> Self {
        Self {
            current: accrued - withdrawn,
            withdrawn,
        }
    }

    /// Whether `sum` can be withdrawn without driving `current` negative.
    pub fn covers(&self, sum: Decimal) -> bool {
        sum <= self.current
    }

    /// Balance after a withdrawal of `sum`, or `None` if it is not covered.
    pub fn after_withdrawal(&self, sum: Decimal) -> Option<Balance> {
        if !self.covers(sum) {
            return None;
        }
        Some(Balance {
            current: self.current - sum,
            withdrawn: self.withdrawn + sum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn derived_from_totals() {
        let b = Balance::from_totals(dec!(729.98), dec!(229.98));
        assert_eq!(b.current, dec!(500));
        assert_eq!(b.withdrawn, dec!(229.98));
        assert!(b.covers(dec!(500)));
        assert!(!b.covers(dec!(500.01)));
    }

    #[test]
    fn serializes_as_numbers() {
        let b = Balance::from_totals(dec!(500.5), dec!(42));
        let json = serde_json::to_value(b).unwrap();
        assert_eq!(json, serde_json::json!({"current": 458.5, "withdrawn": 42.0}));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Accrue(i64),
        Withdraw(i64),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (1i64..100_000).prop_map(Step::Accrue),
            (1i64..100_000).prop_map(Step::Withdraw),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Applying only covered withdrawals never drives the balance negative,
        /// and the totals stay consistent with a recomputation.
        #[test]
        fn current_never_negative(steps in prop::collection::vec(step(), 0..64)) {
            let mut accrued = Decimal::ZERO;
            let mut withdrawn = Decimal::ZERO;
            let mut balance = Balance::default();

            for s in steps {
                match s {
                    Step::Accrue(cents) => {
                        accrued += Decimal::new(cents, 2);
                        balance = Balance::from_totals(accrued, withdrawn);
                    }
                    Step::Withdraw(cents) => {
                        let sum = Decimal::new(cents, 2);
                        if let Some(next) = balance.after_withdrawal(sum) {
                            withdrawn += sum;
                            balance = next;
                        }
                    }
                }
                prop_assert!(balance.current >= Decimal::ZERO);
                prop_assert_eq!(balance, Balance::from_totals(accrued, withdrawn));
            }
        }
    }
}
