//! Accrual orders and their scoring lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::UserId;
use crate::number::OrderNumber;

/// Lifecycle status of an order.
///
/// `New -> Processing -> {Processed, Invalid}`; the last two are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "INVALID" => Ok(OrderStatus::Invalid),
            other => Err(DomainError::validation(format!("unknown order status: {other}"))),
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final scoring result written once per order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Processed { accrual: Decimal },
    Invalid,
}

impl OrderOutcome {
    pub fn status(&self) -> OrderStatus {
        match self {
            OrderOutcome::Processed { .. } => OrderStatus::Processed,
            OrderOutcome::Invalid => OrderStatus::Invalid,
        }
    }

    pub fn accrual(&self) -> Option<Decimal> {
        match self {
            OrderOutcome::Processed { accrual } => Some(*accrual),
            OrderOutcome::Invalid => None,
        }
    }
}

/// A registered order as persisted by the ledger store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub number: OrderNumber,
    pub owner: UserId,
    pub status: OrderStatus,
    /// Present only once `status == Processed`.
    pub accrual: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// A freshly registered order awaiting scoring.
    pub fn new(number: OrderNumber, owner: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            number,
            owner,
            status: OrderStatus::New,
            accrual: None,
            created_at,
        }
    }

    /// Move to an in-flight status. Terminal orders are left untouched;
    /// returns whether the order changed.
    pub fn mark_in_flight(&mut self, status: OrderStatus) -> bool {
        if self.status.is_terminal() || status.is_terminal() || self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    /// Apply the terminal scoring result. Returns `false` (and changes
    /// nothing) if the order is already terminal.
    pub fn complete(&mut self, outcome: OrderOutcome) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = outcome.status();
        self.accrual = outcome.accrual();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::new(OrderNumber::parse("1234567897").unwrap(), UserId::new(), Utc::now())
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for s in [
            OrderStatus::New,
            OrderStatus::Processing,
            OrderStatus::Processed,
            OrderStatus::Invalid,
        ] {
            assert_eq!(OrderStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(OrderStatus::parse("REGISTERED").is_err());
    }

    #[test]
    fn terminal_write_happens_once() {
        let mut o = order();
        assert!(o.mark_in_flight(OrderStatus::Processing));
        assert!(o.complete(OrderOutcome::Processed { accrual: dec!(42.5) }));
        assert_eq!(o.status, OrderStatus::Processed);
        assert_eq!(o.accrual, Some(dec!(42.5)));

        assert!(!o.complete(OrderOutcome::Invalid));
        assert!(!o.mark_in_flight(OrderStatus::Processing));
        assert_eq!(o.status, OrderStatus::Processed);
        assert_eq!(o.accrual, Some(dec!(42.5)));
    }

    #[test]
    fn invalid_outcome_has_no_accrual() {
        let mut o = order();
        assert!(o.complete(OrderOutcome::Invalid));
        assert_eq!(o.status, OrderStatus::Invalid);
        assert_eq!(o.accrual, None);
    }

    #[test]
    fn in_flight_refuses_terminal_target() {
        let mut o = order();
        assert!(!o.mark_in_flight(OrderStatus::Processed));
        assert!(!o.mark_in_flight(OrderStatus::New));
        assert_eq!(o.status, OrderStatus::New);
    }
}
