//! Loyalty use cases invoked by the HTTP adapter.
//!
//! ```text
//! register_order ─► validate number ─► insert NEW ─► track (reconciler task)
//! withdraw       ─► validate id/sum ─► atomic check-and-insert in the store
//! orders / balance / withdrawals ─► read-only queries
//! ```
//!
//! The service holds no locks of its own; every consistency guarantee comes
//! from the [`LedgerStore`].

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, instrument};

use loyalty_core::{Balance, DomainError, Order, OrderNumber, UserId, Withdrawal};

use crate::store::{LedgerStore, OrderInsert, StoreError, WithdrawOutcome};

/// Hands freshly registered orders to whatever reconciles them.
pub trait OrderTracker: Send + Sync {
    fn track(&self, number: OrderNumber);
}

/// Outcome of a successful order registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New order, now tracked.
    Accepted,
    /// The caller had already registered this number; nothing changed.
    AlreadyRegistered,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input: non-digit number, non-positive sum.
    #[error("{0}")]
    Validation(String),

    /// Well-formed number with a bad checksum.
    #[error("order number {0} fails the checksum")]
    InvalidOrderNumber(String),

    #[error("order number is registered by another user")]
    OrderOwnedByAnotherUser,

    #[error("withdrawal {0} was already recorded")]
    DuplicateWithdrawal(OrderNumber),

    #[error("insufficient funds: requested {requested}, available {current}")]
    InsufficientFunds { requested: Decimal, current: Decimal },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidOrderNumber(number) => ServiceError::InvalidOrderNumber(number),
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ServiceError::Validation(msg)
            }
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Clone)]
pub struct LoyaltyService {
    store: Arc<dyn LedgerStore>,
    tracker: Arc<dyn OrderTracker>,
}

impl LoyaltyService {
    pub fn new(store: Arc<dyn LedgerStore>, tracker: Arc<dyn OrderTracker>) -> Self {
        Self { store, tracker }
    }

    /// Register an order for `owner` and start reconciling it.
    ///
    /// Re-registering one's own order is a no-op. A number owned by someone
    /// else is a conflict.
    #[instrument(skip(self))]
    pub async fn register_order(&self, owner: UserId, raw_number: &str) -> ServiceResult<Registration> {
        let number = OrderNumber::parse(raw_number)?;
        let order = Order::new(number.clone(), owner, Utc::now());

        match self.store.insert_order(&order).await? {
            OrderInsert::Inserted => {
                info!(order = %number, "order registered");
                self.tracker.track(number);
                Ok(Registration::Accepted)
            }
            OrderInsert::Existing { owner: existing } if existing == owner => {
                Ok(Registration::AlreadyRegistered)
            }
            OrderInsert::Existing { .. } => Err(ServiceError::OrderOwnedByAnotherUser),
        }
    }

    /// Orders of `owner`, oldest first.
    pub async fn orders(&self, owner: UserId) -> ServiceResult<Vec<Order>> {
        Ok(self.store.orders_for(owner).await?)
    }

    pub async fn balance(&self, owner: UserId) -> ServiceResult<Balance> {
        Ok(self.store.balance(owner).await?)
    }

    /// Spend `sum` points under the transaction id `raw_number`.
    ///
    /// A reused id is rejected before funds are looked at.
    #[instrument(skip(self))]
    pub async fn withdraw(&self, owner: UserId, raw_number: &str, sum: Decimal) -> ServiceResult<Balance> {
        let number = OrderNumber::parse(raw_number)?;
        let withdrawal = Withdrawal::new(owner, number.clone(), sum, Utc::now())?;

        match self.store.withdraw(&withdrawal).await? {
            WithdrawOutcome::Recorded(balance) => {
                info!(order = %number, "withdrawal recorded");
                Ok(balance)
            }
            WithdrawOutcome::InsufficientFunds(balance) => Err(ServiceError::InsufficientFunds {
                requested: sum,
                current: balance.current,
            }),
            WithdrawOutcome::Duplicate => Err(ServiceError::DuplicateWithdrawal(number)),
        }
    }

    /// Withdrawals of `owner`, oldest first.
    pub async fn withdrawals(&self, owner: UserId) -> ServiceResult<Vec<Withdrawal>> {
        Ok(self.store.withdrawals_for(owner).await?)
    }
}
