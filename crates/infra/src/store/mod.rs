//! Ledger store boundary.
//!
//! The ledger store owns orders, withdrawals and the derived per-user balance.
//! Every cross-task consistency guarantee of the loyalty system is delegated
//! to it:
//!
//! - order numbers are unique across all owners (insert is atomic)
//! - terminal scoring results are written at most once per order
//! - a withdrawal's balance check and insert happen as one atomic step, so
//!   concurrent withdrawals can never drive a balance negative
//! - withdrawal ids are unique
//!
//! Two implementations exist: [`PostgresLedgerStore`] for production and
//! [`InMemoryLedgerStore`] for tests/dev.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use loyalty_core::{Balance, Order, OrderNumber, OrderOutcome, OrderStatus, UserId, Withdrawal};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::{PostgresLedgerStore, StoreConfig};

/// Result of an order insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderInsert {
    /// A new row was created.
    Inserted,
    /// The number was already registered; nothing changed.
    Existing { owner: UserId },
}

/// Result of an atomic withdrawal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// The withdrawal was recorded; carries the balance after it.
    Recorded(Balance),
    /// The balance does not cover the requested sum; nothing was written.
    InsufficientFunds(Balance),
    /// A withdrawal with the same id already exists; nothing was written.
    Duplicate,
}

/// Ledger store operation error.
///
/// These are **infrastructure errors** only. Business outcomes (conflicts,
/// insufficient funds) are reported through [`OrderInsert`] and
/// [`WithdrawOutcome`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    #[error("connection pool closed in {0}")]
    PoolClosed(&'static str),

    #[error("corrupt row in {operation}: {message}")]
    Corrupt {
        operation: &'static str,
        message: String,
    },

    #[error("lock poisoned")]
    Poisoned,
}

/// Durable storage for orders, withdrawals and balances.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a `NEW` order unless its number is already taken.
    async fn insert_order(&self, order: &Order) -> Result<OrderInsert, StoreError>;

    /// Load a single order.
    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;

    /// All orders of a user, oldest first.
    async fn orders_for(&self, owner: UserId) -> Result<Vec<Order>, StoreError>;

    /// Numbers of every order still in `NEW` or `PROCESSING`, oldest first.
    async fn unterminated_orders(&self) -> Result<Vec<OrderNumber>, StoreError>;

    /// Record an in-flight status. Only non-terminal rows change; returns
    /// whether a row changed.
    async fn mark_in_flight(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> Result<bool, StoreError>;

    /// Write the terminal scoring result. Returns `false` when the order was
    /// already terminal (or missing), in which case nothing changed.
    async fn complete_order(
        &self,
        number: &OrderNumber,
        outcome: OrderOutcome,
    ) -> Result<bool, StoreError>;

    /// Current balance of a user.
    async fn balance(&self, owner: UserId) -> Result<Balance, StoreError>;

    /// Atomically check the owner's balance and record the withdrawal.
    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<WithdrawOutcome, StoreError>;

    /// All withdrawals of a user, oldest first.
    async fn withdrawals_for(&self, owner: UserId) -> Result<Vec<Withdrawal>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn insert_order(&self, order: &Order) -> Result<OrderInsert, StoreError> {
        (**self).insert_order(order).await
    }

    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        (**self).order(number).await
    }

    async fn orders_for(&self, owner: UserId) -> Result<Vec<Order>, StoreError> {
        (**self).orders_for(owner).await
    }

    async fn unterminated_orders(&self) -> Result<Vec<OrderNumber>, StoreError> {
        (**self).unterminated_orders().await
    }

    async fn mark_in_flight(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> Result<bool, StoreError> {
        (**self).mark_in_flight(number, status).await
    }

    async fn complete_order(
        &self,
        number: &OrderNumber,
        outcome: OrderOutcome,
    ) -> Result<bool, StoreError> {
        (**self).complete_order(number, outcome).await
    }

    async fn balance(&self, owner: UserId) -> Result<Balance, StoreError> {
        (**self).balance(owner).await
    }

    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<WithdrawOutcome, StoreError> {
        (**self).withdraw(withdrawal).await
    }

    async fn withdrawals_for(&self, owner: UserId) -> Result<Vec<Withdrawal>, StoreError> {
        (**self).withdrawals_for(owner).await
    }
}
