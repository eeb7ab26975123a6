use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use loyalty_core::{Balance, Order, OrderNumber, OrderOutcome, OrderStatus, UserId, Withdrawal};

use super::{LedgerStore, OrderInsert, StoreError, WithdrawOutcome};

#[derive(Debug, Default)]
struct State {
    // Insertion order doubles as creation order.
    orders: Vec<Order>,
    withdrawals: Vec<Withdrawal>,
}

impl State {
    fn order_mut(&mut self, number: &OrderNumber) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| &o.number == number)
    }

    fn balance(&self, owner: UserId) -> Balance {
        let accrued = self
            .orders
            .iter()
            .filter(|o| o.owner == owner && o.status == OrderStatus::Processed)
            .filter_map(|o| o.accrual)
            .fold(Decimal::ZERO, |acc, v| acc + v);
        let withdrawn = self
            .withdrawals
            .iter()
            .filter(|w| w.owner == owner)
            .fold(Decimal::ZERO, |acc, w| acc + w.sum);
        Balance::from_totals(accrued, withdrawn)
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A single mutex serializes every operation, which
/// gives the same atomicity guarantees the Postgres store gets from
/// transactions and unique constraints.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_order(&self, order: &Order) -> Result<OrderInsert, StoreError> {
        let mut state = self.lock()?;
        if let Some(existing) = state.orders.iter().find(|o| o.number == order.number) {
            return Ok(OrderInsert::Existing {
                owner: existing.owner,
            });
        }
        state.orders.push(order.clone());
        Ok(OrderInsert::Inserted)
    }

    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let state = self.lock()?;
        Ok(state.orders.iter().find(|o| &o.number == number).cloned())
    }

    async fn orders_for(&self, owner: UserId) -> Result<Vec<Order>, StoreError> {
        let state = self.lock()?;
        let mut orders: Vec<_> = state
            .orders
            .iter()
            .filter(|o| o.owner == owner)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn unterminated_orders(&self) -> Result<Vec<OrderNumber>, StoreError> {
        let state = self.lock()?;
        let mut pending: Vec<_> = state
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .collect();
        pending.sort_by_key(|o| o.created_at);
        Ok(pending.into_iter().map(|o| o.number.clone()).collect())
    }

    async fn mark_in_flight(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        Ok(state
            .order_mut(number)
            .is_some_and(|o| o.mark_in_flight(status)))
    }

    async fn complete_order(
        &self,
        number: &OrderNumber,
        outcome: OrderOutcome,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        Ok(state.order_mut(number).is_some_and(|o| o.complete(outcome)))
    }

    async fn balance(&self, owner: UserId) -> Result<Balance, StoreError> {
        Ok(self.lock()?.balance(owner))
    }

    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<WithdrawOutcome, StoreError> {
        let mut state = self.lock()?;
        if state
            .withdrawals
            .iter()
            .any(|w| w.order_number == withdrawal.order_number)
        {
            return Ok(WithdrawOutcome::Duplicate);
        }

        let balance = state.balance(withdrawal.owner);
        let Some(after) = balance.after_withdrawal(withdrawal.sum) else {
            return Ok(WithdrawOutcome::InsufficientFunds(balance));
        };

        state.withdrawals.push(withdrawal.clone());
        Ok(WithdrawOutcome::Recorded(after))
    }

    async fn withdrawals_for(&self, owner: UserId) -> Result<Vec<Withdrawal>, StoreError> {
        let state = self.lock()?;
        let mut withdrawals: Vec<_> = state
            .withdrawals
            .iter()
            .filter(|w| w.owner == owner)
            .cloned()
            .collect();
        withdrawals.sort_by_key(|w| w.created_at);
        Ok(withdrawals)
    }
}
