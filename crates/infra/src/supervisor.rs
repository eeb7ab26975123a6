//! Owner of all reconciliation tasks.
//!
//! - one task per unterminated order, spawned on registration or recovery
//! - startup recovery re-spawns tasks for every `NEW`/`PROCESSING` order
//! - graceful shutdown cancels every task and waits (bounded) for them

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use loyalty_core::OrderNumber;

use crate::reconciler::{OrderReconciler, ReconcileExit};
use crate::service::OrderTracker;
use crate::store::{LedgerStore, StoreError};

/// Spawns and tracks one reconciliation task per order.
pub struct ReconciliationSupervisor {
    store: Arc<dyn LedgerStore>,
    reconciler: Arc<OrderReconciler>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ReconciliationSupervisor {
    pub fn new(store: Arc<dyn LedgerStore>, reconciler: OrderReconciler) -> Self {
        Self {
            store,
            reconciler: Arc::new(reconciler),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Spawn tasks for every order left unterminated by a previous run.
    ///
    /// Must complete before new registrations are accepted, otherwise an order
    /// registered in between could end up with two tasks.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let pending = self.store.unterminated_orders().await?;
        let count = pending.len();
        for number in pending {
            self.spawn(number);
        }
        info!(orders = count, "resumed reconciliation of unterminated orders");
        Ok(count)
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every task and wait up to `timeout` for them to exit.
    ///
    /// Returns `false` when some tasks were still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!(tasks = self.tasks.len(), "stopping reconciliation tasks");
        self.cancel.cancel();
        self.tasks.close();
        match tokio::time::timeout(timeout, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tasks.len(),
                    "reconciliation tasks did not stop before the deadline"
                );
                false
            }
        }
    }

    fn spawn(&self, number: OrderNumber) {
        if self.cancel.is_cancelled() {
            warn!(order = %number, "shutdown in progress; order left for recovery");
            return;
        }
        let reconciler = self.reconciler.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            match reconciler.run(number.clone(), cancel).await {
                ReconcileExit::StoreFailed => {
                    warn!(order = %number, "reconciliation aborted; order left for recovery")
                }
                ReconcileExit::UnknownToScoring => {
                    info!(order = %number, "reconciliation paused until next startup")
                }
                _ => {}
            }
        });
    }
}

impl OrderTracker for ReconciliationSupervisor {
    fn track(&self, number: OrderNumber) {
        self.spawn(number);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reqwest::StatusCode;
    use rust_decimal_macros::dec;
    use tokio::time;

    use loyalty_core::{Order, OrderStatus, UserId};

    use super::*;
    use crate::reconciler::tests::{reply, report, ScriptedClient};
    use crate::reconciler::ReconcilerConfig;
    use crate::store::InMemoryLedgerStore;

    async fn seeded_store(numbers: &[&str]) -> Arc<InMemoryLedgerStore> {
        let store = Arc::new(InMemoryLedgerStore::new());
        let owner = UserId::new();
        for n in numbers {
            let order = Order::new(OrderNumber::parse(n).unwrap(), owner, Utc::now());
            store.insert_order(&order).await.unwrap();
        }
        store
    }

    fn supervisor(
        store: Arc<InMemoryLedgerStore>,
        client: Arc<ScriptedClient>,
    ) -> ReconciliationSupervisor {
        let reconciler = OrderReconciler::new(store.clone(), client, ReconcilerConfig::default());
        ReconciliationSupervisor::new(store, reconciler)
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_resumes_unterminated_orders() {
        let store = seeded_store(&["1234567897"]).await;
        let finished = OrderNumber::parse("618304455").unwrap();
        store
            .insert_order(&Order::new(finished.clone(), UserId::new(), Utc::now()))
            .await
            .unwrap();
        store
            .complete_order(&finished, loyalty_core::OrderOutcome::Invalid)
            .await
            .unwrap();

        let client = Arc::new(ScriptedClient::new(vec![report(
            "1234567897",
            "PROCESSED",
            Some(12.0),
        )]));
        let supervisor = supervisor(store.clone(), client.clone());

        assert_eq!(supervisor.recover().await.unwrap(), 1);
        assert_eq!(supervisor.in_flight(), 1);

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(supervisor.in_flight(), 0);
        assert_eq!(client.calls().len(), 1);

        let order = store
            .order(&OrderNumber::parse("1234567897").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Processed);
        assert_eq!(order.accrual, Some(dec!(12)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_running_tasks() {
        let store = seeded_store(&["1234567897", "618304455"]).await;
        let client = Arc::new(ScriptedClient::new(vec![reply(StatusCode::NO_CONTENT, "")]));
        let supervisor = supervisor(store.clone(), client);

        supervisor.recover().await.unwrap();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(supervisor.in_flight(), 2);

        assert!(supervisor.shutdown(Duration::from_secs(1)).await);
        assert_eq!(supervisor.in_flight(), 0);
        assert_eq!(store.unterminated_orders().await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tracking_after_shutdown_is_refused() {
        let store = seeded_store(&["1234567897"]).await;
        let client = Arc::new(ScriptedClient::new(vec![reply(StatusCode::NO_CONTENT, "")]));
        let supervisor = supervisor(store, client.clone());

        supervisor.shutdown(Duration::from_secs(1)).await;
        supervisor.track(OrderNumber::parse("1234567897").unwrap());
        assert_eq!(supervisor.in_flight(), 0);

        time::sleep(Duration::from_secs(10)).await;
        assert!(client.calls().is_empty());
    }
}
