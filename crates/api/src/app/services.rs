use std::sync::Arc;

use loyalty_infra::{
    LedgerStore, LoyaltyService, OrderReconciler, ReconcilerConfig, ReconciliationSupervisor,
    ScoringClient,
};

/// Everything the handlers need, built once at startup.
///
/// The supervisor is exposed so `main` can run recovery before serving and
/// drain tasks on shutdown.
#[derive(Clone)]
pub struct AppServices {
    pub loyalty: LoyaltyService,
    pub supervisor: Arc<ReconciliationSupervisor>,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        scoring: Arc<dyn ScoringClient>,
        reconciler: ReconcilerConfig,
    ) -> Self {
        let reconciler = OrderReconciler::new(store.clone(), scoring, reconciler);
        let supervisor = Arc::new(ReconciliationSupervisor::new(store.clone(), reconciler));
        let loyalty = LoyaltyService::new(store, supervisor.clone());
        Self {
            loyalty,
            supervisor,
        }
    }
}
