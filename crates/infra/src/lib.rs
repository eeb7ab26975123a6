//! Infrastructure layer: ledger storage, the scoring client, the order
//! reconciler and the application service wired on top of them.

pub mod config;
pub mod reconciler;
pub mod scoring;
pub mod service;
pub mod store;
pub mod supervisor;

pub use config::Config;
pub use reconciler::{OrderReconciler, ReconcileExit, ReconcilerConfig};
pub use scoring::{HttpScoringClient, ScoringClient, ScoringClientConfig, ScoringError};
pub use service::{LoyaltyService, OrderTracker, Registration, ServiceError, ServiceResult};
pub use store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreConfig, StoreError};
pub use supervisor::ReconciliationSupervisor;
