//! Process configuration.
//!
//! Parsed once at startup from flags and environment variables (flags win),
//! then split into per-component values.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::reconciler::ReconcilerConfig;
use crate::scoring::ScoringClientConfig;
use crate::store::StoreConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "loyalty-api", about = "Loyalty points backend", version)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[arg(short = 'a', long, env = "RUN_ADDRESS", default_value = "0.0.0.0:8080")]
    pub run_address: SocketAddr,

    /// Postgres connection string.
    #[arg(short = 'd', long, env = "DATABASE_URI")]
    pub database_uri: String,

    /// Base address of the accrual scoring service.
    #[arg(short = 'r', long, env = "ACCRUAL_SYSTEM_ADDRESS")]
    pub accrual_system_address: String,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 2000)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    /// Pause after a 429 without a `Retry-After` header.
    #[arg(long, env = "RATE_LIMIT_BACKOFF_SECS", default_value_t = 60)]
    pub rate_limit_backoff_secs: u64,

    /// Consecutive 204 replies before a task gives up; 0 never gives up.
    #[arg(long, env = "MAX_UNKNOWN_POLLS", default_value_t = 30)]
    pub max_unknown_polls: u32,

    #[arg(long, env = "MAX_DB_CONNECTIONS", default_value_t = 20)]
    pub max_db_connections: u32,

    /// Upper bound for draining reconciliation tasks on shutdown.
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

impl Config {
    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            rate_limit_backoff: Duration::from_secs(self.rate_limit_backoff_secs),
            max_unknown_polls: (self.max_unknown_polls > 0).then_some(self.max_unknown_polls),
        }
    }

    pub fn scoring(&self) -> ScoringClientConfig {
        ScoringClientConfig::new(self.accrual_system_address.clone())
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }

    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            max_connections: self.max_db_connections,
            ..StoreConfig::new(self.database_uri.clone())
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
