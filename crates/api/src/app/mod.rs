//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: ledger store, scoring client and reconciliation wiring
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Protected routes: require a principal.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::principal_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/user", protected)
}
