use axum::{
    routing::{get, post},
    Router,
};

pub mod balance;
pub mod orders;
pub mod system;

/// Router for all authenticated (principal-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/orders", post(orders::register_order).get(orders::list_orders))
        .route("/balance", get(balance::get_balance))
        .route("/balance/withdraw", post(balance::withdraw))
        .route("/withdrawals", get(balance::list_withdrawals))
}
