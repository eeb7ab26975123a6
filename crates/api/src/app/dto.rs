use axum::extract::rejection::JsonRejection;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use loyalty_core::{Order, OrderStatus, Withdrawal};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            number: order.number.into_inner(),
            status: order.status,
            accrual: order.accrual,
            uploaded_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(w: Withdrawal) -> Self {
        Self {
            order: w.order_number.into_inner(),
            sum: w.sum,
            processed_at: w.created_at,
        }
    }
}

/// Map a JSON body rejection to a 400 instead of axum's default 415/422.
pub fn json_rejection(rejection: JsonRejection) -> axum::response::Response {
    errors::json_error(
        axum::http::StatusCode::BAD_REQUEST,
        "invalid_json",
        rejection.body_text(),
    )
}
