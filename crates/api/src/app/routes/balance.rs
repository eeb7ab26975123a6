use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.loyalty.balance(principal.user_id()).await {
        Ok(balance) => (StatusCode::OK, Json(balance)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// `POST /api/user/balance/withdraw` with `{"order": "...", "sum": 751}`.
pub async fn withdraw(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::WithdrawRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return dto::json_rejection(rejection),
    };

    match services
        .loyalty
        .withdraw(principal.user_id(), &body.order, body.sum)
        .await
    {
        Ok(balance) => (StatusCode::OK, Json(balance)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_withdrawals(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let withdrawals = match services.loyalty.withdrawals(principal.user_id()).await {
        Ok(v) => v,
        Err(e) => return errors::service_error_to_response(e),
    };

    if withdrawals.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let items: Vec<dto::WithdrawalResponse> = withdrawals.into_iter().map(Into::into).collect();
    (StatusCode::OK, Json(items)).into_response()
}
