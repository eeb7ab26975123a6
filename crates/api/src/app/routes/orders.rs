use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use loyalty_infra::Registration;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

/// `POST /api/user/orders` with the order number as a plain-text body.
pub async fn register_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: String,
) -> axum::response::Response {
    match services
        .loyalty
        .register_order(principal.user_id(), &body)
        .await
    {
        Ok(Registration::Accepted) => StatusCode::ACCEPTED.into_response(),
        Ok(Registration::AlreadyRegistered) => StatusCode::OK.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    let orders = match services.loyalty.orders(principal.user_id()).await {
        Ok(v) => v,
        Err(e) => return errors::service_error_to_response(e),
    };

    if orders.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let items: Vec<dto::OrderResponse> = orders.into_iter().map(Into::into).collect();
    (StatusCode::OK, Json(items)).into_response()
}
