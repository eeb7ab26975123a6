use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use loyalty_infra::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ServiceError::InvalidOrderNumber(_) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_order_number",
            err.to_string(),
        ),
        ServiceError::OrderOwnedByAnotherUser => {
            json_error(StatusCode::CONFLICT, "order_conflict", err.to_string())
        }
        ServiceError::DuplicateWithdrawal(_) => {
            json_error(StatusCode::CONFLICT, "duplicate_withdrawal", err.to_string())
        }
        ServiceError::InsufficientFunds { .. } => {
            json_error(StatusCode::PAYMENT_REQUIRED, "insufficient_funds", err.to_string())
        }
        ServiceError::Store(e) => {
            tracing::error!(error = %e, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal storage error")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use loyalty_core::OrderNumber;
    use loyalty_infra::StoreError;
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (ServiceError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                ServiceError::InvalidOrderNumber("12345678904".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ServiceError::OrderOwnedByAnotherUser, StatusCode::CONFLICT),
            (
                ServiceError::DuplicateWithdrawal(OrderNumber::parse("2377225624").unwrap()),
                StatusCode::CONFLICT,
            ),
            (
                ServiceError::InsufficientFunds {
                    requested: Decimal::TEN,
                    current: Decimal::ONE,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                ServiceError::Store(StoreError::PoolClosed("balance")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(service_error_to_response(err).status(), status);
        }
    }
}
