use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use loyalty_core::UserId;

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// Header carrying the authenticated user id, set by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

pub async fn principal_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let user_id = match extract_user_id(req.headers()) {
        Ok(id) => id,
        Err(msg) => return json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg),
    };

    req.extensions_mut().insert(PrincipalContext::new(user_id));
    next.run(req).await
}

fn extract_user_id(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers
        .get(USER_ID_HEADER)
        .ok_or("missing user id header")?;

    let value = header.to_str().map_err(|_| "user id header is not valid text")?;

    value.parse().map_err(|_| "user id header is not a valid id")
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn user_id_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(extract_user_id(&headers).is_err());

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(extract_user_id(&headers).is_err());

        let id = UserId::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(extract_user_id(&headers).unwrap(), id);
    }
}
