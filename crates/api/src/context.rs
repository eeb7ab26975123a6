use loyalty_core::UserId;

/// Principal context for a request.
///
/// Inserted by [`crate::middleware::principal_middleware`]; present on every
/// `/api/user` route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: UserId,
}

impl PrincipalContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
