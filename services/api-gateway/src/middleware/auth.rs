//! Bearer-token authentication and role guards.
//!
//! Access tokens are stateless, so the extractor never touches the database.
//! Handlers that need the tenant row load it through [`super::tier`].

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::Utc;
use uuid::Uuid;

use pharmy_models::UserRole;
use pharmy_utils::{PharmyError, PharmyResult};

use crate::AppState;

pub const STAFF_ROLES: &[UserRole] = &[UserRole::Admin, UserRole::Pharmacist];
pub const ADMIN_ONLY: &[UserRole] = &[UserRole::Admin];

/// The caller behind a verified access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: UserRole,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = PharmyError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| PharmyError::authentication("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| PharmyError::authentication("Invalid authorization header format"))?;

        let claims = state.tokens.verify_access_token(token, Utc::now())?;

        Ok(Self {
            user_id: claims.sub,
            tenant_id: claims.tid,
            role: claims.role,
        })
    }
}

impl AuthUser {
    pub fn require_roles(&self, roles: &[UserRole]) -> PharmyResult<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            tracing::debug!(user_id = %self.user_id, role = %self.role, "Role check failed");
            Err(PharmyError::forbidden())
        }
    }

    pub fn require_staff(&self) -> PharmyResult<()> {
        self.require_roles(STAFF_ROLES)
    }

    pub fn require_admin(&self) -> PharmyResult<()> {
        self.require_roles(ADMIN_ONLY)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Self-service or administrator access to another user's record.
    pub fn can_manage(&self, user_id: Uuid) -> bool {
        self.user_id == user_id || self.is_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: UserRole) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn test_role_guards() {
        assert!(caller(UserRole::Admin).require_admin().is_ok());
        assert!(caller(UserRole::Pharmacist).require_staff().is_ok());

        let err = caller(UserRole::User).require_staff().unwrap_err();
        assert_eq!(err.http_status_code(), 403);
        assert_eq!(err.to_string(), "Authorization error: Forbidden - Insufficient permissions");
        assert!(caller(UserRole::Pharmacist).require_admin().is_err());
    }

    #[test]
    fn test_can_manage_self_or_as_admin() {
        let user = caller(UserRole::User);
        assert!(user.can_manage(user.user_id));
        assert!(!user.can_manage(Uuid::new_v4()));
        assert!(caller(UserRole::Admin).can_manage(Uuid::new_v4()));
    }
}
