/// Bearer token authentication
///
/// The HTTP layer extracts the `Authorization` header, calls [`authenticate`]
/// and stores the resulting [`Principal`] in the request extensions. Handlers
/// then pass the principal to the checks in [`super::authorization`].

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::jwt::{validate_token, JwtError};
use crate::models::user::{Role, User};

/// The authenticated caller of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub is_verified: bool,
}

impl Principal {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            is_verified: user.is_verified,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingCredentials,

    #[error("Authorization header must use the Bearer scheme")]
    InvalidFormat,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Email address has not been verified")]
    NotVerified,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::TokenExpired,
            JwtError::Invalid(reason) => {
                tracing::debug!(reason = %reason, "Rejected bearer token");
                AuthError::InvalidToken
            }
            JwtError::CreateError(_) => AuthError::InvalidToken,
        }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingCredentials)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::InvalidFormat);
    }

    Ok(token)
}

/// Validates `token` and loads the live user behind it
///
/// Deleted and unverified users are rejected even when the token is still valid,
/// and the principal carries the user's current role rather than the one in the token.
pub async fn authenticate(pool: &PgPool, token: &str, secret: &str) -> Result<Principal, AuthError> {
    let claims = validate_token(token, secret)?;

    let user = User::find_by_id(pool, claims.sub)
        .await?
        .filter(|user| !user.is_deleted())
        .ok_or(AuthError::UserNotFound)?;

    if !user.is_verified {
        return Err(AuthError::NotVerified);
    }

    Ok(Principal::from_user(&user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert!(matches!(bearer_token(None), Err(AuthError::MissingCredentials)));
        assert!(matches!(
            bearer_token(Some("Basic dXNlcjpwYXNz")),
            Err(AuthError::InvalidFormat)
        ));
        assert!(matches!(bearer_token(Some("Bearer   ")), Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_jwt_error_mapping() {
        assert!(matches!(AuthError::from(JwtError::Expired), AuthError::TokenExpired));
        assert!(matches!(
            AuthError::from(JwtError::Invalid("bad signature".into())),
            AuthError::InvalidToken
        ));
    }
}
