/// JWT token generation and validation
///
/// Tokens are signed with HS256 and carry the user's id, email and role so that
/// handlers can make coarse decisions before touching the database. The user is
/// still reloaded on every request by [`super::middleware::authenticate`].
///
/// # Claims
///
/// - `sub`: user id
/// - `email`: email at issue time
/// - `role`: user role at issue time
/// - `iss`: always `"taxdesk"`
/// - `iat` / `nbf` / `exp`: unix timestamps
///
/// # Example
///
/// ```
/// use taxdesk_shared::auth::jwt::{create_token, validate_token, Claims};
/// use taxdesk_shared::models::user::Role;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let secret = "an-example-secret-of-at-least-32-bytes";
/// let claims = Claims::new(
///     Uuid::new_v4(),
///     "jane@example.com".to_string(),
///     Role::Customer,
///     chrono::Duration::days(7),
/// );
/// let token = create_token(&claims, secret)?;
///
/// let validated = validate_token(&token, secret)?;
/// assert_eq!(validated.role, Role::Customer);
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::Role;

/// Issuer written into and required from every token
pub const ISSUER: &str = "taxdesk";

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to create token: {0}")]
    CreateError(String),

    #[error("Token has expired")]
    Expired,

    /// Bad signature, wrong issuer, malformed token or not yet valid
    #[error("Invalid token: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,

    pub email: String,
    pub role: Role,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
}

impl Claims {
    /// Claims for `user_id` valid from now for `expires_in`
    pub fn new(user_id: Uuid, email: String, role: Role, expires_in: Duration) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id,
            email,
            role,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            nbf: now.timestamp(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// Signs `claims` with HS256
///
/// # Errors
///
/// Returns `JwtError::CreateError` if encoding fails.
pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    let key = EncodingKey::from_secret(secret.as_bytes());

    encode(&Header::new(Algorithm::HS256), claims, &key)
        .map_err(|e| JwtError::CreateError(e.to_string()))
}

/// Verifies signature, issuer, `exp` and `nbf` and returns the claims
///
/// # Errors
///
/// `JwtError::Expired` for an expired token, `JwtError::Invalid` for anything else.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.leeway = 0;

    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid(e.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    fn claims(expires_in: Duration) -> Claims {
        Claims::new(
            Uuid::new_v4(),
            "jane@example.com".to_string(),
            Role::Accountant,
            expires_in,
        )
    }

    #[test]
    fn test_create_and_validate_token() {
        let claims = claims(Duration::days(7));
        let token = create_token(&claims, SECRET).expect("Should create token");

        let validated = validate_token(&token, SECRET).expect("Should validate token");
        assert_eq!(validated, claims);
        assert_eq!(validated.iss, "taxdesk");
        assert!(!validated.is_expired());
    }

    #[test]
    fn test_validate_with_wrong_secret() {
        let token = create_token(&claims(Duration::hours(1)), SECRET).unwrap();

        let result = validate_token(&token, "another-secret-key-at-least-32-bytes");
        assert!(matches!(result, Err(JwtError::Invalid(_))));
    }

    #[test]
    fn test_validate_expired_token() {
        // Expired one hour ago
        let claims = claims(Duration::seconds(-3600));
        assert!(claims.is_expired());

        let token = create_token(&claims, SECRET).unwrap();
        let result = validate_token(&token, SECRET);

        assert!(matches!(result, Err(JwtError::Expired)));
    }

    #[test]
    fn test_validate_tampered_token() {
        let token = create_token(&claims(Duration::hours(1)), SECRET).unwrap();

        // Swap the payload for one claiming the admin role
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = create_token(
            &Claims::new(
                Uuid::new_v4(),
                "mallory@example.com".to_string(),
                Role::Admin,
                Duration::hours(1),
            ),
            "forger-secret-key-at-least-32-bytes-long",
        )
        .unwrap();
        let forged_payload = forged.split('.').nth(1).unwrap().to_string();
        parts[1] = &forged_payload;
        let tampered = parts.join(".");

        let result = validate_token(&tampered, SECRET);
        assert!(matches!(result, Err(JwtError::Invalid(_))));
    }

    #[test]
    fn test_validate_garbage() {
        assert!(matches!(
            validate_token("not-a-jwt", SECRET),
            Err(JwtError::Invalid(_))
        ));
    }
}
