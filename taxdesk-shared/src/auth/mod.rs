/// Authentication and authorization utilities
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and strength rules
/// - [`jwt`]: Access token generation and validation
/// - [`tokens`]: One-time tokens for email verification and password reset
/// - [`middleware`]: Bearer token resolution into a [`middleware::Principal`]
/// - [`authorization`]: Role and ownership checks
///
/// # Example
///
/// ```no_run
/// use taxdesk_shared::auth::password::{hash_password, verify_password};
/// use taxdesk_shared::auth::jwt::{create_token, validate_token, Claims};
/// use taxdesk_shared::models::user::Role;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("Sup3r$ecret")?;
/// assert!(verify_password("Sup3r$ecret", &hash)?);
///
/// let claims = Claims::new(Uuid::new_v4(), "jane@example.com".into(), Role::Customer, chrono::Duration::days(7));
/// let token = create_token(&claims, "secret-key-at-least-32-bytes-long!!")?;
/// let decoded = validate_token(&token, "secret-key-at-least-32-bytes-long!!")?;
/// assert_eq!(decoded.sub, claims.sub);
/// # Ok(())
/// # }
/// ```

pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod tokens;
