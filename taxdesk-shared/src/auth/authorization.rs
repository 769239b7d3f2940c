/// Role and ownership checks
///
/// Admins pass every ownership check. Everyone else must hold an allowed role
/// or be one of the owners of the resource.
///
/// ```
/// use taxdesk_shared::auth::authorization::{require_access, require_role};
/// use taxdesk_shared::auth::middleware::Principal;
/// use taxdesk_shared::models::user::Role;
/// use uuid::Uuid;
///
/// let principal = Principal {
///     user_id: Uuid::new_v4(),
///     email: "jane@example.com".to_string(),
///     role: Role::Customer,
///     is_verified: true,
/// };
///
/// assert!(require_role(&principal, &[Role::Customer]).is_ok());
/// assert!(require_access(&principal, &[Uuid::new_v4()]).is_err());
/// ```

use uuid::Uuid;

use super::middleware::Principal;
use crate::models::user::Role;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    #[error("Insufficient permissions: requires one of {required:?}, has {actual}")]
    InsufficientRole { required: Vec<Role>, actual: Role },

    #[error("Not authorized to access this resource")]
    NotAuthorized,
}

/// Fails unless the principal's role is in `allowed`
pub fn require_role(principal: &Principal, allowed: &[Role]) -> Result<(), AuthzError> {
    if allowed.contains(&principal.role) {
        Ok(())
    } else {
        Err(AuthzError::InsufficientRole {
            required: allowed.to_vec(),
            actual: principal.role,
        })
    }
}

/// Fails unless the principal is an admin or is `owner_id`
pub fn require_ownership(principal: &Principal, owner_id: Uuid) -> Result<(), AuthzError> {
    require_access(principal, &[owner_id])
}

/// Fails unless the principal is an admin or one of `owner_ids`
pub fn require_access(principal: &Principal, owner_ids: &[Uuid]) -> Result<(), AuthzError> {
    if principal.is_admin() || owner_ids.contains(&principal.user_id) {
        Ok(())
    } else {
        tracing::debug!(user_id = %principal.user_id, "Ownership check failed");
        Err(AuthzError::NotAuthorized)
    }
}
