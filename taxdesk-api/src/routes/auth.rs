/// Authentication endpoints
///
/// # Endpoints
///
/// Public, behind the stricter auth rate limiter:
///
/// - `POST /api/auth/register` - Register a customer or accountant
/// - `POST /api/auth/login` - Exchange credentials for a token
/// - `POST /api/auth/verify-email` - Consume an email verification token
/// - `POST /api/auth/forgot-password` - Issue a password reset token
/// - `POST /api/auth/reset-password` - Consume a reset token
///
/// Authenticated:
///
/// - `GET /api/auth/me` - Current user with profile
/// - `POST /api/auth/logout` - No-op, tokens are stateless
/// - `POST /api/auth/refresh` - Issue a fresh token
/// - `PUT /api/auth/change-password` - Change password
///
/// One-time tokens are never stored in plaintext; only their SHA-256 digest
/// is persisted. Delivery by email is outside this service.

use axum::{
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use taxdesk_shared::{
    auth::{jwt, password, tokens},
    models::{
        profile::{Accountant, AccountantDetails, Customer, CustomerDetails, Profile, UserAccount},
        user::{CreateUser, Role, User},
    },
};
use validator::Validate;

use crate::{
    app::{jwt_auth_layer, AppState},
    error::{ApiError, ApiResult},
    extract::{ApiJson, CurrentUser},
    middleware::rate_limit::auth_rate_limit,
    routes::MessageResponse,
};

/// Lifetime of a password reset token
const RESET_TOKEN_TTL_HOURS: i64 = 1;

pub fn router(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify-email", post(verify_email))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route_layer(from_fn_with_state(state.clone(), auth_rate_limit));

    let protected = Router::new()
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/refresh", post(refresh))
        .route("/change-password", put(change_password))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_layer));

    public.merge(protected)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Strength is checked separately
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    pub last_name: String,

    #[validate(length(max = 20, message = "Phone must be at most 20 characters"))]
    pub phone: Option<String>,

    /// `customer` (default) or `accountant`
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Token plus the account it was issued for
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserAccount,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

fn issue_token(state: &AppState, user: &User) -> ApiResult<String> {
    let claims = jwt::Claims::new(user.id, user.email.clone(), user.role, state.token_ttl());
    Ok(jwt::create_token(&claims, state.jwt_secret())?)
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid email or password".to_string())
}

/// Register a new account
///
/// ```text
/// POST /api/auth/register
///
/// {
///   "email": "jane@example.com",
///   "password": "Str0ng!Pass",
///   "firstName": "Jane",
///   "lastName": "Doe",
///   "role": "customer"
/// }
/// ```
///
/// Creates the user and its role profile in one transaction and answers
/// `201` with `{ "token": "...", "user": { ..., "profile": { ... } } }`.
///
/// # Errors
///
/// - `400 validation_error`: Invalid fields, weak password or `role: admin`
/// - `400 conflict`: Email already registered
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    req.validate()?;
    password::validate_password_strength(&req.password)?;

    let role = req.role.unwrap_or(Role::Customer);
    if role == Role::Admin {
        return Err(ApiError::invalid_field(
            "role",
            "Admin accounts cannot be self-registered",
        ));
    }

    let email = req.email.trim().to_lowercase();
    if User::find_by_email(&state.db, &email).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }

    let password_hash = password::hash_password(&req.password)?;
    let verification_token = state
        .config
        .api
        .require_email_verification
        .then(tokens::generate_token);

    // A concurrent registration still loses on users_email_key
    let mut tx = state.db.begin().await?;

    let user = User::create(
        &mut *tx,
        CreateUser {
            email,
            password_hash,
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            phone: req.phone,
            role,
            is_verified: verification_token.is_none(),
            verification_token: verification_token.as_deref().map(tokens::hash_token),
        },
    )
    .await?;

    let profile = match role {
        Role::Customer => Profile::Customer(
            Customer::create(&mut *tx, user.id, CustomerDetails::default()).await?,
        ),
        Role::Accountant => Profile::Accountant(
            Accountant::create(&mut *tx, user.id, AccountantDetails::default()).await?,
        ),
        Role::Admin => Profile::Admin,
    };

    tx.commit().await?;

    tracing::info!(
        user_id = %user.id,
        role = %user.role,
        verified = user.is_verified,
        "User registered"
    );

    let token = issue_token(&state, &user)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserAccount { user, profile },
        }),
    ))
}

/// Log in with email and password
///
/// ```text
/// POST /api/auth/login
///
/// { "email": "jane@example.com", "password": "Str0ng!Pass" }
/// ```
///
/// # Errors
///
/// - `401 unauthorized`: Unknown email, wrong password, deleted or unverified account
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    req.validate()?;

    let user = User::find_by_email(&state.db, req.email.trim())
        .await?
        .filter(|user| !user.is_deleted())
        .ok_or_else(invalid_credentials)?;

    if !password::verify_password(&req.password, &user.password_hash)? {
        tracing::info!(user_id = %user.id, "Failed login attempt");
        return Err(invalid_credentials());
    }

    if !user.is_verified {
        return Err(ApiError::Unauthorized(
            "Please verify your email address before logging in".to_string(),
        ));
    }

    User::update_last_login(&state.db, user.id).await?;
    let token = issue_token(&state, &user)?;
    let account = UserAccount::load(&state.db, user).await?;

    tracing::info!(user_id = %account.user.id, "User logged in");

    Ok(Json(AuthResponse {
        token,
        user: account,
    }))
}

pub async fn verify_email(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyEmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let user = User::find_by_verification_token(&state.db, &tokens::hash_token(req.token.trim()))
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid or expired verification token".to_string()))?;

    User::mark_verified(&state.db, user.id).await?;
    tracing::info!(user_id = %user.id, "Email verified");

    Ok(Json(MessageResponse::new("Email verified successfully")))
}

/// Issue a password reset token
///
/// Always answers 200 so the response does not reveal which emails exist.
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    req.validate()?;

    let user = User::find_by_email(&state.db, req.email.trim())
        .await?
        .filter(|user| !user.is_deleted());

    if let Some(user) = user {
        let token = tokens::generate_token();
        let expires_at = Utc::now() + chrono::Duration::hours(RESET_TOKEN_TTL_HOURS);
        User::set_reset_token(&state.db, user.id, &tokens::hash_token(&token), expires_at).await?;
        tracing::info!(user_id = %user.id, %expires_at, "Password reset token issued");
    }

    Ok(Json(MessageResponse::new(
        "If an account exists for that email, password reset instructions have been sent",
    )))
}

pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    password::validate_password_strength(&req.password)?;

    let user = User::find_by_reset_token(&state.db, &tokens::hash_token(req.token.trim()))
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid or expired reset token".to_string()))?;

    let password_hash = password::hash_password(&req.password)?;
    User::set_password(&state.db, user.id, &password_hash).await?;
    tracing::info!(user_id = %user.id, "Password reset");

    Ok(Json(MessageResponse::new("Password has been reset")))
}

pub async fn me(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> ApiResult<Json<UserAccount>> {
    let user = User::find_by_id(&state.db, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(UserAccount::load(&state.db, user).await?))
}

pub async fn logout(CurrentUser(principal): CurrentUser) -> Json<MessageResponse> {
    tracing::debug!(user_id = %principal.user_id, "Logout");
    Json(MessageResponse::new("Logged out successfully"))
}

/// Issue a fresh token for the current user
///
/// The role and email are reloaded, so a token refreshed after a change
/// carries the new values.
pub async fn refresh(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> ApiResult<Json<TokenResponse>> {
    let user = User::find_by_id(&state.db, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

    Ok(Json(TokenResponse {
        token: issue_token(&state, &user)?,
    }))
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let user = User::find_by_id(&state.db, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

    if !password::verify_password(&req.current_password, &user.password_hash)? {
        return Err(ApiError::invalid_field(
            "currentPassword",
            "Current password is incorrect",
        ));
    }

    password::validate_password_strength(&req.new_password)
        .map_err(|e| ApiError::invalid_field("newPassword", e.to_string()))?;

    let password_hash = password::hash_password(&req.new_password)?;
    User::set_password(&state.db, user.id, &password_hash).await?;
    tracing::info!(user_id = %user.id, "Password changed");

    Ok(Json(MessageResponse::new("Password changed successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_validation() {
        let req: RegisterRequest = serde_json::from_str(
            r#"{"email":"jane@example.com","password":"Str0ng!Pass","firstName":"Jane","lastName":"Doe"}"#,
        )
        .unwrap();
        assert!(req.validate().is_ok());
        assert!(req.role.is_none());

        let req: RegisterRequest = serde_json::from_str(
            r#"{"email":"jane","password":"short","firstName":"","lastName":"Doe","role":"accountant"}"#,
        )
        .unwrap();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("first_name"));
        assert_eq!(req.role, Some(Role::Accountant));
    }

    #[test]
    fn test_register_rejects_unknown_role() {
        let result = serde_json::from_str::<RegisterRequest>(
            r#"{"email":"a@b.co","password":"x","firstName":"A","lastName":"B","role":"root"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_change_password_request_camel_case() {
        let req: ChangePasswordRequest =
            serde_json::from_str(r#"{"currentPassword":"old","newPassword":"new"}"#).unwrap();
        assert_eq!(req.current_password, "old");
        assert_eq!(req.new_password, "new");
    }
}
