/// User administration endpoints
///
/// # Endpoints
///
/// - `GET /api/users` - List users (admin)
/// - `GET /api/users/accountants` - Accountants with workload (admin)
/// - `GET /api/users/:id` - User with profile (admin or self)
/// - `PUT /api/users/:id` - Update user and profile (admin or self)
/// - `DELETE /api/users/:id` - Soft delete (admin)

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use taxdesk_shared::{
    auth::authorization::{require_ownership, require_role},
    models::{
        profile::{Accountant, AccountantDetails, AccountantSummary, Customer, CustomerDetails, UserAccount},
        user::{Role, UpdateUser, User, UserFilter, UserSort},
        Page, Paginated, SortOrder,
    },
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    app::{jwt_auth_layer, AppState},
    error::{ApiError, ApiResult},
    extract::{ApiJson, ApiPath, ApiQuery, CurrentUser},
    middleware::rate_limit::ClientIp,
    routes::{record_audit, MessageResponse},
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/accountants", get(list_accountants))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_layer))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    pub role: Option<Role>,
    pub is_verified: Option<bool>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<UserSort>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountantsQuery {
    /// Only accountants accepting new work
    pub available: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    pub last_name: Option<String>,

    /// An empty string clears the phone number
    #[validate(length(max = 20, message = "Phone must be at most 20 characters"))]
    pub phone: Option<String>,

    /// Admin only
    pub is_verified: Option<bool>,

    /// Only valid for customers
    pub customer: Option<CustomerDetails>,

    /// Only valid for accountants
    pub accountant: Option<AccountantDetails>,
}

impl UpdateUserRequest {
    fn user_update(&self) -> UpdateUser {
        UpdateUser {
            first_name: self.first_name.as_ref().map(|s| s.trim().to_string()),
            last_name: self.last_name.as_ref().map(|s| s.trim().to_string()),
            phone: self
                .phone
                .as_ref()
                .map(|p| Some(p.trim().to_string()).filter(|p| !p.is_empty())),
            is_verified: self.is_verified,
        }
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiQuery(query): ApiQuery<ListUsersQuery>,
) -> ApiResult<Json<Paginated<User>>> {
    require_role(&principal, &[Role::Admin])?;

    let page = Page::new(query.page, query.limit);
    let filter = UserFilter {
        role: query.role,
        is_verified: query.is_verified,
        search: query.search,
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
    };

    let (users, total) = tokio::try_join!(
        User::list(&state.db, &filter, page),
        User::count(&state.db, &filter),
    )?;

    Ok(Json(Paginated::new(users, page, total)))
}

pub async fn list_accountants(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiQuery(query): ApiQuery<AccountantsQuery>,
) -> ApiResult<Json<Vec<AccountantSummary>>> {
    require_role(&principal, &[Role::Admin])?;

    let accountants =
        Accountant::list_summaries(&state.db, query.available.unwrap_or(false)).await?;

    Ok(Json(accountants))
}

pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<UserAccount>> {
    require_ownership(&principal, id)?;

    let user = find_active_user(&state, id).await?;
    Ok(Json(UserAccount::load(&state.db, user).await?))
}

/// Update a user and its role profile
///
/// The user row and the profile change together or not at all.
///
/// ```text
/// PUT /api/users/:id
///
/// {
///   "firstName": "Jane",
///   "phone": "",
///   "customer": { "utrNumber": "1234567890", "postcode": "SW1A 1AA" }
/// }
/// ```
///
/// # Errors
///
/// - `403 forbidden`: Not the user or an admin, or a non-admin setting `isVerified`
/// - `400 bad_request`: Profile block that doesn't match the user's role
/// - `404 not_found`: Unknown or deleted user
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> ApiResult<Json<UserAccount>> {
    require_ownership(&principal, id)?;
    req.validate()?;

    if req.is_verified.is_some() && !principal.is_admin() {
        return Err(ApiError::Forbidden(
            "Only administrators can change verification status".to_string(),
        ));
    }

    let existing = find_active_user(&state, id).await?;

    match (&req.customer, &req.accountant, existing.role) {
        (Some(_), _, role) if role != Role::Customer => {
            return Err(ApiError::BadRequest(
                "Customer details can only be set on customer accounts".to_string(),
            ));
        }
        (_, Some(_), role) if role != Role::Accountant => {
            return Err(ApiError::BadRequest(
                "Accountant details can only be set on accountant accounts".to_string(),
            ));
        }
        _ => {}
    }

    let mut tx = state.db.begin().await?;

    let user = User::update(&mut *tx, id, req.user_update())
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if let Some(details) = req.customer {
        Customer::update_by_user_id(&mut *tx, id, details).await?;
    }
    if let Some(details) = req.accountant {
        Accountant::update_by_user_id(&mut *tx, id, details).await?;
    }

    tx.commit().await?;

    tracing::info!(user_id = %id, updated_by = %principal.user_id, "User updated");

    Ok(Json(UserAccount::load(&state.db, user).await?))
}

pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    client_ip: ClientIp,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    require_role(&principal, &[Role::Admin])?;

    if id == principal.user_id {
        return Err(ApiError::BadRequest(
            "You cannot delete your own account".to_string(),
        ));
    }

    if !User::soft_delete(&state.db, id).await? {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    tracing::info!(user_id = %id, deleted_by = %principal.user_id, "User soft-deleted");
    record_audit(
        &state.db,
        &principal,
        &client_ip,
        "user.delete",
        ("user", Some(id)),
        json!({}),
    )
    .await;

    Ok(Json(MessageResponse::new("User deleted successfully")))
}

async fn find_active_user(state: &AppState, id: Uuid) -> ApiResult<User> {
    User::find_by_id(&state.db, id)
        .await?
        .filter(|user| !user.is_deleted())
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}
