/// Contact form endpoints
///
/// # Endpoints
///
/// - `POST /api/contact` - Submit an inquiry (public, form rate limiter)
/// - `GET /api/contact` - List inquiries (admin)
/// - `GET /api/contact/:id` - Read an inquiry (admin)
/// - `PUT /api/contact/:id` - Update status, assignee or notes (admin)
/// - `DELETE /api/contact/:id` - Delete an inquiry (admin)

use axum::{
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use taxdesk_shared::models::{
    contact_inquiry::{
        ContactInquiry, CreateContactInquiry, InquiryFilter, InquirySort, InquiryStatus,
        UpdateContactInquiry,
    },
    user::{Role, User},
    Page, Paginated, SortOrder,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    app::{jwt_auth_layer, require_admin, AppState},
    error::{ApiError, ApiResult},
    extract::{ApiJson, ApiPath, ApiQuery},
    middleware::rate_limit::auth_rate_limit,
    routes::{double_option, MessageResponse},
};

const MAX_ADMIN_NOTES: usize = 5000;

pub fn router(state: &AppState) -> Router<AppState> {
    let submit = post(create_inquiry)
        .route_layer(from_fn_with_state(state.clone(), auth_rate_limit));

    let list = get(list_inquiries)
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_layer));

    let manage = get(get_inquiry)
        .put(update_inquiry)
        .delete(delete_inquiry)
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_layer));

    Router::new()
        .route("/", list.merge(submit))
        .route("/:id", manage)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateInquiryRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(max = 20, message = "Phone must be at most 20 characters"))]
    pub phone: Option<String>,

    #[validate(length(max = 200, message = "Subject must be at most 200 characters"))]
    pub subject: Option<String>,

    #[validate(length(min = 1, max = 5000, message = "Message must be 1-5000 characters"))]
    pub message: String,

    #[validate(length(max = 50, message = "Service type must be at most 50 characters"))]
    pub service_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InquiryReceived {
    pub id: Uuid,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInquiriesQuery {
    pub status: Option<InquiryStatus>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<InquirySort>,
    pub sort_order: Option<SortOrder>,
}

/// `null` clears `assignedTo` or `adminNotes`; an absent field is left untouched
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInquiryRequest {
    pub status: Option<InquiryStatus>,

    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to: Option<Option<Uuid>>,

    #[serde(default, deserialize_with = "double_option")]
    pub admin_notes: Option<Option<String>>,
}

fn not_found() -> ApiError {
    ApiError::NotFound("Inquiry not found".to_string())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Submit the public contact form
///
/// ```text
/// POST /api/contact
///
/// {
///   "name": "Jane Doe",
///   "email": "jane@example.com",
///   "subject": "Self assessment",
///   "message": "I have rental income to declare",
///   "serviceType": "self_assessment"
/// }
/// ```
///
/// Answers `201` with the inquiry id.
pub async fn create_inquiry(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateInquiryRequest>,
) -> ApiResult<(StatusCode, Json<InquiryReceived>)> {
    req.validate()?;

    let inquiry = ContactInquiry::create(
        &state.db,
        CreateContactInquiry {
            name: req.name.trim().to_string(),
            email: req.email.trim().to_lowercase(),
            phone: trimmed(req.phone),
            subject: trimmed(req.subject),
            message: req.message.trim().to_string(),
            service_type: trimmed(req.service_type),
        },
    )
    .await?;

    tracing::info!(inquiry_id = %inquiry.id, "Contact inquiry received");

    Ok((
        StatusCode::CREATED,
        Json(InquiryReceived {
            id: inquiry.id,
            message: "Thank you for your inquiry. We will be in touch shortly.".to_string(),
        }),
    ))
}

pub async fn list_inquiries(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListInquiriesQuery>,
) -> ApiResult<Json<Paginated<ContactInquiry>>> {
    let page = Page::new(query.page, query.limit);
    let filter = InquiryFilter {
        status: query.status,
        search: query.search,
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
    };

    let (items, total) = tokio::try_join!(
        ContactInquiry::list(&state.db, &filter, page),
        ContactInquiry::count(&state.db, &filter),
    )?;

    Ok(Json(Paginated::new(items, page, total)))
}

pub async fn get_inquiry(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ContactInquiry>> {
    let inquiry = ContactInquiry::find_by_id(&state.db, id)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(inquiry))
}

/// Update an inquiry
///
/// # Errors
///
/// - `400 validation_error`: Assignee is not an active admin, or notes too long
/// - `404 not_found`: Unknown inquiry
pub async fn update_inquiry(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateInquiryRequest>,
) -> ApiResult<Json<ContactInquiry>> {
    if let Some(Some(notes)) = &req.admin_notes {
        if notes.chars().count() > MAX_ADMIN_NOTES {
            return Err(ApiError::invalid_field(
                "adminNotes",
                "Admin notes must be at most 5000 characters",
            ));
        }
    }

    if let Some(Some(assignee)) = req.assigned_to {
        let is_admin = User::find_by_id(&state.db, assignee)
            .await?
            .is_some_and(|user| user.role == Role::Admin && !user.is_deleted());

        if !is_admin {
            return Err(ApiError::invalid_field(
                "assignedTo",
                "Inquiries can only be assigned to administrators",
            ));
        }
    }

    let inquiry = ContactInquiry::update(
        &state.db,
        id,
        UpdateContactInquiry {
            status: req.status,
            assigned_to: req.assigned_to,
            admin_notes: req.admin_notes,
        },
    )
    .await?
    .ok_or_else(not_found)?;

    tracing::info!(inquiry_id = %id, status = %inquiry.status, "Contact inquiry updated");

    Ok(Json(inquiry))
}

pub async fn delete_inquiry(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    if !ContactInquiry::delete(&state.db, id).await? {
        return Err(not_found());
    }

    tracing::info!(inquiry_id = %id, "Contact inquiry deleted");

    Ok(Json(MessageResponse::new("Inquiry deleted successfully")))
}
