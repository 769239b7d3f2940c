/// Tax return endpoints
///
/// # Endpoints
///
/// - `GET /api/tax-returns` - List, scoped by role
/// - `POST /api/tax-returns` - Create (customer)
/// - `GET /api/tax-returns/:id` - Return with its children
/// - `PUT /api/tax-returns/:id` - Update
/// - `DELETE /api/tax-returns/:id` - Cascade delete (owning customer or admin)
/// - `PATCH /api/tax-returns/:id/status` - Set status (assigned accountant or admin)
/// - `POST /api/tax-returns/:id/assign` - Assign accountant (admin)
/// - `POST /api/tax-returns/:id/file` - Record HMRC filing (assigned accountant or admin)
/// - `GET|POST /api/tax-returns/:id/income-sources`, `DELETE .../:source_id`
/// - `GET|POST /api/tax-returns/:id/expenses`, `DELETE .../:expense_id`
/// - `GET|POST /api/tax-returns/:id/messages`
/// - `PATCH /api/tax-returns/:id/messages/:message_id/read` - Recipient only
///
/// # Access
///
/// A return is accessible to its customer's user, its assigned accountant's
/// user and any admin. Access is checked before each operation but not held
/// for its duration, so a concurrent reassignment can race an update by the
/// previous accountant.

use axum::{
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use taxdesk_shared::{
    auth::{
        authorization::{require_access, require_ownership, require_role},
        middleware::Principal,
    },
    models::{
        document::Document,
        expense::{CreateExpense, Expense},
        income_source::{CreateIncomeSource, IncomeSource},
        message::{Message, NewMessage},
        payment::Payment,
        profile::{Accountant, Customer},
        settings::SystemSetting,
        tax_return::{
            CreateTaxReturn, PaymentStatus, TaxReturn, TaxReturnFilter, TaxReturnSort,
            TaxReturnStatus, TaxYear, UpdateTaxReturn,
        },
        user::Role,
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
    storage::remove_files,
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list_tax_returns).post(create_tax_return))
        .route(
            "/:id",
            get(get_tax_return)
                .put(update_tax_return)
                .delete(delete_tax_return),
        )
        .route("/:id/status", patch(update_status))
        .route("/:id/assign", post(assign_accountant))
        .route("/:id/file", post(file_tax_return))
        .route(
            "/:id/income-sources",
            get(list_income_sources).post(create_income_source),
        )
        .route("/:id/income-sources/:source_id", delete(delete_income_source))
        .route("/:id/expenses", get(list_expenses).post(create_expense))
        .route("/:id/expenses/:expense_id", delete(delete_expense))
        .route("/:id/messages", get(list_messages).post(create_message))
        .route("/:id/messages/:message_id/read", patch(mark_message_read))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_layer))
}

fn not_found() -> ApiError {
    ApiError::NotFound("Tax return not found".to_string())
}

/// Loads a return the caller may act on
///
/// Shared with the upload endpoints, which guard documents by their parent return.
pub(crate) async fn load_accessible(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
) -> ApiResult<TaxReturn> {
    let tax_return = TaxReturn::find_by_id(&state.db, id)
        .await?
        .ok_or_else(not_found)?;

    require_access(principal, &tax_return.owner_ids())?;
    Ok(tax_return)
}

/// Assigned accountant or admin
fn require_assigned(principal: &Principal, tax_return: &TaxReturn) -> ApiResult<()> {
    require_role(principal, &[Role::Accountant, Role::Admin])?;
    let assigned: Vec<Uuid> = tax_return.accountant_user_id.into_iter().collect();
    require_access(principal, &assigned)?;
    Ok(())
}

fn require_non_negative(field: &str, value: Option<Decimal>) -> ApiResult<()> {
    match value {
        Some(amount) if amount < Decimal::ZERO => Err(
            ApiError::invalid_field(field, "Amount must not be negative"),
        ),
        _ => Ok(()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTaxReturnsQuery {
    pub status: Option<TaxReturnStatus>,
    pub tax_year: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<TaxReturnSort>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaxReturnRequest {
    /// `YYYY-YY`, e.g. `2023-24`
    pub tax_year: String,

    #[validate(length(max = 5000, message = "Notes must be at most 5000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaxReturnRequest {
    pub status: Option<TaxReturnStatus>,

    /// Admin only
    pub payment_status: Option<PaymentStatus>,

    pub total_income: Option<Decimal>,
    pub total_expenses: Option<Decimal>,
    pub tax_due: Option<Decimal>,
    pub refund_amount: Option<Decimal>,

    /// Admin only
    pub price: Option<Decimal>,

    pub deadline: Option<NaiveDate>,

    /// An empty string clears the notes
    #[validate(length(max = 5000, message = "Notes must be at most 5000 characters"))]
    pub notes: Option<String>,
}

impl UpdateTaxReturnRequest {
    fn into_update(self) -> UpdateTaxReturn {
        UpdateTaxReturn {
            status: self.status,
            payment_status: self.payment_status,
            total_income: self.total_income,
            total_expenses: self.total_expenses,
            tax_due: self.tax_due,
            refund_amount: self.refund_amount,
            price: self.price,
            deadline: self.deadline,
            notes: self.notes.map(|n| Some(n).filter(|n| !n.trim().is_empty())),
        }
    }

    fn check_amounts(&self) -> ApiResult<()> {
        require_non_negative("totalIncome", self.total_income)?;
        require_non_negative("totalExpenses", self.total_expenses)?;
        require_non_negative("taxDue", self.tax_due)?;
        require_non_negative("refundAmount", self.refund_amount)?;
        require_non_negative("price", self.price)
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: TaxReturnStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub accountant_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    #[validate(length(min = 1, max = 50, message = "HMRC reference must be 1-50 characters"))]
    pub hmrc_reference: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    #[validate(length(min = 1, max = 5000, message = "Message must be 1-5000 characters"))]
    pub content: String,

    /// Defaults to the other party of the return
    pub recipient_id: Option<Uuid>,
}

/// Tax return with its child records
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxReturnDetail {
    #[serde(flatten)]
    pub tax_return: TaxReturn,
    pub income_sources: Vec<IncomeSource>,
    pub expenses: Vec<Expense>,
    pub documents: Vec<Document>,
    pub payments: Vec<Payment>,
}

/// List tax returns visible to the caller
///
/// Customers see their own returns, accountants the returns assigned to
/// them and admins every return.
pub async fn list_tax_returns(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiQuery(query): ApiQuery<ListTaxReturnsQuery>,
) -> ApiResult<Json<Paginated<TaxReturn>>> {
    let page = Page::new(query.page, query.limit);
    let mut filter = TaxReturnFilter {
        status: query.status,
        tax_year: query.tax_year,
        search: query.search,
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
        ..Default::default()
    };

    match principal.role {
        Role::Customer => {
            let customer = Customer::find_by_user_id(&state.db, principal.user_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Customer profile not found".to_string()))?;
            filter.customer_id = Some(customer.id);
        }
        Role::Accountant => {
            let accountant = Accountant::find_by_user_id(&state.db, principal.user_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Accountant profile not found".to_string()))?;
            filter.accountant_id = Some(accountant.id);
        }
        Role::Admin => {}
    }

    let (items, total) = tokio::try_join!(
        TaxReturn::list(&state.db, &filter, page),
        TaxReturn::count(&state.db, &filter),
    )?;

    Ok(Json(Paginated::new(items, page, total)))
}

/// Create a tax return for the calling customer
///
/// ```text
/// POST /api/tax-returns
///
/// { "taxYear": "2023-24", "notes": "Two rental properties" }
/// ```
///
/// The deadline defaults to 31 January after the tax year ends and the price
/// to the `default_price` setting.
///
/// # Errors
///
/// - `400 validation_error`: Malformed tax year
/// - `400 conflict`: The customer already has a return for that year
/// - `403 forbidden`: Caller is not a customer
pub async fn create_tax_return(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiJson(req): ApiJson<CreateTaxReturnRequest>,
) -> ApiResult<(StatusCode, Json<TaxReturn>)> {
    require_role(&principal, &[Role::Customer])?;
    req.validate()?;
    let tax_year: TaxYear = req.tax_year.trim().parse()?;

    let customer = Customer::find_by_user_id(&state.db, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Customer profile not found".to_string()))?;

    if TaxReturn::exists_for_year(&state.db, customer.id, tax_year).await? {
        return Err(ApiError::Conflict(format!(
            "A tax return for tax year {} already exists",
            tax_year
        )));
    }

    let price = SystemSetting::default_price(&state.db).await?;

    let tax_return = TaxReturn::create(
        &state.db,
        CreateTaxReturn {
            customer_id: customer.id,
            tax_year,
            price,
            deadline: None,
            notes: req.notes.filter(|n| !n.trim().is_empty()),
        },
    )
    .await?;

    tracing::info!(
        tax_return_id = %tax_return.id,
        customer_id = %customer.id,
        tax_year = %tax_year,
        "Tax return created"
    );

    Ok((StatusCode::CREATED, Json(tax_return)))
}

pub async fn get_tax_return(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<TaxReturnDetail>> {
    let tax_return = load_accessible(&state, &principal, id).await?;

    let (income_sources, expenses, documents, payments) = tokio::try_join!(
        IncomeSource::list_by_tax_return(&state.db, id),
        Expense::list_by_tax_return(&state.db, id),
        Document::list_by_tax_return(&state.db, id),
        Payment::list_by_tax_return(&state.db, id),
    )?;

    Ok(Json(TaxReturnDetail {
        tax_return,
        income_sources,
        expenses,
        documents,
        payments,
    }))
}

/// Update a tax return
///
/// Customers may only change `notes`. `price` and `paymentStatus` are
/// reserved for admins. Status changes here are not validated against the
/// lifecycle.
///
/// # Errors
///
/// - `403 forbidden`: No access, or a field the caller's role may not change
/// - `404 not_found`: Unknown return
pub async fn update_tax_return(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateTaxReturnRequest>,
) -> ApiResult<Json<TaxReturn>> {
    req.validate()?;
    req.check_amounts()?;
    load_accessible(&state, &principal, id).await?;

    let update = req.into_update();

    match principal.role {
        Role::Customer if !update.only_notes() => {
            return Err(ApiError::Forbidden(
                "Customers can only update notes".to_string(),
            ));
        }
        Role::Accountant if update.price.is_some() || update.payment_status.is_some() => {
            return Err(ApiError::Forbidden(
                "Only administrators can change price or payment status".to_string(),
            ));
        }
        _ => {}
    }

    let tax_return = TaxReturn::update(&state.db, id, update)
        .await?
        .ok_or_else(not_found)?;

    tracing::info!(tax_return_id = %id, updated_by = %principal.user_id, "Tax return updated");

    Ok(Json(tax_return))
}

/// Delete a return with all of its children
///
/// Rows go in one transaction; document files are removed afterwards on a
/// best-effort basis.
pub async fn delete_tax_return(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    client_ip: ClientIp,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    let tax_return = TaxReturn::find_by_id(&state.db, id)
        .await?
        .ok_or_else(not_found)?;
    require_ownership(&principal, tax_return.customer_user_id)?;

    let deleted = TaxReturn::delete_cascade(&state.db, id)
        .await?
        .ok_or_else(not_found)?;

    remove_files(state.storage.as_ref(), &deleted.stored_files).await;

    tracing::info!(
        tax_return_id = %id,
        deleted_by = %principal.user_id,
        documents = deleted.stored_files.len(),
        "Tax return deleted"
    );
    record_audit(
        &state.db,
        &principal,
        &client_ip,
        "tax_return.delete",
        ("tax_return", Some(id)),
        json!({
            "taxYear": tax_return.tax_year,
            "customerId": tax_return.customer_id,
            "documents": deleted.stored_files.len(),
        }),
    )
    .await;

    Ok(Json(MessageResponse::new("Tax return deleted successfully")))
}

pub async fn update_status(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    client_ip: ClientIp,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<StatusRequest>,
) -> ApiResult<Json<TaxReturn>> {
    let current = TaxReturn::find_by_id(&state.db, id)
        .await?
        .ok_or_else(not_found)?;
    require_assigned(&principal, &current)?;

    let tax_return = TaxReturn::update_status(&state.db, id, req.status)
        .await?
        .ok_or_else(not_found)?;

    tracing::info!(
        tax_return_id = %id,
        from = %current.status,
        to = %req.status,
        "Tax return status changed"
    );
    record_audit(
        &state.db,
        &principal,
        &client_ip,
        "tax_return.status",
        ("tax_return", Some(id)),
        json!({ "from": current.status, "to": req.status }),
    )
    .await;

    Ok(Json(tax_return))
}

/// Assign an accountant (admin)
///
/// A pending return moves to `in_progress`; other statuses are kept.
pub async fn assign_accountant(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    client_ip: ClientIp,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<AssignRequest>,
) -> ApiResult<Json<TaxReturn>> {
    require_role(&principal, &[Role::Admin])?;

    let accountant = Accountant::find_by_id(&state.db, req.accountant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Accountant not found".to_string()))?;

    let tax_return = TaxReturn::assign_accountant(&state.db, id, accountant.id)
        .await?
        .ok_or_else(not_found)?;

    tracing::info!(tax_return_id = %id, accountant_id = %accountant.id, "Accountant assigned");
    record_audit(
        &state.db,
        &principal,
        &client_ip,
        "tax_return.assign",
        ("tax_return", Some(id)),
        json!({ "accountantId": accountant.id }),
    )
    .await;

    Ok(Json(tax_return))
}

/// Record the HMRC submission
///
/// Sets status `filed`, stores the reference and stamps the filing date.
pub async fn file_tax_return(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    client_ip: ClientIp,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<FileRequest>,
) -> ApiResult<Json<TaxReturn>> {
    req.validate()?;

    let current = TaxReturn::find_by_id(&state.db, id)
        .await?
        .ok_or_else(not_found)?;
    require_assigned(&principal, &current)?;

    let reference = req.hmrc_reference.trim();
    let tax_return = TaxReturn::mark_filed(&state.db, id, reference)
        .await?
        .ok_or_else(not_found)?;

    tracing::info!(tax_return_id = %id, hmrc_reference = reference, "Tax return filed");
    record_audit(
        &state.db,
        &principal,
        &client_ip,
        "tax_return.file",
        ("tax_return", Some(id)),
        json!({ "hmrcReference": reference }),
    )
    .await;

    Ok(Json(tax_return))
}

pub async fn list_income_sources(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<IncomeSource>>> {
    load_accessible(&state, &principal, id).await?;
    Ok(Json(IncomeSource::list_by_tax_return(&state.db, id).await?))
}

/// Add an income source and recompute `totalIncome`
pub async fn create_income_source(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<CreateIncomeSource>,
) -> ApiResult<(StatusCode, Json<IncomeSource>)> {
    require_non_negative("amount", Some(req.amount))?;
    require_non_negative("taxPaid", Some(req.tax_paid))?;
    load_accessible(&state, &principal, id).await?;

    let mut tx = state.db.begin().await?;
    let source = IncomeSource::create(&mut *tx, id, req).await?;
    TaxReturn::recalculate_totals(&mut *tx, id).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(source)))
}

pub async fn delete_income_source(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath((id, source_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<Json<MessageResponse>> {
    load_accessible(&state, &principal, id).await?;

    let mut tx = state.db.begin().await?;
    if !IncomeSource::delete(&mut *tx, source_id, id).await? {
        return Err(ApiError::NotFound("Income source not found".to_string()));
    }
    TaxReturn::recalculate_totals(&mut *tx, id).await?;
    tx.commit().await?;

    Ok(Json(MessageResponse::new("Income source deleted successfully")))
}

pub async fn list_expenses(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<Expense>>> {
    load_accessible(&state, &principal, id).await?;
    Ok(Json(Expense::list_by_tax_return(&state.db, id).await?))
}

/// Add an expense and recompute `totalExpenses`
pub async fn create_expense(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<CreateExpense>,
) -> ApiResult<(StatusCode, Json<Expense>)> {
    require_non_negative("amount", Some(req.amount))?;
    load_accessible(&state, &principal, id).await?;

    let mut tx = state.db.begin().await?;
    let expense = Expense::create(&mut *tx, id, req).await?;
    TaxReturn::recalculate_totals(&mut *tx, id).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn delete_expense(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath((id, expense_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<Json<MessageResponse>> {
    load_accessible(&state, &principal, id).await?;

    let mut tx = state.db.begin().await?;
    if !Expense::delete(&mut *tx, expense_id, id).await? {
        return Err(ApiError::NotFound("Expense not found".to_string()));
    }
    TaxReturn::recalculate_totals(&mut *tx, id).await?;
    tx.commit().await?;

    Ok(Json(MessageResponse::new("Expense deleted successfully")))
}

pub async fn list_messages(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<Message>>> {
    load_accessible(&state, &principal, id).await?;
    Ok(Json(Message::list_by_tax_return(&state.db, id).await?))
}

/// Post a message on a return
///
/// Without `recipientId` a customer writes to the assigned accountant and
/// everyone else writes to the customer.
pub async fn create_message(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<CreateMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    req.validate()?;
    let tax_return = load_accessible(&state, &principal, id).await?;

    let recipient_id = match req.recipient_id {
        Some(recipient) if tax_return.owner_ids().contains(&recipient) => Some(recipient),
        Some(_) => {
            return Err(ApiError::invalid_field(
                "recipientId",
                "Recipient must be the customer or the assigned accountant",
            ));
        }
        None => default_recipient(&principal, &tax_return),
    };

    let message = Message::create(
        &state.db,
        NewMessage {
            tax_return_id: id,
            sender_id: principal.user_id,
            recipient_id,
            content: req.content.trim().to_string(),
        },
    )
    .await?;

    tracing::debug!(tax_return_id = %id, message_id = %message.id, "Message posted");

    Ok((StatusCode::CREATED, Json(message)))
}

fn default_recipient(principal: &Principal, tax_return: &TaxReturn) -> Option<Uuid> {
    if principal.user_id == tax_return.customer_user_id {
        tax_return.accountant_user_id
    } else {
        Some(tax_return.customer_user_id)
    }
}

pub async fn mark_message_read(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    ApiPath((id, message_id)): ApiPath<(Uuid, Uuid)>,
) -> ApiResult<Json<MessageResponse>> {
    load_accessible(&state, &principal, id).await?;

    let message = Message::find_by_id(&state.db, message_id)
        .await?
        .filter(|m| m.tax_return_id == id)
        .ok_or_else(|| ApiError::NotFound("Message not found".to_string()))?;

    if message.recipient_id != Some(principal.user_id) {
        return Err(ApiError::Forbidden(
            "Only the recipient can mark a message as read".to_string(),
        ));
    }

    Message::mark_read(&state.db, message_id).await?;

    Ok(Json(MessageResponse::new("Message marked as read")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tax_return(customer_user_id: Uuid, accountant_user_id: Option<Uuid>) -> TaxReturn {
        let now = Utc::now();
        TaxReturn {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            accountant_id: accountant_user_id.map(|_| Uuid::new_v4()),
            tax_year: "2023-24".to_string(),
            status: TaxReturnStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_income: Decimal::ZERO,
            total_expenses: Decimal::ZERO,
            tax_due: Decimal::ZERO,
            refund_amount: Decimal::ZERO,
            price: None,
            deadline: None,
            filed_date: None,
            hmrc_reference: None,
            notes: None,
            created_at: now,
            updated_at: now,
            customer_user_id,
            customer_name: "Jane Doe".to_string(),
            accountant_user_id,
            accountant_name: accountant_user_id.map(|_| "Sam Smith".to_string()),
        }
    }

    fn principal(user_id: Uuid, role: Role) -> Principal {
        Principal {
            user_id,
            email: "someone@example.com".to_string(),
            role,
            is_verified: true,
        }
    }

    #[test]
    fn test_require_assigned() {
        let customer = Uuid::new_v4();
        let accountant = Uuid::new_v4();
        let tr = tax_return(customer, Some(accountant));

        assert!(require_assigned(&principal(accountant, Role::Accountant), &tr).is_ok());
        assert!(require_assigned(&principal(Uuid::new_v4(), Role::Admin), &tr).is_ok());
        assert!(require_assigned(&principal(Uuid::new_v4(), Role::Accountant), &tr).is_err());
        assert!(require_assigned(&principal(customer, Role::Customer), &tr).is_err());

        let unassigned = tax_return(customer, None);
        assert!(require_assigned(&principal(accountant, Role::Accountant), &unassigned).is_err());
    }

    #[test]
    fn test_default_recipient() {
        let customer = Uuid::new_v4();
        let accountant = Uuid::new_v4();
        let tr = tax_return(customer, Some(accountant));

        assert_eq!(
            default_recipient(&principal(customer, Role::Customer), &tr),
            Some(accountant)
        );
        assert_eq!(
            default_recipient(&principal(accountant, Role::Accountant), &tr),
            Some(customer)
        );
        assert_eq!(
            default_recipient(&principal(customer, Role::Customer), &tax_return(customer, None)),
            None
        );
    }

    #[test]
    fn test_update_request_notes_only() {
        let req: UpdateTaxReturnRequest =
            serde_json::from_str(r#"{"notes":"Call after 5pm"}"#).unwrap();
        assert!(req.into_update().only_notes());

        let req: UpdateTaxReturnRequest = serde_json::from_str(r#"{"notes":"  "}"#).unwrap();
        let update = req.into_update();
        assert_eq!(update.notes, Some(None));

        let req: UpdateTaxReturnRequest =
            serde_json::from_str(r#"{"notes":"x","status":"review"}"#).unwrap();
        assert!(!req.into_update().only_notes());
    }

    #[test]
    fn test_negative_amounts_rejected() {
        let req: UpdateTaxReturnRequest =
            serde_json::from_str(r#"{"taxDue":"-10.00","totalIncome":"0"}"#).unwrap();
        match req.check_amounts() {
            Err(ApiError::ValidationError(details)) => assert_eq!(details[0].field, "taxDue"),
            other => panic!("expected validation error, got {:?}", other),
        }

        let req: UpdateTaxReturnRequest =
            serde_json::from_str(r#"{"refundAmount":"125.40"}"#).unwrap();
        assert!(req.check_amounts().is_ok());
    }

    #[test]
    fn test_list_query_parses_status_and_sort() {
        let query: ListTaxReturnsQuery = serde_json::from_str(
            r#"{"status":"in_progress","taxYear":"2023-24","sortBy":"deadline","sortOrder":"asc"}"#,
        )
        .unwrap();
        assert_eq!(query.status, Some(TaxReturnStatus::InProgress));
        assert_eq!(query.sort_by, Some(TaxReturnSort::Deadline));
        assert_eq!(query.sort_order, Some(SortOrder::Asc));

        assert!(serde_json::from_str::<ListTaxReturnsQuery>(r#"{"status":"archived"}"#).is_err());
    }
}
