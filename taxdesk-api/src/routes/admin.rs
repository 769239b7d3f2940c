/// Admin endpoints
///
/// - `GET /api/admin/dashboard` - Headline counts and recent returns
/// - `GET /api/admin/reports/tax-returns` - Totals per tax year
/// - `GET /api/admin/settings` - System settings
/// - `PUT /api/admin/settings/:key` - Create or change a setting
/// - `GET /api/admin/audit-logs` - Audit trail, newest first
///
/// Every route is behind bearer authentication and the admin guard.

use axum::{
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use taxdesk_shared::models::{
    audit_log::{AuditLog, AuditLogFilter},
    settings::{SystemSetting, DEFAULT_PRICE_KEY},
    stats::DashboardStats,
    tax_return::{TaxReturn, TaxYearReport},
    Page, Paginated,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    app::{jwt_auth_layer, require_admin, AppState},
    error::{ApiError, ApiResult},
    extract::{ApiJson, ApiPath, ApiQuery, CurrentUser},
    middleware::rate_limit::ClientIp,
    routes::record_audit,
};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/reports/tax-returns", get(tax_return_report))
        .route("/settings", get(list_settings))
        .route("/settings/:key", put(update_setting))
        .route("/audit-logs", get(list_audit_logs))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_layer))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSettingRequest {
    #[validate(length(min = 1, max = 1000, message = "Value must be 1-1000 characters"))]
    pub value: String,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Setting keys are lowercase snake case
fn is_valid_key(key: &str) -> bool {
    (1..=100).contains(&key.len())
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Values with a known meaning must parse
fn check_setting_value(key: &str, value: &str) -> ApiResult<()> {
    if key == DEFAULT_PRICE_KEY {
        let valid = value
            .parse::<Decimal>()
            .is_ok_and(|price| price >= Decimal::ZERO);
        if !valid {
            return Err(ApiError::invalid_field(
                "value",
                "Default price must be a non-negative amount",
            ));
        }
    }
    Ok(())
}

pub async fn dashboard(State(state): State<AppState>) -> ApiResult<Json<DashboardStats>> {
    Ok(Json(DashboardStats::load(&state.db).await?))
}

pub async fn tax_return_report(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<TaxYearReport>>> {
    Ok(Json(TaxReturn::report_by_year(&state.db).await?))
}

pub async fn list_settings(State(state): State<AppState>) -> ApiResult<Json<Vec<SystemSetting>>> {
    Ok(Json(SystemSetting::list_all(&state.db).await?))
}

/// Create or change a setting
///
/// ```text
/// PUT /api/admin/settings/default_price
///
/// { "value": "149.00" }
/// ```
///
/// The description is kept unless a new one is supplied.
pub async fn update_setting(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    client_ip: ClientIp,
    ApiPath(key): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateSettingRequest>,
) -> ApiResult<Json<SystemSetting>> {
    if !is_valid_key(&key) {
        return Err(ApiError::BadRequest(format!("Invalid setting key '{}'", key)));
    }
    req.validate()?;

    let value = req.value.trim();
    check_setting_value(&key, value)?;

    let previous = SystemSetting::get(&state.db, &key).await?;
    let setting =
        SystemSetting::set(&state.db, &key, value, req.description.as_deref()).await?;

    tracing::info!(key = %key, updated_by = %principal.user_id, "System setting updated");
    record_audit(
        &state.db,
        &principal,
        &client_ip,
        "setting.update",
        ("system_setting", None),
        json!({
            "key": key,
            "from": previous.map(|s| s.value),
            "to": setting.value,
        }),
    )
    .await;

    Ok(Json(setting))
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AuditLogQuery>,
) -> ApiResult<Json<Paginated<AuditLog>>> {
    let page = Page::new(query.page, query.limit);
    let filter = AuditLogFilter {
        user_id: query.user_id,
        action: query.action,
        entity_type: query.entity_type,
    };

    let (items, total) = tokio::try_join!(
        AuditLog::list(&state.db, &filter, page),
        AuditLog::count(&state.db, &filter),
    )?;

    Ok(Json(Paginated::new(items, page, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_key_format() {
        assert!(is_valid_key("default_price"));
        assert!(is_valid_key("filing_deadline_2024"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("Default-Price"));
        assert!(!is_valid_key("site name"));
        assert!(!is_valid_key(&"a".repeat(101)));
    }

    #[test]
    fn test_default_price_must_parse() {
        assert!(check_setting_value(DEFAULT_PRICE_KEY, "149.00").is_ok());
        assert!(check_setting_value(DEFAULT_PRICE_KEY, "0").is_ok());
        assert!(check_setting_value(DEFAULT_PRICE_KEY, "-1").is_err());
        assert!(check_setting_value(DEFAULT_PRICE_KEY, "cheap").is_err());
        assert!(check_setting_value("site_name", "anything").is_ok());
    }
}
