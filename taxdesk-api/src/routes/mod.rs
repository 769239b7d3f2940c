/// API route handlers
///
/// Handlers are organized by resource; each module exposes a `router` that
/// wires its own authentication and rate limiting layers.
///
/// - `health`: Health check endpoint
/// - `auth`: Registration, login, tokens and passwords
/// - `users`: User administration and profiles
/// - `tax_returns`: Tax returns and their income sources, expenses and messages
/// - `contact`: Contact form intake
/// - `uploads`: Document upload and download
/// - `admin`: Dashboard, reports, settings and audit logs

pub mod admin;
pub mod auth;
pub mod contact;
pub mod health;
pub mod tax_returns;
pub mod uploads;
pub mod users;

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::PgPool;
use taxdesk_shared::auth::middleware::Principal;
use taxdesk_shared::models::audit_log::{AuditLog, NewAuditLog};
use uuid::Uuid;

use crate::middleware::rate_limit::ClientIp;

/// Plain acknowledgement body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Deserializes a nullable field so that absent is `None` and `null` is `Some(None)`
///
/// Use with `#[serde(default, deserialize_with = "double_option")]`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Writes an audit entry; failures are logged and never fail the request
pub async fn record_audit(
    db: &PgPool,
    principal: &Principal,
    client_ip: &ClientIp,
    action: &str,
    (entity_type, entity_id): (&str, Option<Uuid>),
    details: serde_json::Value,
) {
    let entry = NewAuditLog {
        user_id: Some(principal.user_id),
        action: action.to_string(),
        entity_type: entity_type.to_string(),
        entity_id,
        details,
        ip_address: Some(client_ip.0.clone()),
    };

    if let Err(e) = AuditLog::record(db, entry).await {
        tracing::warn!(action, entity_type, error = %e, "Failed to write audit log");
    }
}
