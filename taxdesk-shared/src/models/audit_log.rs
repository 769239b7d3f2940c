/// Append-only audit trail of administrative and lifecycle actions

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::Page;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: Uuid,

    /// Acting user, if any
    pub user_id: Option<Uuid>,

    /// Action name, e.g. `tax_return.assign`
    pub action: String,

    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: JsonValue,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub details: JsonValue,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
}

impl AuditLogFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE TRUE");

        if let Some(user_id) = self.user_id {
            qb.push(" AND user_id = ");
            qb.push_bind(user_id);
        }
        if let Some(action) = &self.action {
            qb.push(" AND action = ");
            qb.push_bind(action.clone());
        }
        if let Some(entity_type) = &self.entity_type {
            qb.push(" AND entity_type = ");
            qb.push_bind(entity_type.clone());
        }
    }
}

impl AuditLog {
    pub async fn record(pool: &PgPool, entry: NewAuditLog) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, AuditLog>(
            r#"
            INSERT INTO audit_logs (user_id, action, entity_type, entity_id, details, ip_address)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, action, entity_type, entity_id, details, ip_address, created_at
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.details)
        .bind(entry.ip_address)
        .fetch_one(pool)
        .await
    }

    /// Newest entries first
    pub async fn list(
        pool: &PgPool,
        filter: &AuditLogFilter,
        page: Page,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT id, user_id, action, entity_type, entity_id, details, ip_address, created_at \
             FROM audit_logs",
        );
        filter.push_where(&mut qb);
        qb.push(" ORDER BY created_at DESC, id LIMIT ");
        qb.push_bind(page.limit);
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        qb.build_query_as::<AuditLog>().fetch_all(pool).await
    }

    pub async fn count(pool: &PgPool, filter: &AuditLogFilter) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs");
        filter.push_where(&mut qb);

        qb.build_query_scalar::<i64>().fetch_one(pool).await
    }
}
