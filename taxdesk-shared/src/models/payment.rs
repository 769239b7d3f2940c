/// Payments recorded against tax returns
///
/// Rows are written by the payment provider integration; the API only reads
/// them for detail views and revenue reporting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

text_enum! {
    /// Settlement state of a payment
    pub enum PaymentState {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Refunded => "refunded",
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub tax_return_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentState,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub async fn list_by_tax_return(
        pool: &PgPool,
        tax_return_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, tax_return_id, amount, currency, status, payment_method,
                   transaction_id, paid_at, created_at, updated_at
            FROM payments
            WHERE tax_return_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tax_return_id)
        .fetch_all(pool)
        .await
    }

    /// Sum of completed payments
    pub async fn total_revenue(pool: &PgPool) -> Result<Decimal, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE status = 'completed'",
        )
        .fetch_one(pool)
        .await
    }
}
