/// Messages exchanged on a tax return

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.tax_return_id, m.sender_id, m.recipient_id, m.content, m.is_read,
           m.created_at, m.updated_at,
           u.first_name || ' ' || u.last_name AS sender_name
    FROM messages m
    JOIN users u ON u.id = m.sender_id
"#;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub tax_return_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sender_name: String,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tax_return_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub content: String,
}

impl Message {
    pub async fn create(pool: &PgPool, data: NewMessage) -> Result<Self, sqlx::Error> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO messages (tax_return_id, sender_id, recipient_id, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(data.tax_return_id)
        .bind(data.sender_id)
        .bind(data.recipient_id)
        .bind(data.content)
        .fetch_one(pool)
        .await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("{} WHERE m.id = $1", MESSAGE_SELECT);

        sqlx::query_as::<_, Message>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Conversation of a return, oldest first
    pub async fn list_by_tax_return(
        pool: &PgPool,
        tax_return_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "{} WHERE m.tax_return_id = $1 ORDER BY m.created_at",
            MESSAGE_SELECT
        );

        sqlx::query_as::<_, Message>(&query)
            .bind(tax_return_id)
            .fetch_all(pool)
            .await
    }

    pub async fn mark_read(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE messages SET is_read = TRUE WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
