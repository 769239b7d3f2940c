/// Uploaded document metadata
///
/// File contents live in the file store under `stored_name`; this table only
/// records metadata and ownership.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

const DOCUMENT_COLUMNS: &str = "id, tax_return_id, uploaded_by, file_name, stored_name, \
     file_size, mime_type, document_type, description, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub tax_return_id: Uuid,

    /// User who uploaded the file
    pub uploaded_by: Uuid,

    /// Original client-side file name
    pub file_name: String,

    /// Randomized name in the file store
    #[serde(skip_serializing)]
    pub stored_name: String,

    /// Size in bytes
    pub file_size: i64,

    pub mime_type: String,

    /// Client-supplied category, e.g. `p60` or `bank_statement`
    pub document_type: Option<String>,

    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub tax_return_id: Uuid,
    pub uploaded_by: Uuid,
    pub file_name: String,
    pub stored_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub document_type: Option<String>,
    pub description: Option<String>,
}

impl Document {
    /// Inserts the metadata of several uploaded files atomically
    pub async fn create_many(
        pool: &PgPool,
        documents: Vec<NewDocument>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "INSERT INTO documents (tax_return_id, uploaded_by, file_name, stored_name, \
             file_size, mime_type, document_type, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {}",
            DOCUMENT_COLUMNS
        );

        let mut tx = pool.begin().await?;
        let mut created = Vec::with_capacity(documents.len());

        for doc in documents {
            let row = sqlx::query_as::<_, Document>(&query)
                .bind(doc.tax_return_id)
                .bind(doc.uploaded_by)
                .bind(doc.file_name)
                .bind(doc.stored_name)
                .bind(doc.file_size)
                .bind(doc.mime_type)
                .bind(doc.document_type)
                .bind(doc.description)
                .fetch_one(&mut *tx)
                .await?;
            created.push(row);
        }

        tx.commit().await?;
        Ok(created)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);

        sqlx::query_as::<_, Document>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_tax_return(
        pool: &PgPool,
        tax_return_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM documents WHERE tax_return_id = $1 ORDER BY created_at DESC",
            DOCUMENT_COLUMNS
        );

        sqlx::query_as::<_, Document>(&query)
            .bind(tax_return_id)
            .fetch_all(pool)
            .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
