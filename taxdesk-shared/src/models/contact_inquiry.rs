/// Contact form submissions and their admin workflow

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{like_pattern, Page, SortOrder};

text_enum! {
    /// Handling state of an inquiry
    pub enum InquiryStatus {
        New => "new",
        InProgress => "in_progress",
        Resolved => "resolved",
        Closed => "closed",
    }
}

const INQUIRY_COLUMNS: &str = "id, name, email, phone, subject, message, service_type, status, \
     assigned_to, admin_notes, created_at, updated_at";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContactInquiry {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: String,

    /// Service the visitor is interested in
    pub service_type: Option<String>,

    pub status: InquiryStatus,

    /// Admin handling the inquiry
    pub assigned_to: Option<Uuid>,

    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateContactInquiry {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: String,
    pub service_type: Option<String>,
}

/// Partial update; `None` leaves the column untouched, `Some(None)` clears it
#[derive(Debug, Clone, Default)]
pub struct UpdateContactInquiry {
    pub status: Option<InquiryStatus>,
    pub assigned_to: Option<Option<Uuid>>,
    pub admin_notes: Option<Option<String>>,
}

text_enum! {
    /// Sortable inquiry columns
    #[derive(Default)]
    pub enum InquirySort {
        #[default]
        CreatedAt => "createdAt",
        Status => "status",
        Name => "name",
    }
}

impl InquirySort {
    fn column(&self) -> &'static str {
        match self {
            InquirySort::CreatedAt => "created_at",
            InquirySort::Status => "status",
            InquirySort::Name => "name",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InquiryFilter {
    pub status: Option<InquiryStatus>,

    /// Matches name, email or subject
    pub search: Option<String>,

    pub sort_by: InquirySort,
    pub sort_order: SortOrder,
}

impl InquiryFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE TRUE");

        if let Some(status) = self.status {
            qb.push(" AND status = ");
            qb.push_bind(status);
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search);
            qb.push(" AND (name ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR email ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR subject ILIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }
    }
}

impl ContactInquiry {
    pub async fn create(pool: &PgPool, data: CreateContactInquiry) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO contact_inquiries (name, email, phone, subject, message, service_type) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {}",
            INQUIRY_COLUMNS
        );

        sqlx::query_as::<_, ContactInquiry>(&query)
            .bind(data.name)
            .bind(data.email)
            .bind(data.phone)
            .bind(data.subject)
            .bind(data.message)
            .bind(data.service_type)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM contact_inquiries WHERE id = $1", INQUIRY_COLUMNS);

        sqlx::query_as::<_, ContactInquiry>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(
        pool: &PgPool,
        filter: &InquiryFilter,
        page: Page,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM contact_inquiries",
            INQUIRY_COLUMNS
        ));
        filter.push_where(&mut qb);
        qb.push(format!(
            " ORDER BY {} {}, id",
            filter.sort_by.column(),
            filter.sort_order.sql()
        ));
        qb.push(" LIMIT ");
        qb.push_bind(page.limit);
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        qb.build_query_as::<ContactInquiry>().fetch_all(pool).await
    }

    pub async fn count(pool: &PgPool, filter: &InquiryFilter) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM contact_inquiries");
        filter.push_where(&mut qb);

        qb.build_query_scalar::<i64>().fetch_one(pool).await
    }

    /// Inquiries still awaiting resolution
    pub async fn count_open(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM contact_inquiries WHERE status IN ('new', 'in_progress')",
        )
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateContactInquiry,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE contact_inquiries SET ");
        let mut fields = qb.separated(", ");

        // Keeps the statement valid when nothing else is set
        fields.push("updated_at = NOW()");
        if let Some(status) = data.status {
            fields.push("status = ");
            fields.push_bind_unseparated(status);
        }
        if let Some(assigned_to) = data.assigned_to {
            fields.push("assigned_to = ");
            fields.push_bind_unseparated(assigned_to);
        }
        if let Some(admin_notes) = data.admin_notes {
            fields.push("admin_notes = ");
            fields.push_bind_unseparated(admin_notes);
        }

        qb.push(" WHERE id = ");
        qb.push_bind(id);
        qb.push(format!(" RETURNING {}", INQUIRY_COLUMNS));

        qb.build_query_as::<ContactInquiry>()
            .fetch_optional(pool)
            .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM contact_inquiries WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
