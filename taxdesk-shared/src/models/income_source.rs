/// Income sources declared on a tax return
///
/// Creating or deleting a source should be followed by
/// [`TaxReturn::recalculate_totals`](super::tax_return::TaxReturn::recalculate_totals)
/// in the same transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

text_enum! {
    /// Kind of income
    pub enum IncomeSourceType {
        Employment => "employment",
        SelfEmployment => "self_employment",
        Rental => "rental",
        Dividends => "dividends",
        Interest => "interest",
        Pension => "pension",
        Other => "other",
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSource {
    pub id: Uuid,
    pub tax_return_id: Uuid,
    pub source_type: IncomeSourceType,
    pub description: Option<String>,
    pub amount: Decimal,

    /// Tax already deducted at source (PAYE, withholding)
    pub tax_paid: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIncomeSource {
    pub source_type: IncomeSourceType,
    pub description: Option<String>,
    pub amount: Decimal,
    #[serde(default)]
    pub tax_paid: Decimal,
}

impl IncomeSource {
    pub async fn create<'e, E>(
        executor: E,
        tax_return_id: Uuid,
        data: CreateIncomeSource,
    ) -> Result<Self, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, IncomeSource>(
            r#"
            INSERT INTO income_sources (tax_return_id, source_type, description, amount, tax_paid)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, tax_return_id, source_type, description, amount, tax_paid,
                      created_at, updated_at
            "#,
        )
        .bind(tax_return_id)
        .bind(data.source_type)
        .bind(data.description)
        .bind(data.amount)
        .bind(data.tax_paid)
        .fetch_one(executor)
        .await
    }

    pub async fn list_by_tax_return(
        pool: &PgPool,
        tax_return_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, IncomeSource>(
            r#"
            SELECT id, tax_return_id, source_type, description, amount, tax_paid,
                   created_at, updated_at
            FROM income_sources
            WHERE tax_return_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(tax_return_id)
        .fetch_all(pool)
        .await
    }

    /// Deletes a source belonging to the given return
    pub async fn delete<'e, E>(
        executor: E,
        id: Uuid,
        tax_return_id: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let result =
            sqlx::query("DELETE FROM income_sources WHERE id = $1 AND tax_return_id = $2")
                .bind(id)
                .bind(tax_return_id)
                .execute(executor)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
