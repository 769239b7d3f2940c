/// Allowable expenses claimed on a tax return

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

text_enum! {
    /// Expense category
    pub enum ExpenseCategory {
        Office => "office",
        Travel => "travel",
        Equipment => "equipment",
        ProfessionalFees => "professional_fees",
        Utilities => "utilities",
        Insurance => "insurance",
        Marketing => "marketing",
        Other => "other",
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: Uuid,
    pub tax_return_id: Uuid,
    pub category: ExpenseCategory,
    pub description: Option<String>,
    pub amount: Decimal,
    pub expense_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExpense {
    pub category: ExpenseCategory,
    pub description: Option<String>,
    pub amount: Decimal,
    pub expense_date: Option<NaiveDate>,
}

impl Expense {
    pub async fn create<'e, E>(
        executor: E,
        tax_return_id: Uuid,
        data: CreateExpense,
    ) -> Result<Self, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Expense>(
            r#"
            INSERT INTO expenses (tax_return_id, category, description, amount, expense_date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, tax_return_id, category, description, amount, expense_date,
                      created_at, updated_at
            "#,
        )
        .bind(tax_return_id)
        .bind(data.category)
        .bind(data.description)
        .bind(data.amount)
        .bind(data.expense_date)
        .fetch_one(executor)
        .await
    }

    pub async fn list_by_tax_return(
        pool: &PgPool,
        tax_return_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Expense>(
            r#"
            SELECT id, tax_return_id, category, description, amount, expense_date,
                   created_at, updated_at
            FROM expenses
            WHERE tax_return_id = $1
            ORDER BY expense_date NULLS LAST, created_at
            "#,
        )
        .bind(tax_return_id)
        .fetch_all(pool)
        .await
    }

    pub async fn delete<'e, E>(
        executor: E,
        id: Uuid,
        tax_return_id: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query("DELETE FROM expenses WHERE id = $1 AND tax_return_id = $2")
            .bind(id)
            .bind(tax_return_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
