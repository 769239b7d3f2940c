/// Tax return model and database operations
///
/// A tax return belongs to one customer and may be assigned to one accountant.
/// Each customer has at most one return per tax year
/// (`tax_returns_customer_year_key`).
///
/// # Lifecycle
///
/// ```text
/// pending -> in_progress -> review -> completed -> filed
///     \___________\____________\__________\_______> cancelled
/// ```
///
/// Transitions are not enforced here: accountants and admins may set any
/// status. [`TaxReturn::assign_accountant`] moves a pending return to
/// `in_progress`, and [`TaxReturn::mark_filed`] stamps the filing date.
///
/// # Children
///
/// Income sources, expenses, documents, messages and payments reference the
/// return without `ON DELETE CASCADE`; [`TaxReturn::delete_cascade`] removes
/// them in a single transaction.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{like_pattern, Page, SortOrder};

text_enum! {
    /// Processing status of a tax return
    pub enum TaxReturnStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Review => "review",
        Completed => "completed",
        Filed => "filed",
        Cancelled => "cancelled",
    }
}

impl TaxReturnStatus {
    /// Filed and cancelled returns take no further work
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaxReturnStatus::Filed | TaxReturnStatus::Cancelled)
    }
}

text_enum! {
    /// Payment status of the filing fee
    pub enum PaymentStatus {
        Pending => "pending",
        Paid => "paid",
        Refunded => "refunded",
        Failed => "failed",
    }
}

/// Error returned for a malformed tax year
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Tax year must look like 2023-24 (two consecutive years), got '{0}'")]
pub struct InvalidTaxYear(pub String);

/// UK tax year such as `2023-24` (6 April 2023 to 5 April 2024)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaxYear {
    start: i32,
}

impl TaxYear {
    pub fn new(start: i32) -> Result<Self, InvalidTaxYear> {
        if !(1900..=9997).contains(&start) {
            return Err(InvalidTaxYear(start.to_string()));
        }
        Ok(Self { start })
    }

    /// Calendar year in which the tax year starts
    pub fn start_year(&self) -> i32 {
        self.start
    }

    /// Online filing deadline: 31 January after the tax year ends
    pub fn filing_deadline(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start + 2, 1, 31).unwrap_or(NaiveDate::MAX)
    }

    /// Tax year containing `date` (years start on 6 April)
    pub fn containing(date: NaiveDate) -> Self {
        let starts_this_year = (date.month(), date.day()) >= (4, 6);
        let start = if starts_this_year { date.year() } else { date.year() - 1 };
        Self { start }
    }
}

impl fmt::Display for TaxYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.start, (self.start + 1) % 100)
    }
}

impl FromStr for TaxYear {
    type Err = InvalidTaxYear;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidTaxYear(s.to_string());

        let (first, second) = s.split_once('-').ok_or_else(invalid)?;
        if first.len() != 4
            || second.len() != 2
            || !first.bytes().chain(second.bytes()).all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let start: i32 = first.parse().map_err(|_| invalid())?;
        let end: i32 = second.parse().map_err(|_| invalid())?;
        if end != (start + 1) % 100 {
            return Err(invalid());
        }

        TaxYear::new(start).map_err(|_| invalid())
    }
}

impl Serialize for TaxYear {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaxYear {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

const TAX_RETURN_SELECT: &str = r#"
    SELECT tr.id, tr.customer_id, tr.accountant_id, tr.tax_year, tr.status, tr.payment_status,
           tr.total_income, tr.total_expenses, tr.tax_due, tr.refund_amount, tr.price,
           tr.deadline, tr.filed_date, tr.hmrc_reference, tr.notes,
           tr.created_at, tr.updated_at,
           c.user_id AS customer_user_id,
           cu.first_name || ' ' || cu.last_name AS customer_name,
           a.user_id AS accountant_user_id,
           au.first_name || ' ' || au.last_name AS accountant_name
    FROM tax_returns tr
    JOIN customers c ON c.id = tr.customer_id
    JOIN users cu ON cu.id = c.user_id
    LEFT JOIN accountants a ON a.id = tr.accountant_id
    LEFT JOIN users au ON au.id = a.user_id
"#;

/// Tax return joined with the users that own it
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaxReturn {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub accountant_id: Option<Uuid>,

    /// Tax year text, e.g. `2023-24`
    pub tax_year: String,

    pub status: TaxReturnStatus,
    pub payment_status: PaymentStatus,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub tax_due: Decimal,
    pub refund_amount: Decimal,

    /// Filing fee
    pub price: Option<Decimal>,

    pub deadline: Option<NaiveDate>,
    pub filed_date: Option<DateTime<Utc>>,

    /// Submission reference issued by HMRC
    pub hmrc_reference: Option<String>,

    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// User ID of the owning customer
    pub customer_user_id: Uuid,
    pub customer_name: String,

    /// User ID of the assigned accountant
    pub accountant_user_id: Option<Uuid>,
    pub accountant_name: Option<String>,
}

impl TaxReturn {
    /// User IDs allowed to act on this return (owning customer and assigned accountant)
    pub fn owner_ids(&self) -> Vec<Uuid> {
        let mut owners = vec![self.customer_user_id];
        owners.extend(self.accountant_user_id);
        owners
    }
}

/// Input for creating a tax return
#[derive(Debug, Clone)]
pub struct CreateTaxReturn {
    pub customer_id: Uuid,
    pub tax_year: TaxYear,
    pub price: Option<Decimal>,

    /// Defaults to the tax year's filing deadline
    pub deadline: Option<NaiveDate>,

    pub notes: Option<String>,
}

/// Partial update of a tax return; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct UpdateTaxReturn {
    pub status: Option<TaxReturnStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub total_income: Option<Decimal>,
    pub total_expenses: Option<Decimal>,
    pub tax_due: Option<Decimal>,
    pub refund_amount: Option<Decimal>,
    pub price: Option<Decimal>,
    pub deadline: Option<NaiveDate>,

    /// Use `Some(None)` to clear
    pub notes: Option<Option<String>>,
}

impl UpdateTaxReturn {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.payment_status.is_none()
            && self.total_income.is_none()
            && self.total_expenses.is_none()
            && self.tax_due.is_none()
            && self.refund_amount.is_none()
            && self.price.is_none()
            && self.deadline.is_none()
            && self.notes.is_none()
    }

    /// True when only `notes` is being changed
    pub fn only_notes(&self) -> bool {
        UpdateTaxReturn {
            notes: None,
            ..self.clone()
        }
        .is_empty()
    }
}

text_enum! {
    /// Sortable tax return columns
    #[derive(Default)]
    pub enum TaxReturnSort {
        #[default]
        CreatedAt => "createdAt",
        UpdatedAt => "updatedAt",
        TaxYear => "taxYear",
        Status => "status",
        Deadline => "deadline",
    }
}

impl TaxReturnSort {
    fn column(&self) -> &'static str {
        match self {
            TaxReturnSort::CreatedAt => "tr.created_at",
            TaxReturnSort::UpdatedAt => "tr.updated_at",
            TaxReturnSort::TaxYear => "tr.tax_year",
            TaxReturnSort::Status => "tr.status",
            TaxReturnSort::Deadline => "tr.deadline",
        }
    }
}

/// Filters for listing tax returns
///
/// `customer_id` and `accountant_id` scope the list to one owner.
#[derive(Debug, Clone, Default)]
pub struct TaxReturnFilter {
    pub customer_id: Option<Uuid>,
    pub accountant_id: Option<Uuid>,
    pub status: Option<TaxReturnStatus>,
    pub tax_year: Option<String>,

    /// Matches customer name, HMRC reference or notes
    pub search: Option<String>,

    pub sort_by: TaxReturnSort,
    pub sort_order: SortOrder,
}

impl TaxReturnFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE TRUE");

        if let Some(customer_id) = self.customer_id {
            qb.push(" AND tr.customer_id = ");
            qb.push_bind(customer_id);
        }
        if let Some(accountant_id) = self.accountant_id {
            qb.push(" AND tr.accountant_id = ");
            qb.push_bind(accountant_id);
        }
        if let Some(status) = self.status {
            qb.push(" AND tr.status = ");
            qb.push_bind(status);
        }
        if let Some(tax_year) = &self.tax_year {
            qb.push(" AND tr.tax_year = ");
            qb.push_bind(tax_year.clone());
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search);
            qb.push(" AND (cu.first_name || ' ' || cu.last_name ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR tr.hmrc_reference ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR tr.notes ILIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }
    }
}

/// Number of returns in one status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StatusCount {
    pub status: TaxReturnStatus,
    pub count: i64,
}

/// Per tax year totals for the admin report
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaxYearReport {
    pub tax_year: String,
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub filed: i64,
    pub cancelled: i64,
    pub total_income: Decimal,
    pub total_tax_due: Decimal,

    /// Sum of prices of paid returns
    pub revenue: Decimal,
}

/// Document files released by [`TaxReturn::delete_cascade`]
#[derive(Debug, Clone, Default)]
pub struct DeletedTaxReturn {
    /// Stored names of the deleted documents' files
    pub stored_files: Vec<String>,
}

impl TaxReturn {
    /// Creates a tax return
    ///
    /// # Errors
    ///
    /// Returns a unique violation on `tax_returns_customer_year_key` if the
    /// customer already has a return for the year.
    pub async fn create(pool: &PgPool, data: CreateTaxReturn) -> Result<Self, sqlx::Error> {
        let deadline = data
            .deadline
            .unwrap_or_else(|| data.tax_year.filing_deadline());

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO tax_returns (customer_id, tax_year, price, deadline, notes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(data.customer_id)
        .bind(data.tax_year.to_string())
        .bind(data.price)
        .bind(deadline)
        .bind(data.notes)
        .fetch_one(pool)
        .await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("{} WHERE tr.id = $1", TAX_RETURN_SELECT);

        sqlx::query_as::<_, TaxReturn>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Whether the customer already has a return for the tax year
    pub async fn exists_for_year(
        pool: &PgPool,
        customer_id: Uuid,
        tax_year: TaxYear,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM tax_returns WHERE customer_id = $1 AND tax_year = $2)",
        )
        .bind(customer_id)
        .bind(tax_year.to_string())
        .fetch_one(pool)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        filter: &TaxReturnFilter,
        page: Page,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(TAX_RETURN_SELECT);
        filter.push_where(&mut qb);
        qb.push(format!(
            " ORDER BY {} {}, tr.id",
            filter.sort_by.column(),
            filter.sort_order.sql()
        ));
        qb.push(" LIMIT ");
        qb.push_bind(page.limit);
        qb.push(" OFFSET ");
        qb.push_bind(page.offset());

        qb.build_query_as::<TaxReturn>().fetch_all(pool).await
    }

    pub async fn count(pool: &PgPool, filter: &TaxReturnFilter) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM tax_returns tr \
             JOIN customers c ON c.id = tr.customer_id \
             JOIN users cu ON cu.id = c.user_id",
        );
        filter.push_where(&mut qb);

        qb.build_query_scalar::<i64>().fetch_one(pool).await
    }

    /// Most recently created returns
    pub async fn recent(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!("{} ORDER BY tr.created_at DESC LIMIT $1", TAX_RETURN_SELECT);

        sqlx::query_as::<_, TaxReturn>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Updates the given fields of a tax return
    ///
    /// Returns `None` if the return doesn't exist.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateTaxReturn,
    ) -> Result<Option<Self>, sqlx::Error> {
        if data.is_empty() {
            return Self::find_by_id(pool, id).await;
        }

        let mut assignments = Vec::new();
        let mut bind_count = 1;
        let mut assign = |column: &str| {
            bind_count += 1;
            assignments.push(format!("{} = ${}", column, bind_count));
        };

        if data.status.is_some() {
            assign("status");
        }
        if data.payment_status.is_some() {
            assign("payment_status");
        }
        if data.total_income.is_some() {
            assign("total_income");
        }
        if data.total_expenses.is_some() {
            assign("total_expenses");
        }
        if data.tax_due.is_some() {
            assign("tax_due");
        }
        if data.refund_amount.is_some() {
            assign("refund_amount");
        }
        if data.price.is_some() {
            assign("price");
        }
        if data.deadline.is_some() {
            assign("deadline");
        }
        if data.notes.is_some() {
            assign("notes");
        }

        let query = format!(
            "UPDATE tax_returns SET {} WHERE id = $1 RETURNING id",
            assignments.join(", ")
        );

        let mut q = sqlx::query_scalar::<_, Uuid>(&query).bind(id);

        if let Some(status) = data.status {
            q = q.bind(status);
        }
        if let Some(payment_status) = data.payment_status {
            q = q.bind(payment_status);
        }
        if let Some(total_income) = data.total_income {
            q = q.bind(total_income);
        }
        if let Some(total_expenses) = data.total_expenses {
            q = q.bind(total_expenses);
        }
        if let Some(tax_due) = data.tax_due {
            q = q.bind(tax_due);
        }
        if let Some(refund_amount) = data.refund_amount {
            q = q.bind(refund_amount);
        }
        if let Some(price) = data.price {
            q = q.bind(price);
        }
        if let Some(deadline) = data.deadline {
            q = q.bind(deadline);
        }
        if let Some(notes) = data.notes {
            q = q.bind(notes);
        }

        match q.fetch_optional(pool).await? {
            Some(id) => Self::find_by_id(pool, id).await,
            None => Ok(None),
        }
    }

    /// Sets the status without validating the transition
    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: TaxReturnStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        Self::update(
            pool,
            id,
            UpdateTaxReturn {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    /// Assigns an accountant; a pending return moves to `in_progress`
    pub async fn assign_accountant(
        pool: &PgPool,
        id: Uuid,
        accountant_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE tax_returns
            SET accountant_id = $2,
                status = CASE WHEN status = 'pending' THEN 'in_progress' ELSE status END
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(accountant_id)
        .fetch_optional(pool)
        .await?;

        match updated {
            Some(id) => Self::find_by_id(pool, id).await,
            None => Ok(None),
        }
    }

    /// Records the HMRC submission: status `filed`, reference and filing date
    pub async fn mark_filed(
        pool: &PgPool,
        id: Uuid,
        hmrc_reference: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE tax_returns
            SET status = 'filed', hmrc_reference = $2, filed_date = NOW()
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(hmrc_reference)
        .fetch_optional(pool)
        .await?;

        match updated {
            Some(id) => Self::find_by_id(pool, id).await,
            None => Ok(None),
        }
    }

    /// Recomputes `total_income` and `total_expenses` from the child rows
    pub async fn recalculate_totals<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE tax_returns
            SET total_income = COALESCE(
                    (SELECT SUM(amount) FROM income_sources WHERE tax_return_id = $1), 0),
                total_expenses = COALESCE(
                    (SELECT SUM(amount) FROM expenses WHERE tax_return_id = $1), 0)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Deletes a return and every child row in one transaction
    ///
    /// Returns `None` (and commits nothing) if the return doesn't exist. The
    /// caller is responsible for removing the returned document files.
    pub async fn delete_cascade(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<DeletedTaxReturn>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let stored_files: Vec<String> =
            sqlx::query_scalar("SELECT stored_name FROM documents WHERE tax_return_id = $1")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        for table in ["messages", "documents", "expenses", "income_sources", "payments"] {
            sqlx::query(&format!("DELETE FROM {} WHERE tax_return_id = $1", table))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let deleted = sqlx::query("DELETE FROM tax_returns WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(DeletedTaxReturn { stored_files }))
    }

    pub async fn count_by_status(pool: &PgPool) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM tax_returns GROUP BY status ORDER BY status",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn report_by_year(pool: &PgPool) -> Result<Vec<TaxYearReport>, sqlx::Error> {
        sqlx::query_as::<_, TaxYearReport>(
            r#"
            SELECT tax_year,
                   COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                   COUNT(*) FILTER (WHERE status IN ('in_progress', 'review')) AS in_progress,
                   COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                   COUNT(*) FILTER (WHERE status = 'filed') AS filed,
                   COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
                   COALESCE(SUM(total_income), 0) AS total_income,
                   COALESCE(SUM(tax_due), 0) AS total_tax_due,
                   COALESCE(SUM(price) FILTER (WHERE payment_status = 'paid'), 0) AS revenue
            FROM tax_returns
            GROUP BY tax_year
            ORDER BY tax_year DESC
            "#,
        )
        .fetch_all(pool)
        .await
    }
}
