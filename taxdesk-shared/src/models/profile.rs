/// Role-specific profiles
///
/// Every customer and accountant user owns exactly one profile row, created in
/// the same transaction as the user. Admins have no profile. [`UserAccount`]
/// pairs a [`User`] with its [`Profile`] for API responses.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::user::{Role, User};

const CUSTOMER_COLUMNS: &str = "id, user_id, utr_number, ni_number, date_of_birth, \
     address_line1, address_line2, city, postcode, country, created_at, updated_at";

const ACCOUNTANT_COLUMNS: &str = "id, user_id, qualification, license_number, specialization, \
     years_experience, is_available, max_clients, bio, created_at, updated_at";

/// Customer profile
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub user_id: Uuid,

    /// HMRC Unique Taxpayer Reference
    pub utr_number: Option<String>,

    /// National Insurance number
    pub ni_number: Option<String>,

    pub date_of_birth: Option<NaiveDate>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub country: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Customer profile fields; used both for creation and partial updates
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    pub utr_number: Option<String>,
    pub ni_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
}

impl Customer {
    pub async fn create<'e, E>(
        executor: E,
        user_id: Uuid,
        details: CustomerDetails,
    ) -> Result<Self, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let query = format!(
            "INSERT INTO customers (user_id, utr_number, ni_number, date_of_birth, \
             address_line1, address_line2, city, postcode, country) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, 'United Kingdom')) \
             RETURNING {}",
            CUSTOMER_COLUMNS
        );

        sqlx::query_as::<_, Customer>(&query)
            .bind(user_id)
            .bind(details.utr_number)
            .bind(details.ni_number)
            .bind(details.date_of_birth)
            .bind(details.address_line1)
            .bind(details.address_line2)
            .bind(details.city)
            .bind(details.postcode)
            .bind(details.country)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM customers WHERE id = $1", CUSTOMER_COLUMNS);

        sqlx::query_as::<_, Customer>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_user_id(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM customers WHERE user_id = $1", CUSTOMER_COLUMNS);

        sqlx::query_as::<_, Customer>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Overwrites the provided fields; absent fields keep their value
    pub async fn update_by_user_id<'e, E>(
        executor: E,
        user_id: Uuid,
        details: CustomerDetails,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let query = format!(
            "UPDATE customers SET \
             utr_number = COALESCE($2, utr_number), \
             ni_number = COALESCE($3, ni_number), \
             date_of_birth = COALESCE($4, date_of_birth), \
             address_line1 = COALESCE($5, address_line1), \
             address_line2 = COALESCE($6, address_line2), \
             city = COALESCE($7, city), \
             postcode = COALESCE($8, postcode), \
             country = COALESCE($9, country) \
             WHERE user_id = $1 \
             RETURNING {}",
            CUSTOMER_COLUMNS
        );

        sqlx::query_as::<_, Customer>(&query)
            .bind(user_id)
            .bind(details.utr_number)
            .bind(details.ni_number)
            .bind(details.date_of_birth)
            .bind(details.address_line1)
            .bind(details.address_line2)
            .bind(details.city)
            .bind(details.postcode)
            .bind(details.country)
            .fetch_optional(executor)
            .await
    }
}

/// Accountant profile
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Accountant {
    pub id: Uuid,
    pub user_id: Uuid,
    pub qualification: Option<String>,
    pub license_number: Option<String>,
    pub specialization: Option<String>,
    pub years_experience: i32,

    /// Whether the accountant accepts new assignments
    pub is_available: bool,

    pub max_clients: i32,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Accountant profile fields; used both for creation and partial updates
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountantDetails {
    pub qualification: Option<String>,
    pub license_number: Option<String>,
    pub specialization: Option<String>,
    pub years_experience: Option<i32>,
    pub is_available: Option<bool>,
    pub max_clients: Option<i32>,
    pub bio: Option<String>,
}

/// Accountant listing entry with workload
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AccountantSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
    pub years_experience: i32,
    pub is_available: bool,
    pub max_clients: i32,

    /// Assigned returns that are not filed or cancelled
    pub active_returns: i64,
}

impl Accountant {
    pub async fn create<'e, E>(
        executor: E,
        user_id: Uuid,
        details: AccountantDetails,
    ) -> Result<Self, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let query = format!(
            "INSERT INTO accountants (user_id, qualification, license_number, specialization, \
             years_experience, is_available, max_clients, bio) \
             VALUES ($1, $2, $3, $4, COALESCE($5, 0), COALESCE($6, TRUE), COALESCE($7, 50), $8) \
             RETURNING {}",
            ACCOUNTANT_COLUMNS
        );

        sqlx::query_as::<_, Accountant>(&query)
            .bind(user_id)
            .bind(details.qualification)
            .bind(details.license_number)
            .bind(details.specialization)
            .bind(details.years_experience)
            .bind(details.is_available)
            .bind(details.max_clients)
            .bind(details.bio)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM accountants WHERE id = $1", ACCOUNTANT_COLUMNS);

        sqlx::query_as::<_, Accountant>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_user_id(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM accountants WHERE user_id = $1", ACCOUNTANT_COLUMNS);

        sqlx::query_as::<_, Accountant>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Overwrites the provided fields; absent fields keep their value
    pub async fn update_by_user_id<'e, E>(
        executor: E,
        user_id: Uuid,
        details: AccountantDetails,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let query = format!(
            "UPDATE accountants SET \
             qualification = COALESCE($2, qualification), \
             license_number = COALESCE($3, license_number), \
             specialization = COALESCE($4, specialization), \
             years_experience = COALESCE($5, years_experience), \
             is_available = COALESCE($6, is_available), \
             max_clients = COALESCE($7, max_clients), \
             bio = COALESCE($8, bio) \
             WHERE user_id = $1 \
             RETURNING {}",
            ACCOUNTANT_COLUMNS
        );

        sqlx::query_as::<_, Accountant>(&query)
            .bind(user_id)
            .bind(details.qualification)
            .bind(details.license_number)
            .bind(details.specialization)
            .bind(details.years_experience)
            .bind(details.is_available)
            .bind(details.max_clients)
            .bind(details.bio)
            .fetch_optional(executor)
            .await
    }

    /// Lists active accountants with their current workload
    pub async fn list_summaries(
        pool: &PgPool,
        available_only: bool,
    ) -> Result<Vec<AccountantSummary>, sqlx::Error> {
        sqlx::query_as::<_, AccountantSummary>(
            r#"
            SELECT a.id, a.user_id, u.first_name, u.last_name, u.email,
                   a.qualification, a.specialization, a.years_experience,
                   a.is_available, a.max_clients,
                   COUNT(tr.id) FILTER (WHERE tr.status NOT IN ('filed', 'cancelled')) AS active_returns
            FROM accountants a
            JOIN users u ON u.id = a.user_id
            LEFT JOIN tax_returns tr ON tr.accountant_id = a.id
            WHERE u.is_verified = TRUE
              AND u.deleted_at IS NULL
              AND ($1 = FALSE OR a.is_available = TRUE)
            GROUP BY a.id, u.id
            ORDER BY u.last_name, u.first_name
            "#,
        )
        .bind(available_only)
        .fetch_all(pool)
        .await
    }
}

/// Profile attached to a user according to its role
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Profile {
    Customer(Customer),
    Accountant(Accountant),
    Admin,
}

/// A user together with its role profile
#[derive(Debug, Clone, Serialize)]
pub struct UserAccount {
    #[serde(flatten)]
    pub user: User,
    pub profile: Profile,
}

impl UserAccount {
    /// Loads the profile belonging to `user`
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` if a customer or accountant has no profile row.
    pub async fn load(pool: &PgPool, user: User) -> Result<Self, sqlx::Error> {
        let profile = match user.role {
            Role::Customer => Profile::Customer(
                Customer::find_by_user_id(pool, user.id)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?,
            ),
            Role::Accountant => Profile::Accountant(
                Accountant::find_by_user_id(pool, user.id)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?,
            ),
            Role::Admin => Profile::Admin,
        };

        Ok(Self { user, profile })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_details_deserialize_camel_case() {
        let details: CustomerDetails = serde_json::from_str(
            r#"{"utrNumber": "1234567890", "dateOfBirth": "1985-04-12", "postcode": "SW1A 1AA"}"#,
        )
        .unwrap();

        assert_eq!(details.utr_number.as_deref(), Some("1234567890"));
        assert_eq!(
            details.date_of_birth,
            NaiveDate::from_ymd_opt(1985, 4, 12)
        );
        assert!(details.country.is_none());
    }

    #[test]
    fn test_admin_profile_serializes_as_null() {
        let json = serde_json::to_value(Profile::Admin).unwrap();
        assert!(json.is_null());
    }
}
