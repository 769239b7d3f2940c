/// User model and database operations
///
/// Users are never hard-deleted. [`User::soft_delete`] stamps `deleted_at`,
/// rewrites the email to `deleted_<unix>_<email>` so the address can be
/// registered again, and clears the verification flag and any outstanding
/// one-time tokens. Only `deleted_at` decides whether an account is deleted.
///
/// # Example
///
/// ```no_run
/// # use taxdesk_shared::models::user::{User, CreateUser, Role};
/// # use sqlx::PgPool;
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let user = User::create(
///     &pool,
///     CreateUser {
///         email: "jane@example.com".to_string(),
///         password_hash: "$argon2id$...".to_string(),
///         first_name: "Jane".to_string(),
///         last_name: "Doe".to_string(),
///         phone: None,
///         role: Role::Customer,
///         is_verified: true,
///         verification_token: None,
///     },
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{like_pattern, Page, SortOrder};

text_enum! {
    /// Account role
    pub enum Role {
        Customer => "customer",
        Accountant => "accountant",
        Admin => "admin",
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone, role, \
     is_verified, verification_token, reset_password_token, reset_password_expires, \
     last_login, deleted_at, created_at, updated_at";

/// Prefix prepended to the email of soft-deleted accounts
pub const DELETED_EMAIL_PREFIX: &str = "deleted_";

/// User account
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,

    /// Unique login email
    pub email: String,

    /// Argon2id password hash
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,

    /// Whether the email address has been verified
    pub is_verified: bool,

    /// SHA-256 digest of the outstanding verification token
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,

    /// SHA-256 digest of the outstanding password reset token
    #[serde(skip_serializing)]
    pub reset_password_token: Option<String>,

    #[serde(skip_serializing)]
    pub reset_password_expires: Option<DateTime<Utc>>,

    pub last_login: Option<DateTime<Utc>>,

    /// Set by [`User::soft_delete`]
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating a user
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,

    /// Argon2id password hash (NOT the plaintext password)
    pub password_hash: String,

    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub is_verified: bool,

    /// Digest of the verification token, when verification is pending
    pub verification_token: Option<String>,
}

/// Partial update of a user; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,

    /// Use `Some(None)` to clear
    pub phone: Option<Option<String>>,

    pub is_verified: Option<bool>,
}

impl UpdateUser {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone.is_none()
            && self.is_verified.is_none()
    }
}

text_enum! {
    /// Sortable user columns
    #[derive(Default)]
    pub enum UserSort {
        #[default]
        CreatedAt => "createdAt",
        Email => "email",
        LastName => "lastName",
        Role => "role",
        LastLogin => "lastLogin",
    }
}

impl UserSort {
    fn column(&self) -> &'static str {
        match self {
            UserSort::CreatedAt => "created_at",
            UserSort::Email => "email",
            UserSort::LastName => "last_name",
            UserSort::Role => "role",
            UserSort::LastLogin => "last_login",
        }
    }
}

/// Filters for listing users
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub is_verified: Option<bool>,

    /// Matches first name, last name or email
    pub search: Option<String>,

    pub sort_by: UserSort,
    pub sort_order: SortOrder,
}

impl UserFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE deleted_at IS NULL");

        if let Some(role) = self.role {
            qb.push(" AND role = ");
            qb.push_bind(role);
        }
        if let Some(verified) = self.is_verified {
            qb.push(" AND is_verified = ");
            qb.push_bind(verified);
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search);
            qb.push(" AND (first_name ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR last_name ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR email ILIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }
    }
}

impl User {
    /// Creates a new user
    ///
    /// Accepts any executor so registration can create the user and its
    /// profile inside one transaction.
    ///
    /// # Errors
    ///
    /// Returns a unique violation on `users_email_key` if the email is taken.
    pub async fn create<'e, E>(executor: E, data: CreateUser) -> Result<Self, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let query = format!(
            "INSERT INTO users (email, password_hash, first_name, last_name, phone, role, \
             is_verified, verification_token) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(data.email)
            .bind(data.password_hash)
            .bind(data.first_name)
            .bind(data.last_name)
            .bind(data.phone)
            .bind(data.role)
            .bind(data.is_verified)
            .bind(data.verification_token)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Finds a user by email (case-insensitive)
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM users WHERE LOWER(email) = LOWER($1)", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    /// Finds the user holding a verification token digest
    pub async fn find_by_verification_token(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM users WHERE verification_token = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(token_hash)
            .fetch_optional(pool)
            .await
    }

    /// Finds the user holding an unexpired password reset token digest
    pub async fn find_by_reset_token(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM users \
             WHERE reset_password_token = $1 AND reset_password_expires > NOW()",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(token_hash)
            .fetch_optional(pool)
            .await
    }

    /// Updates the given fields of a user
    ///
    /// Returns `None` if the user doesn't exist. Accepts any executor so the
    /// profile can be updated in the same transaction.
    pub async fn update<'e, E>(
        executor: E,
        id: Uuid,
        data: UpdateUser,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        if data.is_empty() {
            let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
            return sqlx::query_as::<_, User>(&query)
                .bind(id)
                .fetch_optional(executor)
                .await;
        }

        let mut query = String::from("UPDATE users SET ");
        let mut assignments = Vec::new();
        let mut bind_count = 1;

        if data.first_name.is_some() {
            bind_count += 1;
            assignments.push(format!("first_name = ${}", bind_count));
        }
        if data.last_name.is_some() {
            bind_count += 1;
            assignments.push(format!("last_name = ${}", bind_count));
        }
        if data.phone.is_some() {
            bind_count += 1;
            assignments.push(format!("phone = ${}", bind_count));
        }
        if data.is_verified.is_some() {
            bind_count += 1;
            assignments.push(format!("is_verified = ${}", bind_count));
        }

        query.push_str(&assignments.join(", "));
        query.push_str(&format!(" WHERE id = $1 RETURNING {}", USER_COLUMNS));

        let mut q = sqlx::query_as::<_, User>(&query).bind(id);

        if let Some(first_name) = data.first_name {
            q = q.bind(first_name);
        }
        if let Some(last_name) = data.last_name {
            q = q.bind(last_name);
        }
        if let Some(phone) = data.phone {
            q = q.bind(phone);
        }
        if let Some(verified) = data.is_verified {
            q = q.bind(verified);
        }

        q.fetch_optional(executor).await
    }

    pub async fn update_last_login(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks the email verified and consumes the verification token
    pub async fn mark_verified(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET is_verified = TRUE, verification_token = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stores a password reset token digest with its expiry
    pub async fn set_reset_token(
        pool: &PgPool,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET reset_password_token = $2, reset_password_expires = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replaces the password hash and consumes any outstanding reset token
    pub async fn set_password(
        pool: &PgPool,
        id: Uuid,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users \
             SET password_hash = $2, reset_password_token = NULL, reset_password_expires = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-deletes a user
    ///
    /// Returns `false` if the user doesn't exist or is already deleted.
    pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users \
             SET email = $2 || EXTRACT(EPOCH FROM NOW())::BIGINT || '_' || email, \
                 is_verified = FALSE, \
                 verification_token = NULL, \
                 reset_password_token = NULL, \
                 reset_password_expires = NULL, \
                 deleted_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(DELETED_EMAIL_PREFIX)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists active users matching a filter
    pub async fn list(
        pool: &PgPool,
        filter: &UserFilter,
        page: Page,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM users", USER_COLUMNS));
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

        qb.build_query_as::<User>().fetch_all(pool).await
    }

    /// Counts active users matching a filter
    pub async fn count(pool: &PgPool, filter: &UserFilter) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        filter.push_where(&mut qb);

        qb.build_query_scalar::<i64>().fetch_one(pool).await
    }

    /// Counts active users per role
    pub async fn count_by_role(pool: &PgPool) -> Result<Vec<(Role, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (Role, i64)>(
            "SELECT role, COUNT(*) FROM users WHERE deleted_at IS NULL GROUP BY role ORDER BY role",
        )
        .fetch_all(pool)
        .await
    }
}
