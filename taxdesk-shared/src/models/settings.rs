/// Key/value system settings editable by admins

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

/// Setting key holding the default filing fee
pub const DEFAULT_PRICE_KEY: &str = "default_price";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SystemSetting {
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, SystemSetting>(
            "SELECT key, value, description, updated_at FROM system_settings ORDER BY key",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn get(pool: &PgPool, key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, SystemSetting>(
            "SELECT key, value, description, updated_at FROM system_settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
    }

    /// Inserts or replaces a setting; the description is kept unless a new one is given
    pub async fn set(
        pool: &PgPool,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SystemSetting>(
            r#"
            INSERT INTO system_settings (key, value, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                description = COALESCE(EXCLUDED.description, system_settings.description)
            RETURNING key, value, description, updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .fetch_one(pool)
        .await
    }

    /// Default filing fee, if configured and parseable
    pub async fn default_price(pool: &PgPool) -> Result<Option<Decimal>, sqlx::Error> {
        let setting = Self::get(pool, DEFAULT_PRICE_KEY).await?;

        Ok(setting.and_then(|s| match s.value.trim().parse::<Decimal>() {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::warn!(value = %s.value, error = %e, "Ignoring unparseable default_price setting");
                None
            }
        }))
    }
}
