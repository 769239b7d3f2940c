/// Schema migrations embedded from the workspace `migrations/` directory

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::PgPool;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub applied_migrations: usize,
    pub latest_applied: Option<i64>,

    /// Newest migration compiled into this binary
    pub latest_available: Option<i64>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.latest_applied == self.latest_available
    }
}

/// Applies pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    info!(available = MIGRATOR.iter().count(), "Running database migrations");
    MIGRATOR.run(pool).await?;
    info!("Database schema is up to date");
    Ok(())
}

pub async fn get_migration_status(pool: &PgPool) -> Result<MigrationStatus, sqlx::Error> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'public' AND table_name = '_sqlx_migrations'
        )",
    )
    .fetch_one(pool)
    .await?;

    let (applied, latest_applied): (i64, Option<i64>) = if table_exists {
        sqlx::query_as(
            "SELECT COUNT(*), MAX(version) FROM _sqlx_migrations WHERE success = TRUE",
        )
        .fetch_one(pool)
        .await?
    } else {
        (0, None)
    };

    Ok(MigrationStatus {
        applied_migrations: applied as usize,
        latest_applied,
        latest_available: MIGRATOR.iter().map(|m| m.version).max(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_migrations_present() {
        assert!(MIGRATOR.iter().count() >= 1);
        assert!(MIGRATOR
            .iter()
            .any(|m| m.description.contains("initial schema")));
    }

    #[test]
    fn test_status_up_to_date() {
        let status = MigrationStatus {
            applied_migrations: 1,
            latest_applied: Some(20250101000000),
            latest_available: Some(20250101000000),
        };
        assert!(status.is_up_to_date());

        let behind = MigrationStatus {
            applied_migrations: 0,
            latest_applied: None,
            ..status
        };
        assert!(!behind.is_up_to_date());
    }
}
