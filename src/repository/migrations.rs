//! Database migrations using diesel_migrations.
//!
//! Embeds migrations at compile time and runs them via blocking tasks
//! to work with async connections. Applying a database that carries
//! migrations this binary does not know about is a downgrade and aborts.

use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use super::pool::DieselError;

// Embed SQLite migrations (uses diesel_migrations harness)
pub const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

fn establish(database_url: &str) -> Result<diesel::SqliteConnection, DieselError> {
    let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
    diesel::SqliteConnection::establish(url).map_err(|e| {
        DieselError::DatabaseError(
            diesel::result::DatabaseErrorKind::Unknown,
            Box::new(e.to_string()),
        )
    })
}

/// Run pending migrations for a database URL.
///
/// Creates a sync connection and runs migrations in a blocking task.
pub async fn run_migrations(database_url: &str) -> Result<(), DieselError> {
    let url = database_url.to_string();

    tokio::task::spawn_blocking(move || {
        let mut conn = establish(&url)?;

        check_downgrade(&mut conn)?;

        let migrations = conn
            .run_pending_migrations(SQLITE_MIGRATIONS)
            .map_err(DieselError::QueryBuilderError)?;

        for migration in &migrations {
            info!("Applied migration: {}", migration);
        }

        if migrations.is_empty() {
            info!("No pending migrations");
        }

        Ok(())
    })
    .await
    .map_err(|e| DieselError::QueryBuilderError(Box::new(e)))?
}

/// Abort if the database was written by a newer binary.
fn check_downgrade(conn: &mut diesel::SqliteConnection) -> Result<(), DieselError> {
    let applied = match conn.applied_migrations() {
        Ok(applied) => applied,
        // Fresh database: no migration table yet.
        Err(_) => return Ok(()),
    };

    let known: Vec<String> = conn
        .pending_migrations(SQLITE_MIGRATIONS)
        .map_err(DieselError::QueryBuilderError)?
        .iter()
        .map(|m| m.name().to_string())
        .collect();

    for version in &applied {
        let version_str = version.to_string();
        let is_embedded = embedded_versions().contains(&version_str) || known.contains(&version_str);
        if !is_embedded {
            return Err(DieselError::QueryBuilderError(
                format!(
                    "database schema version {} is newer than this binary; refusing to downgrade",
                    version_str
                )
                .into(),
            ));
        }
    }

    Ok(())
}

/// Versions shipped with this binary, derived from the embedded set.
fn embedded_versions() -> Vec<String> {
    use diesel::migration::MigrationSource;
    MigrationSource::<diesel::sqlite::Sqlite>::migrations(&SQLITE_MIGRATIONS)
        .map(|ms| {
            ms.iter()
                .map(|m| m.name().version().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations_apply_to_fresh_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite:{}", db_path.display());

        run_migrations(&url).await.unwrap();

        // Second run is a no-op.
        run_migrations(&url).await.unwrap();
    }

    #[test]
    fn test_embedded_versions_not_empty() {
        assert!(!embedded_versions().is_empty());
    }
}
