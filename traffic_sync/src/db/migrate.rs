//! Embedded migrations, one set per backend.

use anyhow::anyhow;
use diesel::{Connection, PgConnection, SqliteConnection, connection::SimpleConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

/// SQLite migrations for the local store.
pub const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

/// PostgreSQL migrations for the remote store (adds the read-side indexes).
pub const POSTGRES_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/postgres");

/// Runs pending Diesel migrations on a SQLite database at the given URL.
///
/// This sets the SQLite journal mode to WAL and applies all embedded migrations, returning an error on failure.
pub fn run_sqlite(url: &str) -> anyhow::Result<()> {
    let mut conn = SqliteConnection::establish(url)?;
    conn.batch_execute("PRAGMA journal_mode=WAL;")?;
    apply_sqlite(&mut conn)
}

/// Applies pending SQLite migrations on an already open connection.
pub fn apply_sqlite(conn: &mut SqliteConnection) -> anyhow::Result<()> {
    conn.run_pending_migrations(SQLITE_MIGRATIONS)
        .map_err(|e| anyhow!(e))?;
    Ok(())
}

/// Runs pending Diesel migrations on a PostgreSQL database at the given URL.
pub fn run_postgres(url: &str) -> anyhow::Result<()> {
    let mut conn = PgConnection::establish(url)?;
    apply_postgres(&mut conn)
}

/// Applies pending PostgreSQL migrations on an already open connection.
pub fn apply_postgres(conn: &mut PgConnection) -> anyhow::Result<()> {
    conn.run_pending_migrations(POSTGRES_MIGRATIONS)
        .map_err(|e| anyhow!(e))?;
    Ok(())
}

/// Runs pending migrations for the given database URL by delegating to the appropriate backend.
///
/// URLs starting with "postgres://" or "postgresql://" go to PostgreSQL; anything else
/// (a `sqlite:` URL or a bare file path) is treated as SQLite.
pub fn run_all(database_url: &str) -> anyhow::Result<()> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        run_postgres(database_url)
    } else {
        run_sqlite(database_url)
    }
}
