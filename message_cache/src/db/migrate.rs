//! Embedded migrations for the cache and meta databases.

use anyhow::anyhow;
use diesel::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

/// Schema of a per-recording cache database (`messages`, `topic_ranges`).
pub const CACHE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/cache");

/// Schema of the shared meta database (`databases`).
pub const META_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/meta");

/// Bring a cache database up to date.
pub fn run_cache_migrations(conn: &mut SqliteConnection) -> anyhow::Result<()> {
    conn.run_pending_migrations(CACHE_MIGRATIONS)
        .map_err(|e| anyhow!(e))?;
    Ok(())
}

/// Bring the meta database up to date.
pub fn run_meta_migrations(conn: &mut SqliteConnection) -> anyhow::Result<()> {
    conn.run_pending_migrations(META_MIGRATIONS)
        .map_err(|e| anyhow!(e))?;
    Ok(())
}
