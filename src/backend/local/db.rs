use std::collections::HashSet;
use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::backend::BackendError;

pub type DbPool = Pool<SqliteConnectionManager>;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../../migrations/001_initial.sql"),
    ),
    (
        "002_posts_and_likes",
        include_str!("../../../migrations/002_posts_and_likes.sql"),
    ),
];

fn configure(conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )
}

/// File-backed pool in WAL mode. Creates missing parent directories.
pub fn create_pool(db_path: &Path) -> Result<DbPool, BackendError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(configure);
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;

    Ok(pool)
}

/// Single-connection in-memory database. Every connection to `:memory:` is a separate database.
pub fn memory_pool() -> Result<DbPool, BackendError> {
    let manager = SqliteConnectionManager::memory().with_init(configure);
    Ok(Pool::builder()
        .max_size(1)
        .max_lifetime(None)
        .idle_timeout(None)
        .build(manager)?)
}

/// Apply pending migrations in order. Each one commits together with its
/// `schema_version` row, so a failed script leaves nothing half-applied.
pub fn run_migrations(pool: &DbPool) -> Result<(), BackendError> {
    let mut conn = pool.get()?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: HashSet<String> = {
        let mut stmt = conn.prepare("SELECT name FROM schema_version")?;
        let names = stmt.query_map([], |row| row.get(0))?;
        names.collect::<Result<_, _>>()?
    };

    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|(name, _)| !applied.contains(*name))
        .collect();
    if pending.is_empty() {
        tracing::debug!("Schema is up to date");
        return Ok(());
    }

    for (name, sql) in pending {
        tracing::info!("Applying migration: {}", name);
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO schema_version (name) VALUES (?1)", params![name])?;
        tx.commit()?;
    }
    Ok(())
}
