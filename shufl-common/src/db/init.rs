//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates the engine tables.
//! Table creation is idempotent and runs on every startup.

use crate::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Open the database file, creating it and its parent directory if missing
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets the monitor loop read while request handlers write
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with all tables created.
///
/// Every connection to `sqlite::memory:` is a separate database, so the pool
/// is capped at one connection.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_tables(&pool).await?;

    Ok(pool)
}

/// Create every table used by the engine (idempotent)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_enriched_tracks_table(pool).await?;
    create_user_track_prefs_table(pool).await?;
    create_user_library_table(pool).await?;
    Ok(())
}

async fn create_enriched_tracks_table(pool: &SqlitePool) -> Result<()> {
    // Audio-feature columns are NULL when the feature fetch failed
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enriched_tracks (
            catalog_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            artists TEXT NOT NULL DEFAULT '[]',
            artist_ids TEXT NOT NULL DEFAULT '[]',
            album TEXT,
            album_id TEXT,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            popularity INTEGER NOT NULL DEFAULT 0,
            preview_url TEXT,
            uri TEXT NOT NULL,
            genres TEXT NOT NULL DEFAULT '[]',
            danceability REAL,
            energy REAL,
            valence REAL,
            tempo REAL,
            instrumentalness REAL,
            acousticness REAL,
            liveness REAL,
            speechiness REAL,
            loudness REAL,
            musical_key INTEGER,
            mode INTEGER,
            time_signature INTEGER,
            last_refreshed TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_enriched_tracks_refreshed ON enriched_tracks(last_refreshed)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_track_prefs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_track_prefs (
            user_id TEXT NOT NULL,
            catalog_id TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            snoozed_until TIMESTAMP,
            last_played TIMESTAMP,
            tags TEXT NOT NULL DEFAULT '[]',
            updated_at TIMESTAMP NOT NULL,
            PRIMARY KEY (user_id, catalog_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_library_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_library (
            user_id TEXT NOT NULL,
            catalog_id TEXT NOT NULL,
            added_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (user_id, catalog_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
