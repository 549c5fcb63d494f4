//! User library membership

use super::UserLibraryStore;
use crate::error::Result;
use crate::models::LibrarySummary;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

/// SQLite-backed [`UserLibraryStore`]
#[derive(Debug, Clone)]
pub struct SqliteUserLibrary {
    pool: SqlitePool,
}

impl SqliteUserLibrary {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserLibraryStore for SqliteUserLibrary {
    async fn add_tracks(&self, user_id: &str, catalog_ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut added = 0;

        for id in catalog_ids {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO user_library (user_id, catalog_id) VALUES (?, ?)",
            )
            .bind(user_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }

        tx.commit().await?;
        Ok(added)
    }

    async fn track_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT catalog_id FROM user_library WHERE user_id = ? ORDER BY added_at, rowid",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn summary(&self, user_id: &str) -> Result<LibrarySummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(t.catalog_id) AS enriched,
                COUNT(t.danceability) AS with_features
            FROM user_library l
            LEFT JOIN enriched_tracks t ON t.catalog_id = l.catalog_id
            WHERE l.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(LibrarySummary {
            total: row.try_get("total")?,
            enriched: row.try_get("enriched")?,
            with_features: row.try_get("with_features")?,
        })
    }
}
