//! Per-user track signal persistence

use super::{PreferenceStore, MAX_BIND_PARAMS};
use crate::error::{Error, Result};
use crate::models::{FeedbackAction, UserTrackPreference, NEUTRAL_WEIGHT};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;

fn preference_from_row(row: &SqliteRow) -> Result<UserTrackPreference> {
    let tags: String = row.try_get("tags")?;
    Ok(UserTrackPreference {
        user_id: row.try_get("user_id")?,
        catalog_id: row.try_get("catalog_id")?,
        weight: row.try_get("weight")?,
        snoozed_until: row.try_get("snoozed_until")?,
        last_played: row.try_get("last_played")?,
        tags: serde_json::from_str(&tags)?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Load one preference row
pub async fn load_preference(
    pool: &SqlitePool,
    user_id: &str,
    catalog_id: &str,
) -> Result<Option<UserTrackPreference>> {
    let row = sqlx::query(
        r#"
        SELECT user_id, catalog_id, weight, snoozed_until, last_played, tags, updated_at
        FROM user_track_prefs
        WHERE user_id = ? AND catalog_id = ?
        "#,
    )
    .bind(user_id)
    .bind(catalog_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(preference_from_row).transpose()
}

/// Write the weight for a feedback action. A snooze also sets the snooze
/// deadline; like/dislike keep whatever deadline is already stored.
pub async fn save_feedback(
    pool: &SqlitePool,
    user_id: &str,
    catalog_id: &str,
    action: FeedbackAction,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_track_prefs (user_id, catalog_id, weight, snoozed_until, tags, updated_at)
        VALUES (?, ?, ?, ?, '[]', ?)
        ON CONFLICT(user_id, catalog_id) DO UPDATE SET
            weight = excluded.weight,
            snoozed_until = COALESCE(excluded.snoozed_until, user_track_prefs.snoozed_until),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id)
    .bind(catalog_id)
    .bind(action.weight())
    .bind(action.snooze_until(now))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a play without touching weight or snooze
pub async fn save_last_played(
    pool: &SqlitePool,
    user_id: &str,
    catalog_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_track_prefs (user_id, catalog_id, weight, last_played, tags, updated_at)
        VALUES (?, ?, ?, ?, '[]', ?)
        ON CONFLICT(user_id, catalog_id) DO UPDATE SET
            last_played = excluded.last_played,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id)
    .bind(catalog_id)
    .bind(NEUTRAL_WEIGHT)
    .bind(at)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(())
}

/// SQLite-backed [`PreferenceStore`]
#[derive(Debug, Clone)]
pub struct SqlitePreferenceStore {
    pool: SqlitePool,
}

impl SqlitePreferenceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceStore for SqlitePreferenceStore {
    async fn get(&self, user_id: &str, catalog_id: &str) -> Result<Option<UserTrackPreference>> {
        load_preference(&self.pool, user_id, catalog_id).await
    }

    async fn get_for_tracks(
        &self,
        user_id: &str,
        catalog_ids: &[String],
    ) -> Result<HashMap<String, UserTrackPreference>> {
        let mut prefs = HashMap::new();

        for chunk in catalog_ids.chunks(MAX_BIND_PARAMS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT user_id, catalog_id, weight, snoozed_until, last_played, tags, updated_at \
                 FROM user_track_prefs WHERE user_id = ",
            );
            qb.push_bind(user_id.to_string());
            qb.push(" AND catalog_id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");

            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in &rows {
                let pref = preference_from_row(row)?;
                prefs.insert(pref.catalog_id.clone(), pref);
            }
        }

        Ok(prefs)
    }

    async fn upsert_feedback(
        &self,
        user_id: &str,
        catalog_id: &str,
        action: FeedbackAction,
        now: DateTime<Utc>,
    ) -> Result<UserTrackPreference> {
        save_feedback(&self.pool, user_id, catalog_id, action, now).await?;

        load_preference(&self.pool, user_id, catalog_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "preference for user {} track {} after write",
                    user_id, catalog_id
                ))
            })
    }

    async fn mark_played(&self, user_id: &str, catalog_id: &str, at: DateTime<Utc>) -> Result<()> {
        save_last_played(&self.pool, user_id, catalog_id, at).await
    }
}
