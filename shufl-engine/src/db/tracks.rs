//! Enriched track persistence

use super::{TrackCache, MAX_BIND_PARAMS};
use crate::error::Result;
use crate::models::{AudioFeatures, EnrichedTrack};
use crate::preferences::TrackFilters;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

const TRACK_COLUMNS: &str = r#"
    t.catalog_id, t.title, t.artists, t.artist_ids, t.album, t.album_id,
    t.duration_ms, t.popularity, t.preview_url, t.uri, t.genres,
    t.danceability, t.energy, t.valence, t.tempo, t.instrumentalness,
    t.acousticness, t.liveness, t.speechiness, t.loudness, t.musical_key,
    t.mode, t.time_signature, t.last_refreshed
"#;

/// Save track, replacing any previous record for the same catalog ID
pub async fn save_track(pool: &SqlitePool, track: &EnrichedTrack) -> Result<()> {
    let features = track.audio_features.as_ref();

    sqlx::query(
        r#"
        INSERT INTO enriched_tracks (
            catalog_id, title, artists, artist_ids, album, album_id,
            duration_ms, popularity, preview_url, uri, genres,
            danceability, energy, valence, tempo, instrumentalness,
            acousticness, liveness, speechiness, loudness, musical_key,
            mode, time_signature, last_refreshed
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(catalog_id) DO UPDATE SET
            title = excluded.title,
            artists = excluded.artists,
            artist_ids = excluded.artist_ids,
            album = excluded.album,
            album_id = excluded.album_id,
            duration_ms = excluded.duration_ms,
            popularity = excluded.popularity,
            preview_url = excluded.preview_url,
            uri = excluded.uri,
            genres = excluded.genres,
            danceability = excluded.danceability,
            energy = excluded.energy,
            valence = excluded.valence,
            tempo = excluded.tempo,
            instrumentalness = excluded.instrumentalness,
            acousticness = excluded.acousticness,
            liveness = excluded.liveness,
            speechiness = excluded.speechiness,
            loudness = excluded.loudness,
            musical_key = excluded.musical_key,
            mode = excluded.mode,
            time_signature = excluded.time_signature,
            last_refreshed = excluded.last_refreshed
        "#,
    )
    .bind(&track.catalog_id)
    .bind(&track.title)
    .bind(serde_json::to_string(&track.artists)?)
    .bind(serde_json::to_string(&track.artist_ids)?)
    .bind(&track.album)
    .bind(&track.album_id)
    .bind(track.duration_ms)
    .bind(track.popularity)
    .bind(&track.preview_url)
    .bind(&track.uri)
    .bind(serde_json::to_string(&track.genres)?)
    .bind(features.map(|f| f.danceability))
    .bind(features.map(|f| f.energy))
    .bind(features.map(|f| f.valence))
    .bind(features.map(|f| f.tempo))
    .bind(features.map(|f| f.instrumentalness))
    .bind(features.map(|f| f.acousticness))
    .bind(features.map(|f| f.liveness))
    .bind(features.map(|f| f.speechiness))
    .bind(features.map(|f| f.loudness))
    .bind(features.map(|f| f.key))
    .bind(features.map(|f| f.mode))
    .bind(features.map(|f| f.time_signature))
    .bind(track.last_refreshed)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load track by catalog ID
pub async fn load_track(pool: &SqlitePool, catalog_id: &str) -> Result<Option<EnrichedTrack>> {
    let sql = format!(
        "SELECT {} FROM enriched_tracks t WHERE t.catalog_id = ?",
        TRACK_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(catalog_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(track_from_row).transpose()
}

fn track_from_row(row: &SqliteRow) -> Result<EnrichedTrack> {
    let artists: String = row.try_get("artists")?;
    let artist_ids: String = row.try_get("artist_ids")?;
    let genres: String = row.try_get("genres")?;

    // danceability doubles as the "has features" marker
    let danceability: Option<f64> = row.try_get("danceability")?;
    let audio_features = match danceability {
        Some(danceability) => Some(AudioFeatures {
            danceability,
            energy: row.try_get::<Option<f64>, _>("energy")?.unwrap_or_default(),
            valence: row.try_get::<Option<f64>, _>("valence")?.unwrap_or_default(),
            tempo: row.try_get::<Option<f64>, _>("tempo")?.unwrap_or_default(),
            instrumentalness: row
                .try_get::<Option<f64>, _>("instrumentalness")?
                .unwrap_or_default(),
            acousticness: row
                .try_get::<Option<f64>, _>("acousticness")?
                .unwrap_or_default(),
            liveness: row.try_get::<Option<f64>, _>("liveness")?.unwrap_or_default(),
            speechiness: row
                .try_get::<Option<f64>, _>("speechiness")?
                .unwrap_or_default(),
            loudness: row.try_get::<Option<f64>, _>("loudness")?.unwrap_or_default(),
            key: row.try_get::<Option<i32>, _>("musical_key")?.unwrap_or(-1),
            mode: row.try_get::<Option<i32>, _>("mode")?.unwrap_or_default(),
            time_signature: row
                .try_get::<Option<i32>, _>("time_signature")?
                .unwrap_or(4),
        }),
        None => None,
    };

    Ok(EnrichedTrack {
        catalog_id: row.try_get("catalog_id")?,
        title: row.try_get("title")?,
        artists: serde_json::from_str(&artists)?,
        artist_ids: serde_json::from_str(&artist_ids)?,
        album: row.try_get("album")?,
        album_id: row.try_get("album_id")?,
        duration_ms: row.try_get("duration_ms")?,
        popularity: row.try_get("popularity")?,
        preview_url: row.try_get("preview_url")?,
        uri: row.try_get("uri")?,
        genres: serde_json::from_str(&genres)?,
        audio_features,
        last_refreshed: row.try_get("last_refreshed")?,
    })
}

/// SQLite-backed [`TrackCache`]
#[derive(Debug, Clone)]
pub struct SqliteTrackCache {
    pool: SqlitePool,
}

impl SqliteTrackCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrackCache for SqliteTrackCache {
    async fn get(&self, catalog_id: &str) -> Result<Option<EnrichedTrack>> {
        load_track(&self.pool, catalog_id).await
    }

    async fn get_many(&self, catalog_ids: &[String]) -> Result<Vec<EnrichedTrack>> {
        let mut tracks = Vec::with_capacity(catalog_ids.len());

        for chunk in catalog_ids.chunks(MAX_BIND_PARAMS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT {} FROM enriched_tracks t WHERE t.catalog_id IN (",
                TRACK_COLUMNS
            ));
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(") ORDER BY t.catalog_id");

            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in &rows {
                tracks.push(track_from_row(row)?);
            }
        }

        Ok(tracks)
    }

    async fn upsert(&self, track: &EnrichedTrack) -> Result<()> {
        save_track(&self.pool, track).await
    }

    async fn playable(&self, user_id: &str, filters: &TrackFilters) -> Result<Vec<EnrichedTrack>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM enriched_tracks t \
             INNER JOIN user_library l ON l.catalog_id = t.catalog_id \
             WHERE l.user_id = ",
            TRACK_COLUMNS
        ));
        qb.push_bind(user_id.to_string());
        qb.push(" AND t.danceability IS NOT NULL");

        if filters.require_preview {
            qb.push(" AND t.preview_url IS NOT NULL");
        }

        for range in &filters.ranges {
            let column = range.feature.name();
            if let Some(min) = range.min {
                qb.push(format!(" AND t.{} >= ", column));
                qb.push_bind(min);
            }
            if let Some(max) = range.max {
                qb.push(format!(" AND t.{} <= ", column));
                qb.push_bind(max);
            }
        }

        qb.push(" ORDER BY t.catalog_id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut tracks = Vec::with_capacity(rows.len());
        for row in &rows {
            let track = track_from_row(row)?;
            // Genres live in a JSON column, so they are matched here
            if filters.matches_genres(&track) {
                tracks.push(track);
            }
        }

        Ok(tracks)
    }

    async fn stale_ids(
        &self,
        user_id: &str,
        threshold: Duration,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT l.catalog_id, t.last_refreshed
            FROM user_library l
            LEFT JOIN enriched_tracks t ON t.catalog_id = l.catalog_id
            WHERE l.user_id = ?
            ORDER BY l.added_at, l.catalog_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stale: Vec<(Option<DateTime<Utc>>, String)> = Vec::new();
        for row in &rows {
            let refreshed: Option<DateTime<Utc>> = row.try_get("last_refreshed")?;
            let eligible = match refreshed {
                Some(at) => shufl_common::time::is_older_than(at, threshold, now),
                None => true,
            };
            if eligible {
                stale.push((refreshed, row.try_get("catalog_id")?));
            }
        }

        // None sorts first: never-enriched tracks before old ones
        stale.sort_by_key(|(refreshed, _)| *refreshed);

        Ok(stale.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}
