//! Enrichment pipeline, cache refresh and library import

mod helpers;

use chrono::{Duration, Utc};
use helpers::{
    create_test_engine, create_test_engine_with, features, features_for, ids, seed_track,
    test_config, track, TOKEN, USER,
};
use shufl_engine::catalog::CatalogError;
use shufl_engine::enrichment::EnrichmentStage;
use shufl_engine::Error;

#[tokio::test]
async fn test_enrich_merges_metadata_features_and_genres() {
    let t = create_test_engine().await;
    t.catalog.add_artist("a1", &["indie", "rock"]);
    t.catalog.add_artist("a2", &["rock", "shoegaze"]);
    t.catalog.add_track("t1", &["a1", "a2"], Some(features_for("t1", 0.6, 0.7, 128.0)));
    t.catalog.add_track("t2", &["a2"], Some(features_for("t2", 0.3, 0.2, 90.0)));

    let report = t.engine.enrichment.enrich(&ids(&["t1", "t2", "t1"]), TOKEN).await;

    assert_eq!(report.requested, 2);
    assert_eq!(report.stored, ids(&["t1", "t2"]));
    assert!(report.is_complete());

    let t1 = t.engine.tracks.get("t1").await.unwrap().unwrap();
    assert_eq!(t1.genres, vec!["indie", "rock", "shoegaze"]);
    assert_eq!(t1.artists, vec!["Artist a1", "Artist a2"]);
    assert_eq!(t1.album.as_deref(), Some("Album t1"));
    assert_eq!(t1.audio_features.unwrap().tempo, 128.0);

    let t2 = t.engine.tracks.get("t2").await.unwrap().unwrap();
    assert_eq!(t2.genres, vec!["rock", "shoegaze"]);

    // One request per endpoint; artists deduplicated across tracks
    assert_eq!(t.catalog.calls("tracks"), 1);
    assert_eq!(t.catalog.calls("audio_features"), 1);
    assert_eq!(t.catalog.batch_sizes("artists"), vec![2]);
}

#[tokio::test]
async fn test_feature_failure_still_stores_metadata() {
    let t = create_test_engine().await;
    t.catalog.add_artist("a1", &["folk"]);
    t.catalog.add_track("t1", &["a1"], Some(features_for("t1", 0.6, 0.7, 128.0)));
    t.catalog.fail_features(true);

    let report = t.engine.enrichment.enrich(&ids(&["t1"]), TOKEN).await;

    assert_eq!(report.stored, ids(&["t1"]));
    assert_eq!(report.missing_features, ids(&["t1"]));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, EnrichmentStage::AudioFeatures);
    assert!(matches!(report.aggregate_error(), Some(Error::Enrichment(_))));

    let stored = t.engine.tracks.get("t1").await.unwrap().unwrap();
    assert!(stored.audio_features.is_none());
    assert_eq!(stored.genres, vec!["folk"]);
}

#[tokio::test]
async fn test_artist_failure_leaves_genres_empty() {
    let t = create_test_engine().await;
    t.catalog.add_artist("a1", &["folk"]);
    t.catalog.add_track("t1", &["a1"], Some(features_for("t1", 0.6, 0.7, 128.0)));
    t.catalog.fail_artists(true);

    let report = t.engine.enrichment.enrich(&ids(&["t1"]), TOKEN).await;

    assert_eq!(report.stored, ids(&["t1"]));
    assert_eq!(report.failures[0].stage, EnrichmentStage::Artists);
    let stored = t.engine.tracks.get("t1").await.unwrap().unwrap();
    assert!(stored.genres.is_empty());
    assert!(stored.audio_features.is_some());
}

#[tokio::test]
async fn test_metadata_failure_stores_nothing() {
    let t = create_test_engine().await;
    t.catalog.add_track("t1", &["a1"], Some(features_for("t1", 0.6, 0.7, 128.0)));
    t.catalog.fail_tracks(true);

    let report = t.engine.enrichment.enrich(&ids(&["t1"]), TOKEN).await;

    assert!(report.stored.is_empty());
    assert!(report.not_found.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, EnrichmentStage::Tracks);
    // The feature branch ran regardless
    assert_eq!(t.catalog.calls("audio_features"), 1);
    assert!(t.engine.tracks.get("t1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_ids_reported_not_found() {
    let t = create_test_engine().await;
    t.catalog.add_track("t1", &[], None);

    let report = t.engine.enrichment.enrich(&ids(&["t1", "ghost"]), TOKEN).await;
    assert_eq!(report.stored, ids(&["t1"]));
    assert_eq!(report.not_found, ids(&["ghost"]));
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_lookups_chunked_at_batch_size() {
    let mut config = test_config();
    config.catalog.track_batch_size = 2;
    config.catalog.audio_feature_batch_size = 3;
    let t = create_test_engine_with(config).await;

    let all: Vec<String> = (0..5).map(|i| format!("t{}", i)).collect();
    for id in &all {
        t.catalog.add_track(id, &[], Some(features_for(id, 0.5, 0.5, 100.0)));
    }

    let report = t.engine.enrichment.enrich(&all, TOKEN).await;
    assert_eq!(report.stored.len(), 5);

    let mut track_batches = t.catalog.batch_sizes("tracks");
    track_batches.sort();
    assert_eq!(track_batches, vec![1, 2, 2]);
    let mut feature_batches = t.catalog.batch_sizes("audio_features");
    feature_batches.sort();
    assert_eq!(feature_batches, vec![2, 3]);
}

#[tokio::test]
async fn test_fresh_cache_hit_makes_no_upstream_calls() {
    let t = create_test_engine().await;
    seed_track(&t.engine, USER, &track("t1", Some(features(0.5, 0.5, 120.0)), Utc::now())).await;

    let lookup = t
        .engine
        .enrichment
        .get_or_refresh("t1", TOKEN, Duration::hours(24))
        .await
        .unwrap();

    assert!(!lookup.served_stale);
    assert_eq!(lookup.track.title, "Cached t1");
    assert_eq!(t.catalog.total_lookups(), 0);
}

#[tokio::test]
async fn test_stale_record_refreshed_from_catalog() {
    let t = create_test_engine().await;
    let old = Utc::now() - Duration::hours(30);
    seed_track(&t.engine, USER, &track("t1", Some(features(0.5, 0.5, 120.0)), old)).await;
    t.catalog.add_track("t1", &[], Some(features_for("t1", 0.9, 0.9, 140.0)));

    let lookup = t
        .engine
        .enrichment
        .get_or_refresh("t1", TOKEN, Duration::hours(24))
        .await
        .unwrap();

    assert!(!lookup.served_stale);
    assert_eq!(lookup.track.title, "Song t1");
    assert!(lookup.track.last_refreshed > old);
    assert_eq!(lookup.track.audio_features.unwrap().danceability, 0.9);
}

#[tokio::test]
async fn test_stale_record_served_when_refresh_fails() {
    let t = create_test_engine().await;
    let old = Utc::now() - Duration::hours(30);
    seed_track(&t.engine, USER, &track("t1", Some(features(0.5, 0.5, 120.0)), old)).await;
    t.catalog.fail_tracks(true);

    let lookup = t
        .engine
        .enrichment
        .get_or_refresh("t1", TOKEN, Duration::hours(24))
        .await
        .unwrap();

    assert!(lookup.served_stale);
    assert_eq!(lookup.track.title, "Cached t1");
    assert_eq!(t.catalog.calls("tracks"), 1);
}

#[tokio::test]
async fn test_missing_record_with_failed_refresh_is_upstream_error() {
    let t = create_test_engine().await;
    t.catalog.fail_tracks(true);

    let result = t
        .engine
        .enrichment
        .get_or_refresh("t1", TOKEN, Duration::hours(24))
        .await;
    assert!(matches!(result, Err(Error::Upstream(CatalogError::Api { status: 503, .. }))));

    t.catalog.fail_tracks(false);
    let result = t
        .engine
        .enrichment
        .get_or_refresh("ghost", TOKEN, Duration::hours(24))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_import_library_dedupes_and_summarizes() {
    let mut config = test_config();
    config.catalog.track_batch_size = 2;
    let t = create_test_engine_with(config).await;

    t.catalog.add_artist("a1", &["ambient"]);
    t.catalog.add_track("t1", &["a1"], Some(features_for("t1", 0.4, 0.3, 80.0)));
    t.catalog.add_track("t2", &["a1"], Some(features_for("t2", 0.5, 0.4, 85.0)));
    t.catalog.add_track("t3", &["a1"], None);

    let summary = t
        .engine
        .library
        .import_library(USER, &ids(&["t1", "t2", "t1", "t3", "ghost"]), TOKEN)
        .await
        .unwrap();

    assert_eq!(summary.requested, 5);
    assert_eq!(summary.unique, 4);
    assert_eq!(summary.newly_added, 4);
    assert_eq!(summary.enriched, 3);
    assert_eq!(summary.missing_features, 1);
    assert_eq!(summary.not_found, 1);
    assert_eq!(summary.failed_batches, 0);

    let library = t.engine.library_store.track_ids(USER).await.unwrap();
    assert_eq!(library, ids(&["t1", "t2", "t3", "ghost"]));

    let counts = t.engine.library.summary(USER).await.unwrap();
    assert_eq!(counts.total, 4);
    assert_eq!(counts.enriched, 3);
    assert_eq!(counts.with_features, 2);
}

#[tokio::test]
async fn test_import_continues_after_failed_batch() {
    let mut config = test_config();
    config.catalog.track_batch_size = 1;
    let t = create_test_engine_with(config).await;
    t.catalog.add_track("t1", &[], Some(features_for("t1", 0.4, 0.3, 80.0)));
    t.catalog.add_track("t2", &[], Some(features_for("t2", 0.4, 0.3, 80.0)));
    t.catalog.fail_features(true);

    let summary = t
        .engine
        .library
        .import_library(USER, &ids(&["t1", "t2"]), TOKEN)
        .await
        .unwrap();

    assert_eq!(summary.enriched, 2);
    assert_eq!(summary.failed_batches, 2);
    assert_eq!(summary.errors.len(), 2);
    assert!(summary.errors[0].starts_with("batch 1:"));
}

#[tokio::test]
async fn test_refresh_stale_only_touches_stale_library_tracks() {
    let t = create_test_engine().await;
    let now = Utc::now();
    seed_track(&t.engine, USER, &track("fresh", Some(features(0.5, 0.5, 120.0)), now)).await;
    seed_track(
        &t.engine,
        USER,
        &track("old", Some(features(0.5, 0.5, 120.0)), now - Duration::hours(48)),
    )
    .await;
    t.catalog.add_track("old", &[], Some(features_for("old", 0.1, 0.1, 60.0)));
    t.catalog.add_track("fresh", &[], Some(features_for("fresh", 0.1, 0.1, 60.0)));

    let report = t.engine.library.refresh_stale(USER, TOKEN).await.unwrap();

    assert_eq!(report.stored, ids(&["old"]));
    assert_eq!(t.catalog.batch_sizes("tracks"), vec![1]);
    let fresh = t.engine.tracks.get("fresh").await.unwrap().unwrap();
    assert_eq!(fresh.title, "Cached fresh");
}
