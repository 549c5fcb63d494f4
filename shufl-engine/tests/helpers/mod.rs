//! Shared test helpers for shufl-engine integration tests

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_catalog;

pub use fixtures::{
    create_test_engine, create_test_engine_with, features, ids, seed_track,
    seed_uniform_library, test_config, track, TestEngine, TOKEN, USER,
};
pub use mock_catalog::{features_for, MockCatalog};
