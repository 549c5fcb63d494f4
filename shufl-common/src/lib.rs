//! # Shufl Common Library
//!
//! Shared code for the shufl workspace:
//! - Error type shared by every crate
//! - Configuration file loading and root folder resolution
//! - SQLite pool initialization and table creation
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
