//! shufl-engine - operator CLI for the shuffle queue engine
//!
//! Imports library tracks, inspects ranked queues, records feedback and
//! runs a live session with the background monitor until Ctrl-C.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shufl_common::config::{
    default_config_file, write_toml_config, RootFolderInitializer, RootFolderResolver,
};
use shufl_common::db::init_database;
use shufl_engine::catalog::SpotifyClient;
use shufl_engine::config::{resolve_access_token, EngineConfig};
use shufl_engine::credentials::StaticCredentials;
use shufl_engine::models::FeedbackAction;
use shufl_engine::preferences::ShufflePreferences;
use shufl_engine::ShuflEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "shufl-engine", version, about = "Personalized shuffle queue engine")]
struct Cli {
    /// Root folder holding shufl.db
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// Config file (default: platform config dir /shufl/shufl.toml)
    #[arg(long, global = true, env = "SHUFL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add tracks to a user's library and enrich them
    Import {
        #[arg(long)]
        user: String,
        #[arg(long)]
        token: Option<String>,
        /// File with one track ID or URI per line
        #[arg(long)]
        file: Option<PathBuf>,
        /// Track IDs or URIs
        ids: Vec<String>,
    },
    /// Print the ranked queue for a set of shuffle preferences
    Queue {
        #[arg(long)]
        user: String,
        /// JSON shuffle preferences
        #[arg(long)]
        prefs: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Record like, dislike or snooze for a track
    Feedback {
        #[arg(long)]
        user: String,
        #[arg(long)]
        track: String,
        #[arg(long)]
        action: FeedbackAction,
    },
    /// Show library counts
    Summary {
        #[arg(long)]
        user: String,
    },
    /// Start a session and keep the external queue topped up until Ctrl-C
    Session {
        #[arg(long)]
        user: String,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        prefs: PathBuf,
    },
    /// Write a config file holding every default setting
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| default_config_file("shufl"))
        .unwrap_or_else(|| PathBuf::from("shufl.toml"));
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(
        "Starting shufl-engine v{} (config {})",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    if let Command::InitConfig { force } = cli.command {
        write_default_config(&config_path, force)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let root_folder = RootFolderResolver::new("shufl")
        .with_cli_arg(cli.root_folder.clone())
        .with_config_file(Some(config_path))
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer.ensure_directory_exists()?;

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());
    let pool = match init_database(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    let catalog = Arc::new(SpotifyClient::new(
        config.catalog.base_url.clone(),
        config.catalog.request_timeout(),
    )?);
    let credentials = Arc::new(StaticCredentials::new());
    for (user, token) in &config.credentials {
        credentials.set(user.clone(), token.clone()).await;
    }

    let engine = ShuflEngine::new(config.clone(), pool, catalog, credentials.clone());

    match cli.command {
        Command::Import {
            user,
            token,
            file,
            ids,
        } => {
            let token = resolve_access_token(token.as_deref(), &config, &user)?;
            let mut track_ids = parse_track_ids(ids.iter().map(String::as_str));
            if let Some(file) = file {
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                track_ids.extend(parse_track_ids(content.lines()));
            }

            let summary = engine.library.import_library(&user, &track_ids, &token).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Queue { user, prefs, limit } => {
            let prefs = load_preferences(&prefs)?;
            let ranked = engine.generator.rank(&user, &prefs).await?;
            let ids: Vec<String> = ranked.iter().take(limit).map(|r| r.catalog_id.clone()).collect();
            let tracks = engine.tracks.get_many(&ids).await?;

            for (index, entry) in ranked.iter().take(limit).enumerate() {
                let name = tracks
                    .iter()
                    .find(|t| t.catalog_id == entry.catalog_id)
                    .map(|t| t.display_name())
                    .unwrap_or_else(|| entry.catalog_id.clone());
                println!("{:>3}. {:.3}  {}", index + 1, entry.score, name);
            }
        }
        Command::Feedback {
            user,
            track,
            action,
        } => {
            let pref = engine.sessions.record_feedback(&user, &track, action).await?;
            println!("{}", serde_json::to_string_pretty(&pref)?);
        }
        Command::Summary { user } => {
            let summary = engine.library.summary(&user).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Session { user, token, prefs } => {
            let token = resolve_access_token(token.as_deref(), &config, &user)?;
            credentials.set(user.clone(), token.clone()).await;
            let prefs = load_preferences(&prefs)?;

            let start = engine.sessions.start_session(&user, prefs, &token).await?;
            println!(
                "Session {} started: {} tracks ranked, {} queued",
                start.session_id, start.sequence_len, start.seeded
            );

            for entry in engine.sessions.current_queue(&user).await? {
                println!(
                    "{:>3}. {:.3}  {}{}",
                    entry.position + 1,
                    entry.score,
                    entry.track.display_name(),
                    if entry.served_stale { " (stale)" } else { "" }
                );
            }

            let cancel = CancellationToken::new();
            let monitor = engine.sessions.spawn_monitor(cancel.clone());

            tokio::signal::ctrl_c().await?;
            info!("Ctrl-C received, shutting down");

            cancel.cancel();
            engine.sessions.end_session(&user).await;
            monitor.await?;
        }
        // Handled before the database is opened
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_toml_config(&EngineConfig::default(), path)?;
    Ok(())
}

fn load_preferences(path: &Path) -> Result<ShufflePreferences> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let prefs: ShufflePreferences = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    prefs.validate()?;
    Ok(prefs)
}

/// Accepts bare IDs, `spotify:track:` URIs and open.spotify.com links;
/// blank lines and `#` comments are ignored
fn parse_track_ids<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    lines
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let id = line
                .strip_prefix("spotify:track:")
                .or_else(|| line.rsplit_once("/track/").map(|(_, rest)| rest))
                .unwrap_or(line);
            id.split('?').next().unwrap_or(id).to_string()
        })
        .collect()
}
