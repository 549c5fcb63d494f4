//! Active session manager
//!
//! One in-memory session per user. Starting a session ranks the user's
//! library, clears the external playback queue and seeds it. A background
//! monitor then polls each session's external playback on a fixed interval
//! and pushes the next slice of the ranked sequence whenever the external
//! queue runs low. The sequence is circular: after the last track the
//! cursor returns to the top.
//!
//! Locking: the session map sits behind an `RwLock` and each session behind
//! its own `Mutex`. Neither lock is held across a catalog call; state is
//! copied out, the call is made, and the cursor is written back under a
//! fresh lock.

use crate::catalog::{track_uri, CatalogClient, PlaybackQueue, PlaybackState};
use crate::config::{CacheConfig, SessionConfig};
use crate::credentials::CredentialProvider;
use crate::db::PreferenceStore;
use crate::enrichment::EnrichmentPipeline;
use crate::error::{Error, Result};
use crate::library::LibraryService;
use crate::models::{EnrichedTrack, FeedbackAction, UserTrackPreference};
use crate::preferences::ShufflePreferences;
use crate::queue::QueueGenerator;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A user's live shuffle session
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub user_id: String,
    /// Ranked catalog IDs, fixed for the life of the session
    pub sequence: Vec<String>,
    /// Next sequence index to push
    pub cursor: usize,
    pub preferences: ShufflePreferences,
    pub created_at: DateTime<Utc>,
    /// Catalog ID the external player was last seen playing
    pub last_seen_playing: Option<String>,
}

struct SessionHandle {
    session: Mutex<ActiveSession>,
    in_flight: AtomicBool,
}

impl SessionHandle {
    fn new(session: ActiveSession) -> Self {
        Self {
            session: Mutex::new(session),
            in_flight: AtomicBool::new(false),
        }
    }
}

/// Clears the in-flight flag when a session check ends, even on panic
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Returned by [`SessionManager::start_session`]
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStart {
    pub session_id: Uuid,
    pub sequence_len: usize,
    /// Items skipped while clearing the external queue
    pub cleared: usize,
    /// Tracks pushed to the external queue
    pub seeded: usize,
    pub replaced_previous: bool,
}

/// What one monitor check observed and did
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub queue_depth: usize,
    pub near_end: bool,
    pub pushed: usize,
    /// Cursor after the check
    pub cursor: usize,
}

impl TickReport {
    pub fn topped_up(&self) -> bool {
        self.pushed > 0
    }
}

/// An upcoming sequence entry with fresh metadata and score
#[derive(Debug, Clone)]
pub struct QueuedTrack {
    /// Offset from the session cursor
    pub position: usize,
    pub track: EnrichedTrack,
    pub score: f64,
    pub served_stale: bool,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    generator: Arc<QueueGenerator>,
    enrichment: Arc<EnrichmentPipeline>,
    library: Arc<LibraryService>,
    preferences: Arc<dyn PreferenceStore>,
    catalog: Arc<dyn CatalogClient>,
    credentials: Arc<dyn CredentialProvider>,
    config: SessionConfig,
    cache: CacheConfig,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        generator: Arc<QueueGenerator>,
        enrichment: Arc<EnrichmentPipeline>,
        library: Arc<LibraryService>,
        preferences: Arc<dyn PreferenceStore>,
        catalog: Arc<dyn CatalogClient>,
        credentials: Arc<dyn CredentialProvider>,
        config: SessionConfig,
        cache: CacheConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            generator,
            enrichment,
            library,
            preferences,
            catalog,
            credentials,
            config,
            cache,
        }
    }

    /// Rank the user's library, reset the external queue and seed it.
    ///
    /// Fails only if ranking fails; clearing and seeding are best-effort.
    /// Any previous session for the user is replaced.
    pub async fn start_session(
        &self,
        user_id: &str,
        preferences: ShufflePreferences,
        credential: &str,
    ) -> Result<SessionStart> {
        preferences.validate()?;

        if self.cache.refresh_on_session_start {
            match self.library.refresh_stale(user_id, credential).await {
                Ok(report) => {
                    if let Some(e) = report.aggregate_error() {
                        warn!(user_id = %user_id, error = %e, "Stale refresh incomplete, using cached data");
                    }
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Stale refresh failed, using cached data");
                }
            }
        }

        let sequence = self.generator.generate(user_id, &preferences).await?;

        let cleared = self.clear_external_queue(user_id, credential).await;

        let seed_len = self.config.top_up_batch.min(sequence.len());
        let seeded = self
            .push_tracks(user_id, credential, &sequence[..seed_len])
            .await;

        let session = ActiveSession {
            session_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            cursor: seeded % sequence.len(),
            sequence,
            preferences,
            created_at: Utc::now(),
            last_seen_playing: None,
        };
        let start = SessionStart {
            session_id: session.session_id,
            sequence_len: session.sequence.len(),
            cleared,
            seeded,
            replaced_previous: false,
        };

        let previous = self
            .sessions
            .write()
            .await
            .insert(user_id.to_string(), Arc::new(SessionHandle::new(session)));

        info!(
            user_id = %user_id,
            session_id = %start.session_id,
            tracks = start.sequence_len,
            seeded = start.seeded,
            replaced = previous.is_some(),
            "Shuffle session started"
        );

        Ok(SessionStart {
            replaced_previous: previous.is_some(),
            ..start
        })
    }

    /// Remove the user's session. Returns false if there was none.
    pub async fn end_session(&self, user_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(user_id);
        match &removed {
            Some(_) => info!(user_id = %user_id, "Shuffle session ended"),
            None => debug!(user_id = %user_id, "No session to end"),
        }
        removed.is_some()
    }

    /// Store feedback for a track. Takes effect the next time the track is
    /// scored; the running sequence is not reordered.
    pub async fn record_feedback(
        &self,
        user_id: &str,
        catalog_id: &str,
        action: FeedbackAction,
    ) -> Result<UserTrackPreference> {
        if catalog_id.trim().is_empty() {
            return Err(Error::Validation("track ID must not be empty".into()));
        }

        let pref = self
            .preferences
            .upsert_feedback(user_id, catalog_id, action, Utc::now())
            .await?;

        info!(
            user_id = %user_id,
            catalog_id = %catalog_id,
            action = %action,
            weight = pref.weight,
            "Feedback recorded"
        );
        Ok(pref)
    }

    /// The next `preview_length` entries from the cursor, rescored against
    /// the session's preferences and the latest user signals
    pub async fn current_queue(&self, user_id: &str) -> Result<Vec<QueuedTrack>> {
        let handle = self.handle(user_id).await?;

        let (ids, preferences) = {
            let session = handle.session.lock().await;
            let len = session.sequence.len();
            let count = self.config.preview_length.min(len);
            let ids: Vec<String> = (0..count)
                .map(|offset| session.sequence[(session.cursor + offset) % len].clone())
                .collect();
            (ids, session.preferences.clone())
        };

        let credential = match self.credentials.credential(user_id).await {
            Ok(credential) => Some(credential),
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "No credential, reading cache only");
                None
            }
        };

        let signals = self.preferences.get_for_tracks(user_id, &ids).await?;
        let scorer = self.generator.scorer();
        let staleness = self.cache.staleness();
        let now = Utc::now();

        let lookups = ids.iter().map(|id| {
            let credential = credential.as_deref();
            async move {
                match credential {
                    Some(credential) => self
                        .enrichment
                        .get_or_refresh(id, credential, staleness)
                        .await
                        .map(|lookup| Some((lookup.track, lookup.served_stale))),
                    None => self
                        .enrichment
                        .cache()
                        .get(id)
                        .await
                        .map(|track| track.map(|t| (t, false))),
                }
            }
        });
        let resolved = join_all(lookups).await;

        let mut queue = Vec::with_capacity(ids.len());
        for (position, (id, result)) in ids.iter().zip(resolved).enumerate() {
            match result {
                Ok(Some((track, served_stale))) => {
                    let score = scorer.rank_score(&track, &preferences, signals.get(id), now);
                    queue.push(QueuedTrack {
                        position,
                        track,
                        score,
                        served_stale,
                    });
                }
                Ok(None) => {
                    debug!(user_id = %user_id, catalog_id = %id, "Queued track not cached, skipping");
                }
                Err(e) => {
                    warn!(user_id = %user_id, catalog_id = %id, error = %e, "Could not resolve queued track");
                }
            }
        }

        Ok(queue)
    }

    /// Copy of the user's session state
    pub async fn snapshot(&self, user_id: &str) -> Option<ActiveSession> {
        let handle = self.sessions.read().await.get(user_id).cloned()?;
        let session = handle.session.lock().await;
        Some(session.clone())
    }

    pub async fn active_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        users.sort();
        users
    }

    /// Run the monitor until `cancel` fires
    pub fn spawn_monitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = time::interval(manager.config.monitor_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                interval_secs = manager.config.monitor_interval_secs,
                "Session monitor started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Session monitor stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        manager.run_tick().await;
                    }
                }
            }
        })
    }

    /// Dispatch one independent check per active session. Returns how many
    /// checks were started; sessions with a check still running are skipped.
    pub async fn run_tick(self: &Arc<Self>) -> usize {
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.read().await.values().cloned().collect();

        let mut dispatched = 0;
        for handle in handles {
            if handle.in_flight.load(Ordering::Acquire) {
                debug!("Previous session check still running, skipping");
                continue;
            }

            let manager = Arc::clone(self);
            dispatched += 1;
            tokio::spawn(async move {
                let Some(_guard) = InFlight::acquire(&handle.in_flight) else {
                    return;
                };
                if let Err(e) = manager.check_session(&handle).await {
                    let user_id = handle.session.lock().await.user_id.clone();
                    warn!(user_id = %user_id, error = %e, "Session check failed, retrying next tick");
                }
            });
        }

        dispatched
    }

    /// Run one monitor check for a user now. Returns None when a check for
    /// that session is already running.
    pub async fn check_user(&self, user_id: &str) -> Result<Option<TickReport>> {
        let handle = self.handle(user_id).await?;
        let Some(_guard) = InFlight::acquire(&handle.in_flight) else {
            return Ok(None);
        };
        self.check_session(&handle).await.map(Some)
    }

    async fn handle(&self, user_id: &str) -> Result<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::NoActiveSession(user_id.to_string()))
    }

    /// True while `handle` is still the user's registered session
    async fn is_current(&self, user_id: &str, handle: &Arc<SessionHandle>) -> bool {
        self.sessions
            .read()
            .await
            .get(user_id)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    async fn check_session(&self, handle: &Arc<SessionHandle>) -> Result<TickReport> {
        let user_id = handle.session.lock().await.user_id.clone();

        let credential = self.credentials.credential(&user_id).await?;
        let state = self.catalog.get_playback_state(&credential).await?;
        let queue = self.catalog.get_playback_queue(&credential).await?;

        self.track_now_playing(handle, &user_id, state.as_ref()).await;

        let near_end = self.is_near_end(state.as_ref());
        let queue_depth = queue.depth();

        if !self.needs_top_up(&queue, near_end) {
            let cursor = handle.session.lock().await.cursor;
            debug!(user_id = %user_id, queue_depth, cursor, "External queue healthy");
            return Ok(TickReport {
                queue_depth,
                near_end,
                pushed: 0,
                cursor,
            });
        }

        let (start, batch) = {
            let session = handle.session.lock().await;
            let len = session.sequence.len();
            if len == 0 {
                return Ok(TickReport {
                    queue_depth,
                    near_end,
                    pushed: 0,
                    cursor: 0,
                });
            }
            let start = session.cursor % len;
            let count = self.config.top_up_batch.min(len - start);
            (start, session.sequence[start..start + count].to_vec())
        };

        // Ended or replaced while the catalog calls were in flight
        if !self.is_current(&user_id, handle).await {
            debug!(user_id = %user_id, "Session replaced during check, not pushing");
            return Ok(TickReport {
                queue_depth,
                near_end,
                pushed: 0,
                cursor: start,
            });
        }

        let pushed = self.push_tracks(&user_id, &credential, &batch).await;

        let cursor = {
            let mut session = handle.session.lock().await;
            let len = session.sequence.len();
            session.cursor = (start + pushed) % len;
            session.cursor
        };

        info!(
            user_id = %user_id,
            queue_depth,
            near_end,
            pushed,
            cursor,
            "Topped up external queue"
        );

        Ok(TickReport {
            queue_depth,
            near_end,
            pushed,
            cursor,
        })
    }

    fn needs_top_up(&self, queue: &PlaybackQueue, near_end: bool) -> bool {
        queue.depth() < self.config.low_water_mark || near_end
    }

    fn is_near_end(&self, state: Option<&PlaybackState>) -> bool {
        state
            .and_then(PlaybackState::progress_fraction)
            .is_some_and(|played| played >= 1.0 - self.config.near_end_fraction)
    }

    /// Record a play when the external player moves to a new track
    async fn track_now_playing(
        &self,
        handle: &SessionHandle,
        user_id: &str,
        state: Option<&PlaybackState>,
    ) {
        let Some(playing) = state
            .and_then(|s| s.item.as_ref())
            .and_then(|item| item.id.clone())
        else {
            return;
        };

        let changed = {
            let mut session = handle.session.lock().await;
            if session.last_seen_playing.as_deref() == Some(playing.as_str()) {
                false
            } else {
                session.last_seen_playing = Some(playing.clone());
                true
            }
        };

        if changed {
            if let Err(e) = self
                .preferences
                .mark_played(user_id, &playing, Utc::now())
                .await
            {
                warn!(user_id = %user_id, catalog_id = %playing, error = %e, "Failed to record play");
            }
        }
    }

    /// Skip past everything in the external queue. The API has no clear
    /// operation, so this issues one skip per queued item.
    async fn clear_external_queue(&self, user_id: &str, credential: &str) -> usize {
        let queue = match self.catalog.get_playback_queue(credential).await {
            Ok(queue) => queue,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Could not read external queue, not clearing");
                return 0;
            }
        };

        let mut skipped = 0;
        for _ in 0..queue.depth() {
            if let Err(e) = self.catalog.skip_next(credential).await {
                warn!(user_id = %user_id, skipped, error = %e, "Clearing external queue stopped early");
                break;
            }
            skipped += 1;
            time::sleep(self.config.clear_skip_delay()).await;
        }

        debug!(user_id = %user_id, skipped, "Cleared external queue");
        skipped
    }

    /// Push tracks in order, stopping at the first failure. Returns how
    /// many were pushed.
    async fn push_tracks(&self, user_id: &str, credential: &str, catalog_ids: &[String]) -> usize {
        let mut pushed = 0;
        for id in catalog_ids {
            if let Err(e) = self.catalog.push_to_queue(credential, &track_uri(id)).await {
                warn!(user_id = %user_id, catalog_id = %id, error = %e, "Failed to push track to external queue");
                break;
            }
            pushed += 1;
        }
        pushed
    }
}
