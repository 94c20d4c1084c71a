//! Practice sessions
//!
//! A [`PracticeContext`] names the user, playlist, sitdown date and
//! delinquency window a session works against. [`PracticeSession`] wires
//! the snapshot cache, review coordinator and view-state cache for one
//! context; [`SessionRegistry`] keeps one session per (user, playlist).

use crate::backend::{bounded, AddItemsOutcome, PracticeBackend};
use crate::model::{QueueEntry, QueueMetrics, QueueSnapshot, SnapshotKey};
use crate::review::{ReviewOutcome, StagedReviewCoordinator, SubmitOutcome};
use crate::session_state::{SessionStateCache, SessionStateTiming, StateScope};
use crate::snapshot::QueueSnapshotCache;
use crate::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tunetrees_common::config::PracticeConfig;
use tunetrees_common::events::{EventBus, PracticeEvent};
use tunetrees_common::time::{resolve_sitdown_date, sitdown_override_from_env};

/// Everything a session needs to know about who is practicing and when
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PracticeContext {
    pub user_id: i64,
    pub playlist_id: i64,
    pub sitdown_date: NaiveDate,
    pub delinquency_window_days: i64,
    pub show_submitted: bool,
}

impl PracticeContext {
    /// Resolve the sitdown date and delinquency window for a user.
    ///
    /// Backend lookups that fail fall through to the next source.
    pub async fn resolve(
        backend: &dyn PracticeBackend,
        config: &PracticeConfig,
        user_id: i64,
        playlist_id: i64,
    ) -> Self {
        let stored = match bounded(config.request_timeout, backend.stored_sitdown_date(user_id)).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(user_id, "Could not read stored sitdown date: {}", e);
                None
            }
        };
        let sitdown = resolve_sitdown_date(
            sitdown_override_from_env().as_deref(),
            stored.as_deref(),
            Utc::now().naive_utc(),
        );

        let window = match bounded(config.request_timeout, backend.delinquency_window(user_id)).await {
            Ok(Some(days)) if days >= 0 => days,
            Ok(_) => config.default_delinquency_window_days,
            Err(e) => {
                warn!(user_id, "Could not read delinquency window preference: {}", e);
                config.default_delinquency_window_days
            }
        };

        Self {
            user_id,
            playlist_id,
            sitdown_date: sitdown.date(),
            delinquency_window_days: window,
            show_submitted: false,
        }
    }

    pub fn snapshot_key(&self) -> SnapshotKey {
        SnapshotKey {
            user_id: self.user_id,
            playlist_id: self.playlist_id,
            sitdown_date: self.sitdown_date,
            show_completed: self.show_submitted,
        }
    }
}

/// Display list plus metrics over the whole queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueView {
    pub sitdown_date: NaiveDate,
    pub show_submitted: bool,
    pub entries: Vec<QueueEntry>,
    pub metrics: QueueMetrics,
}

pub struct PracticeSession {
    context: PracticeContext,
    show_submitted: AtomicBool,
    refill_batch_size: u32,
    events: EventBus,
    cache: Arc<QueueSnapshotCache>,
    coordinator: Arc<StagedReviewCoordinator>,
    view_state: SessionStateCache,
}

impl PracticeSession {
    /// Build the session and load its first snapshot.
    ///
    /// A failed first fetch is reported on the event bus; the session is
    /// still usable and retries on the next read.
    pub async fn init(
        context: PracticeContext,
        backend: Arc<dyn PracticeBackend>,
        events: EventBus,
        config: &PracticeConfig,
    ) -> Self {
        let cache = Arc::new(QueueSnapshotCache::new(
            Arc::clone(&backend),
            events.clone(),
            context.delinquency_window_days,
            config.request_timeout,
        ));
        let coordinator = Arc::new(StagedReviewCoordinator::new(
            context.playlist_id,
            context.sitdown_date,
            Arc::clone(&cache),
            Arc::clone(&backend),
            events.clone(),
            config.request_timeout,
        ));
        let view_state = SessionStateCache::new(
            backend,
            StateScope::Full,
            SessionStateTiming {
                debounce: config.session_state_debounce,
                scroll_restore_grace: config.scroll_restore_grace,
                request_timeout: config.request_timeout,
            },
        );

        let session = Self {
            show_submitted: AtomicBool::new(context.show_submitted),
            context,
            refill_batch_size: config.refill_batch_size,
            events,
            cache,
            coordinator,
            view_state,
        };

        match session.snapshot().await {
            Ok(snapshot) => info!(
                user_id = session.context.user_id,
                playlist_id = session.context.playlist_id,
                sitdown = %session.context.sitdown_date,
                entries = snapshot.entries.len(),
                "Practice session started"
            ),
            Err(e) => warn!(
                user_id = session.context.user_id,
                playlist_id = session.context.playlist_id,
                "Practice session started without a queue: {}",
                e
            ),
        }
        session
    }

    /// Context with the current show-submitted toggle
    pub fn context(&self) -> PracticeContext {
        PracticeContext {
            show_submitted: self.show_submitted(),
            ..self.context.clone()
        }
    }

    pub fn show_submitted(&self) -> bool {
        self.show_submitted.load(Ordering::SeqCst)
    }

    pub fn set_show_submitted(&self, show: bool) {
        self.show_submitted.store(show, Ordering::SeqCst);
    }

    pub fn cache(&self) -> &Arc<QueueSnapshotCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<StagedReviewCoordinator> {
        &self.coordinator
    }

    pub fn view_state(&self) -> &SessionStateCache {
        &self.view_state
    }

    pub async fn snapshot(&self) -> Result<Arc<QueueSnapshot>> {
        self.cache.fetch_snapshot(self.context().snapshot_key()).await
    }

    /// Current display list and metrics.
    ///
    /// When the fetch fails but an older snapshot exists, that snapshot is
    /// served.
    pub async fn queue_view(&self) -> Result<QueueView> {
        let show_submitted = self.show_submitted();
        let snapshot = match self.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => self.cache.current().ok_or(e)?,
        };

        Ok(QueueView {
            sitdown_date: self.context.sitdown_date,
            show_submitted,
            entries: snapshot.display_entries(show_submitted),
            metrics: snapshot.metrics(),
        })
    }

    pub async fn refresh(&self, force_regenerate: bool) -> Result<Arc<QueueSnapshot>> {
        self.cache
            .refresh(self.context().snapshot_key(), force_regenerate)
            .await
    }

    /// Refill with `count` items, or the configured batch size
    pub async fn refill(&self, count: Option<u32>) -> Result<Vec<QueueEntry>> {
        self.snapshot().await?;
        self.cache
            .refill(count.unwrap_or(self.refill_batch_size))
            .await
    }

    pub async fn add_items(&self, item_ids: &[i64]) -> Result<AddItemsOutcome> {
        self.snapshot().await?;
        self.cache.add_items(item_ids).await
    }

    pub async fn stage(&self, item_id: i64, grade: &str) -> Result<ReviewOutcome> {
        self.snapshot().await?;
        self.coordinator.stage(item_id, grade).await
    }

    pub async fn clear(&self, item_id: i64) -> Result<ReviewOutcome> {
        self.snapshot().await?;
        self.coordinator.clear(item_id).await
    }

    pub async fn submit(&self) -> Result<SubmitOutcome> {
        self.snapshot().await?;
        self.coordinator.submit().await
    }

    /// Ask the view to bring an item into sight
    pub fn scroll_to_item(&self, item_id: i64) {
        self.events.emit_lossy(PracticeEvent::ScrollToItem {
            playlist_id: self.context.playlist_id,
            item_id,
            timestamp: Utc::now(),
        });
    }

    pub async fn on_visibility_hidden(&self) {
        self.view_state.on_visibility_hidden().await;
    }

    pub async fn teardown(&self) {
        self.view_state.teardown().await;
        info!(
            user_id = self.context.user_id,
            playlist_id = self.context.playlist_id,
            "Practice session closed"
        );
    }
}

/// One session per (user, playlist), created on first use
pub struct SessionRegistry {
    backend: Arc<dyn PracticeBackend>,
    events: EventBus,
    config: PracticeConfig,
    sessions: RwLock<HashMap<(i64, i64), Arc<PracticeSession>>>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn PracticeBackend>, events: EventBus, config: PracticeConfig) -> Self {
        Self {
            backend,
            events,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &PracticeConfig {
        &self.config
    }

    pub async fn get(&self, user_id: i64, playlist_id: i64) -> Option<Arc<PracticeSession>> {
        self.sessions.read().await.get(&(user_id, playlist_id)).cloned()
    }

    pub async fn get_or_init(&self, user_id: i64, playlist_id: i64) -> Arc<PracticeSession> {
        if let Some(session) = self.get(user_id, playlist_id).await {
            return session;
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(&(user_id, playlist_id)) {
            return Arc::clone(session);
        }

        let context =
            PracticeContext::resolve(self.backend.as_ref(), &self.config, user_id, playlist_id).await;
        let session = Arc::new(
            PracticeSession::init(context, Arc::clone(&self.backend), self.events.clone(), &self.config)
                .await,
        );
        sessions.insert((user_id, playlist_id), Arc::clone(&session));
        session
    }

    /// Tear down and forget one session
    pub async fn close(&self, user_id: i64, playlist_id: i64) -> bool {
        let removed = self.sessions.write().await.remove(&(user_id, playlist_id));
        match removed {
            Some(session) => {
                session.teardown().await;
                true
            }
            None => false,
        }
    }

    pub async fn flush_all(&self) {
        let sessions: Vec<Arc<PracticeSession>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.on_visibility_hidden().await;
        }
    }

    pub async fn teardown_all(&self) {
        let sessions: Vec<Arc<PracticeSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.teardown().await;
        }
        info!(sessions = sessions.len(), "All practice sessions closed");
    }
}
