//! Application state management

use crate::config::AppConfig;
use crate::db::sqlite::SqliteDb;
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::notifications::ToastBoard;
use crate::services::{
    HttpRecommendationBackend, ProgressTracker, RecommendationBackend, RecommendationClient,
    ReplacementProposal, ScraperStateSync, WatchlistService,
};
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Application state shared across all commands
pub struct AppState {
    pub config: AppConfig,

    /// Persisted keyed store
    pub store: SharedStore,

    /// Lifecycle event channel
    pub bus: EventBus,

    /// Toasts shown so far
    pub notifications: Arc<ToastBoard>,

    pub tracker: Arc<ProgressTracker>,

    pub scraper: Arc<ScraperStateSync>,

    pub watchlist: Arc<WatchlistService>,

    /// Replacement proposals awaiting confirmation (proposal id -> proposal)
    pub pending_proposals: DashMap<String, ReplacementProposal>,
}

impl AppState {
    /// Create new application state backed by the SQLite store in `config.data_dir`
    pub async fn new(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        tracing::info!("Data directory: {:?}", config.data_dir);

        let sqlite = Arc::new(SqliteDb::new(&config.database_path())?);
        Self::with_store(config, sqlite).await
    }

    /// Create application state over an existing store
    pub async fn with_store(config: AppConfig, store: SharedStore) -> Result<Self> {
        let backend: Option<Arc<dyn RecommendationBackend>> = match &config.backend_url {
            Some(url) => {
                tracing::info!("Recommendation backend: {}", url);
                Some(Arc::new(HttpRecommendationBackend::new(
                    url.clone(),
                    config.request_timeout,
                )?))
            }
            None => {
                tracing::warn!("No recommendation backend configured");
                None
            }
        };

        Self::with_backend(config, store, backend).await
    }

    /// Create application state with an explicit recommendation backend
    pub async fn with_backend(
        config: AppConfig,
        store: SharedStore,
        backend: Option<Arc<dyn RecommendationBackend>>,
    ) -> Result<Self> {
        let bus = EventBus::new();
        let notifications = Arc::new(ToastBoard::default());

        let tracker = Arc::new(ProgressTracker::new(
            notifications.clone(),
            config.progress_stall_timeout,
            config.progress_retention,
        ));
        let scraper = Arc::new(ScraperStateSync::new(store.clone(), notifications.clone()));
        let client = Arc::new(RecommendationClient::new(backend, bus.clone(), notifications.clone()));
        let watchlist = Arc::new(
            WatchlistService::load(store.clone(), client, config.message_max_length).await?,
        );

        Ok(Self {
            config,
            store,
            bus,
            notifications,
            tracker,
            scraper,
            watchlist,
            pending_proposals: DashMap::new(),
        })
    }

    /// Start following the event channel
    pub async fn activate(&self) -> Result<()> {
        self.tracker.start(&self.bus);
        self.scraper.start(&self.bus).await?;
        tracing::info!("Application state activated");
        Ok(())
    }

    /// Stop following the event channel
    pub fn shutdown(&self) {
        self.scraper.stop();
        self.tracker.stop();
        tracing::info!("Application state shut down");
    }

    /// Hold a proposal until it is committed, discarded or expired
    pub fn hold_proposal(&self, proposal: ReplacementProposal) {
        self.expire_proposals(Utc::now());
        self.pending_proposals.insert(proposal.id.clone(), proposal);
    }

    /// Take a held, unexpired proposal out of the pending set
    pub fn take_proposal(&self, proposal_id: &str) -> Result<ReplacementProposal> {
        self.take_proposal_at(proposal_id, Utc::now())
    }

    pub fn take_proposal_at(&self, proposal_id: &str, now: DateTime<Utc>) -> Result<ReplacementProposal> {
        match self.pending_proposals.remove(proposal_id) {
            Some((_, proposal)) if !self.is_expired(&proposal, now) => Ok(proposal),
            Some(_) => {
                tracing::info!("Replacement proposal {} expired", proposal_id);
                Err(AppError::NotFound(format!("Replacement proposal {} expired", proposal_id)))
            }
            None => Err(AppError::NotFound(format!("Replacement proposal {}", proposal_id))),
        }
    }

    /// Drop held proposals older than the configured TTL, returning how many went
    pub fn expire_proposals(&self, now: DateTime<Utc>) -> usize {
        let before = self.pending_proposals.len();
        self.pending_proposals
            .retain(|_, proposal| !self.is_expired(proposal, now));
        let expired = before.saturating_sub(self.pending_proposals.len());
        if expired > 0 {
            tracing::info!("Expired {} unconfirmed replacement proposals", expired);
        }
        expired
    }

    fn is_expired(&self, proposal: &ReplacementProposal, now: DateTime<Utc>) -> bool {
        (now - proposal.created_at).to_std().unwrap_or_default() >= self.config.proposal_ttl
    }
}
