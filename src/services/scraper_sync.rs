//! Scraper State Synchronizer
//!
//! Mirrors the background price scraper from its `PriceScraper:*` events.
//! The mirror is driven by event type alone, it never guards on the current
//! state:
//!
//! | event        | effect                                                     |
//! |--------------|------------------------------------------------------------|
//! | `Initialize` | adopt `last_run`                                           |
//! | `OnChange`   | running, take max/min/current, clear error                 |
//! | `Complete`   | idle, zero max/min/current, `last_run` = observation time  |
//! | `Error`      | not running, record error, notify; `last_run` untouched    |

use crate::error::{AppError, Result};
use crate::events::{next_event, EventBus, LifecycleEvent};
use crate::models::ScraperState;
use crate::notifications::{Notification, SharedNotifier};
use crate::store::{self, SharedStore, SCRAPER_LAST_RUN_KEY};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const NOTIFICATION_ID: &str = "price-scraper";

/// Apply one event to `state`; returns false for events the scraper mirror does not consume
pub fn transition(state: &mut ScraperState, event: &LifecycleEvent, observed_at: DateTime<Utc>) -> bool {
    match event {
        LifecycleEvent::ScraperInitialize { last_run } => {
            state.last_run = *last_run;
        }
        LifecycleEvent::ScraperChange { max, min, current } => {
            state.is_running = true;
            state.max = *max;
            state.min = *min;
            state.current = *current;
            state.error = None;
        }
        LifecycleEvent::ScraperComplete => {
            state.is_running = false;
            state.max = 0.0;
            state.min = 0.0;
            state.current = 0.0;
            state.last_run = Some(observed_at);
        }
        LifecycleEvent::ScraperError(err) => {
            state.is_running = false;
            state.error = Some(err.clone());
        }
        LifecycleEvent::RecommendationProgress(_) => return false,
    }
    true
}

/// Process-wide mirror of the price scraper
pub struct ScraperStateSync {
    state: watch::Sender<ScraperState>,
    store: SharedStore,
    notifier: SharedNotifier,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScraperStateSync {
    pub fn new(store: SharedStore, notifier: SharedNotifier) -> Self {
        let (state, _) = watch::channel(ScraperState::default());
        Self {
            state,
            store,
            notifier,
            task: Mutex::new(None),
        }
    }

    /// Snapshot of the mirrored state
    pub fn state(&self) -> ScraperState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<ScraperState> {
        self.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Apply an event observed now
    pub async fn apply(&self, event: &LifecycleEvent) {
        self.apply_at(event, Utc::now()).await
    }

    pub async fn apply_at(&self, event: &LifecycleEvent, observed_at: DateTime<Utc>) {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            applied = transition(state, event, observed_at);
            applied
        });
        if !applied {
            return;
        }
        debug!("Price scraper mirror applied {}", event.name());

        match event {
            LifecycleEvent::ScraperComplete => {
                info!("Price scraper run completed");
                if let Err(e) = store::put(self.store.as_ref(), SCRAPER_LAST_RUN_KEY, &Some(observed_at)).await {
                    warn!("Failed to persist price scraper last run: {}", e);
                }
            }
            LifecycleEvent::ScraperError(err) => {
                let err = AppError::from(err.clone());
                error!("{}", err);
                self.notifier.notify(Notification::error(
                    NOTIFICATION_ID,
                    "Price scraper error",
                    err.to_string(),
                ));
            }
            _ => {}
        }
    }

    /// Seed from the stored last run and follow the event channel
    pub async fn start(self: &Arc<Self>, bus: &EventBus) -> Result<()> {
        if self.is_active() {
            warn!("Price scraper sync already started");
            return Ok(());
        }

        // Subscribe before seeding so nothing published meanwhile is lost
        let mut receiver = bus.subscribe();

        let last_run: Option<DateTime<Utc>> =
            store::get_or_default(self.store.as_ref(), SCRAPER_LAST_RUN_KEY).await?;
        self.state.send_modify(|state| state.last_run = last_run);
        info!("Price scraper sync seeded, last run: {:?}", last_run);

        let sync = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = next_event(&mut receiver, "ScraperStateSync").await {
                if event.is_scraper_event() {
                    sync.apply(&event).await;
                }
            }
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop following the channel; later events have no effect
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("Price scraper sync stopped");
        }
    }
}
