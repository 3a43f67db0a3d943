//! Progress Tracker
//!
//! Mirrors `GenerateWtbMessage:Progress` events into one [`ProgressRecord`]
//! per correlation id and keeps the matching toast up to date.
//!
//! Rules per id:
//! - first event creates the record
//! - `total` and `message` are last-write-wins
//! - an event moving `current` backwards while running is dropped as stale
//! - once `isCompleted` is seen the record is terminal and later events are ignored
//!
//! The channel has no cancellation, so running records that stop receiving
//! events are evicted after the stall timeout. Terminal records are purged
//! after the retention window; their ids stay tombstoned for
//! [`COMPLETED_ID_TTL`] so a late event cannot revive them.

use crate::events::{next_event, EventBus, LifecycleEvent, ProgressUpdate};
use crate::models::ProgressRecord;
use crate::notifications::{Notification, NotificationLevel, SharedNotifier};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long the id of a purged terminal record keeps rejecting events
pub const COMPLETED_ID_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of applying one progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    Created,
    Updated,
    Completed,
    /// Record was already terminal
    IgnoredTerminal,
    /// `current` went backwards
    IgnoredStale,
}

/// Progress tracker for correlated recommendation requests
pub struct ProgressTracker {
    records: DashMap<String, ProgressRecord>,
    /// Purged terminal ids -> completion time
    completed: DashMap<String, DateTime<Utc>>,
    notifier: SharedNotifier,
    updates: broadcast::Sender<ProgressRecord>,
    stall_timeout: Duration,
    retention: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProgressTracker {
    pub fn new(notifier: SharedNotifier, stall_timeout: Duration, retention: Duration) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            records: DashMap::new(),
            completed: DashMap::new(),
            notifier,
            updates,
            stall_timeout,
            retention,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Apply an event using the current time
    pub fn apply(&self, update: &ProgressUpdate) -> ProgressOutcome {
        self.apply_at(update, Utc::now())
    }

    pub fn apply_at(&self, update: &ProgressUpdate, now: DateTime<Utc>) -> ProgressOutcome {
        let (outcome, record) = match self.records.entry(update.id.clone()) {
            Entry::Vacant(slot) => {
                // Checked under the entry lock, eviction tombstones before removing
                if self.completed.contains_key(&update.id) {
                    debug!("Ignoring progress for purged request {}", update.id);
                    return ProgressOutcome::IgnoredTerminal;
                }
                let record = ProgressRecord {
                    id: update.id.clone(),
                    total: update.total,
                    current: update.current,
                    message: update.message.clone(),
                    is_completed: update.is_completed,
                    created_at: now,
                    updated_at: now,
                };
                slot.insert(record.clone());
                let outcome = if update.is_completed {
                    ProgressOutcome::Completed
                } else {
                    ProgressOutcome::Created
                };
                (outcome, record)
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();

                if record.is_completed {
                    debug!("Ignoring progress for completed request {}", update.id);
                    return ProgressOutcome::IgnoredTerminal;
                }

                if !update.is_completed && update.current < record.current {
                    warn!(
                        "Dropping stale progress for {}: {} < {}",
                        update.id, update.current, record.current
                    );
                    return ProgressOutcome::IgnoredStale;
                }

                record.total = update.total;
                record.current = record.current.max(update.current);
                record.message = update.message.clone();
                record.updated_at = now;
                record.is_completed = update.is_completed;

                let outcome = if update.is_completed {
                    ProgressOutcome::Completed
                } else {
                    ProgressOutcome::Updated
                };
                (outcome, record.clone())
            }
        };

        if record.current > record.total {
            debug!(
                "Progress for {} reports {} of {} steps",
                record.id, record.current, record.total
            );
        }
        if outcome == ProgressOutcome::Completed {
            info!("Request {} completed: {}", record.id, record.message);
        }

        self.notifier.notify(Self::notification_for(&record));
        let _ = self.updates.send(record);
        outcome
    }

    fn notification_for(record: &ProgressRecord) -> Notification {
        Notification {
            id: record.id.clone(),
            title: format!("Calculating {}/{}", record.current, record.total),
            message: record.message.clone(),
            level: if record.is_completed {
                NotificationLevel::Success
            } else {
                NotificationLevel::Loading
            },
            auto_close: record.is_completed,
            with_close_button: record.is_completed,
        }
    }

    pub fn get(&self, id: &str) -> Option<ProgressRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// All tracked records, oldest first
    pub fn records(&self) -> Vec<ProgressRecord> {
        let mut records: Vec<ProgressRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Number of records still waiting for completion
    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| !r.is_completed).count()
    }

    /// Every applied record, as it changes
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressRecord> {
        self.updates.subscribe()
    }

    /// Drop stalled running records and expired terminal ones
    ///
    /// Returns the ids of stalled records that were abandoned.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut stalled = Vec::new();
        let stall_timeout = self.stall_timeout;
        let retention = self.retention;

        self.records.retain(|id, record| {
            let idle = (now - record.updated_at).to_std().unwrap_or_default();
            if record.is_completed {
                if idle < retention {
                    return true;
                }
                self.completed.insert(id.clone(), record.updated_at);
                false
            } else if idle >= stall_timeout {
                stalled.push(id.clone());
                false
            } else {
                true
            }
        });
        self.completed
            .retain(|_, completed_at| (now - *completed_at).to_std().unwrap_or_default() < COMPLETED_ID_TTL);

        for id in &stalled {
            warn!("Abandoning stalled request {} after {:?} without progress", id, stall_timeout);
            self.notifier.notify(Notification::error(
                id.clone(),
                "Calculation stalled",
                format!(
                    "No progress received for {} seconds, the request was abandoned",
                    stall_timeout.as_secs()
                ),
            ));
        }
        stalled
    }

    /// Subscribe to the channel and start the eviction sweeper
    pub fn start(self: &Arc<Self>, bus: &EventBus) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Progress tracker already started");
            return;
        }

        let tracker = Arc::clone(self);
        let mut receiver = bus.subscribe();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = next_event(&mut receiver, "ProgressTracker").await {
                if let LifecycleEvent::RecommendationProgress(update) = event {
                    tracker.apply(&update);
                }
            }
        }));

        let tracker = Arc::clone(self);
        let period = self
            .stall_timeout
            .min(self.retention)
            .max(Duration::from_secs(2))
            / 2;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                tracker.evict_stale(Utc::now());
            }
        }));

        info!("Progress tracker started");
    }

    /// Unsubscribe; later events have no effect
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Progress tracker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::RecordingNotifier;
    use chrono::TimeDelta;

    fn tracker() -> (ProgressTracker, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let tracker = ProgressTracker::new(
            notifier.clone(),
            Duration::from_secs(600),
            Duration::from_secs(60),
        );
        (tracker, notifier)
    }

    fn update(id: &str, current: u64, total: u64, done: bool) -> ProgressUpdate {
        ProgressUpdate {
            id: id.to_string(),
            total,
            current,
            message: format!("step {}", current),
            is_completed: done,
        }
    }

    #[test]
    fn test_sequence_ends_terminal() {
        let (tracker, notifier) = tracker();

        assert_eq!(tracker.apply(&update("x", 1, 5, false)), ProgressOutcome::Created);
        assert_eq!(tracker.apply(&update("x", 2, 5, false)), ProgressOutcome::Updated);
        assert_eq!(tracker.apply(&update("x", 2, 5, false)), ProgressOutcome::Updated);
        assert_eq!(tracker.apply(&update("x", 5, 5, true)), ProgressOutcome::Completed);

        let record = tracker.get("x").unwrap();
        assert_eq!(record.current, 5);
        assert!(record.is_completed);

        // No revival after completion
        assert_eq!(tracker.apply(&update("x", 1, 9, false)), ProgressOutcome::IgnoredTerminal);
        let record = tracker.get("x").unwrap();
        assert_eq!(record.current, 5);
        assert_eq!(record.total, 5);
        assert!(record.is_completed);

        let toast = notifier.latest().pop().unwrap();
        assert_eq!(toast.title, "Calculating 5/5");
        assert!(toast.auto_close);
        assert!(toast.with_close_button);
    }

    #[test]
    fn test_running_toast_cannot_be_closed() {
        let (tracker, notifier) = tracker();
        tracker.apply(&update("x", 1, 3, false));

        let toast = notifier.latest().pop().unwrap();
        assert_eq!(toast.level, NotificationLevel::Loading);
        assert!(!toast.auto_close);
        assert!(!toast.with_close_button);
    }

    #[test]
    fn test_ids_do_not_cross_talk() {
        let (tracker, _) = tracker();

        tracker.apply(&update("a", 1, 10, false));
        tracker.apply(&update("b", 7, 8, false));
        tracker.apply(&update("a", 3, 10, false));
        tracker.apply(&update("b", 8, 8, true));

        let a = tracker.get("a").unwrap();
        let b = tracker.get("b").unwrap();
        assert_eq!((a.current, a.total, a.is_completed), (3, 10, false));
        assert_eq!((b.current, b.total, b.is_completed), (8, 8, true));
        assert_eq!(tracker.active_count(), 1);
        assert_eq!(tracker.records().len(), 2);
    }

    #[test]
    fn test_backwards_progress_is_dropped() {
        let (tracker, _) = tracker();
        tracker.apply(&update("x", 4, 10, false));

        assert_eq!(tracker.apply(&update("x", 2, 10, false)), ProgressOutcome::IgnoredStale);
        assert_eq!(tracker.get("x").unwrap().current, 4);

        // A terminal event always lands, without lowering current
        assert_eq!(tracker.apply(&update("x", 3, 10, true)), ProgressOutcome::Completed);
        let record = tracker.get("x").unwrap();
        assert_eq!(record.current, 4);
        assert!(record.is_completed);
    }

    #[test]
    fn test_eviction() {
        let (tracker, notifier) = tracker();
        let start = Utc::now();

        tracker.apply_at(&update("stalled", 1, 10, false), start);
        tracker.apply_at(&update("done", 2, 2, true), start);
        tracker.apply_at(&update("fresh", 1, 10, false), start + TimeDelta::seconds(500));

        let evicted = tracker.evict_stale(start + TimeDelta::seconds(30));
        assert!(evicted.is_empty());
        assert!(tracker.get("done").is_some());

        let evicted = tracker.evict_stale(start + TimeDelta::seconds(601));
        assert_eq!(evicted, vec!["stalled".to_string()]);
        assert!(tracker.get("stalled").is_none());
        assert!(tracker.get("done").is_none());
        assert!(tracker.get("fresh").is_some());

        let toast = notifier.latest().into_iter().find(|n| n.id == "stalled").unwrap();
        assert_eq!(toast.level, NotificationLevel::Error);
    }

    #[test]
    fn test_purged_terminal_id_stays_closed() {
        let (tracker, notifier) = tracker();
        let start = Utc::now();

        tracker.apply_at(&update("x", 3, 3, true), start);
        assert!(tracker.evict_stale(start + TimeDelta::seconds(61)).is_empty());
        assert!(tracker.get("x").is_none());

        let outcome = tracker.apply_at(&update("x", 2, 3, false), start + TimeDelta::seconds(62));
        assert_eq!(outcome, ProgressOutcome::IgnoredTerminal);
        assert!(tracker.get("x").is_none());

        assert!(tracker.evict_stale(start + TimeDelta::seconds(662)).is_empty());
        let toast = notifier.latest().pop().unwrap();
        assert_eq!(toast.title, "Calculating 3/3");
        assert_eq!(toast.level, NotificationLevel::Success);

        // The tombstone itself expires
        tracker.evict_stale(start + TimeDelta::days(2));
        let outcome = tracker.apply_at(&update("x", 1, 3, false), start + TimeDelta::days(2));
        assert_eq!(outcome, ProgressOutcome::Created);
    }

    #[tokio::test]
    async fn test_follows_event_channel_until_stopped() {
        let bus = EventBus::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let tracker = Arc::new(ProgressTracker::new(
            notifier,
            Duration::from_secs(600),
            Duration::from_secs(60),
        ));
        let mut updates = tracker.subscribe();
        tracker.start(&bus);

        bus.publish(LifecycleEvent::RecommendationProgress(update("req", 1, 2, false)));
        let record = updates.recv().await.unwrap();
        assert_eq!(record.id, "req");
        assert_eq!(record.current, 1);

        tracker.stop();
        bus.publish(LifecycleEvent::RecommendationProgress(update("req", 2, 2, true)));
        tokio::task::yield_now().await;

        assert!(!tracker.get("req").unwrap().is_completed);
    }
}
