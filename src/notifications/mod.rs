//! User-visible notifications
//!
//! The toast surface itself lives outside this crate. Services describe what
//! to show through [`Notifier`]; reusing an id updates the earlier toast.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Loading,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub level: NotificationLevel,
    pub auto_close: bool,
    pub with_close_button: bool,
}

impl Notification {
    /// Non-blocking error toast the user can dismiss
    pub fn error(id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            level: NotificationLevel::Error,
            auto_close: false,
            with_close_button: true,
        }
    }

    /// Pinned toast that cannot be dismissed until updated
    pub fn loading(id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            level: NotificationLevel::Loading,
            auto_close: false,
            with_close_button: false,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => error!(
                "[{}] {}: {}",
                notification.id, notification.title, notification.message
            ),
            _ => info!(
                "[{}] {}: {}",
                notification.id, notification.title, notification.message
            ),
        }
    }
}

/// Toasts retained by the host by default
pub const DEFAULT_TOAST_CAPACITY: usize = 256;

/// Keeps the latest state of each toast id
///
/// Past `capacity` ids, the oldest closable toast is dropped first, then the
/// oldest of any kind.
#[derive(Debug)]
pub struct ToastBoard {
    toasts: DashMap<String, (u64, Notification)>,
    next_seq: AtomicU64,
    capacity: usize,
}

impl ToastBoard {
    pub fn new(capacity: usize) -> Self {
        Self {
            toasts: DashMap::new(),
            next_seq: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }

    /// Latest state of each toast id, in first-shown order
    pub fn latest(&self) -> Vec<Notification> {
        let mut toasts: Vec<(u64, Notification)> =
            self.toasts.iter().map(|t| t.value().clone()).collect();
        toasts.sort_by_key(|(seq, _)| *seq);
        toasts.into_iter().map(|(_, n)| n).collect()
    }

    fn trim(&self) {
        while self.toasts.len() > self.capacity {
            let oldest = |closable_only: bool| {
                self.toasts
                    .iter()
                    .filter(|t| !closable_only || t.value().1.with_close_button)
                    .min_by_key(|t| t.value().0)
                    .map(|t| t.key().clone())
            };
            match oldest(true).or_else(|| oldest(false)) {
                Some(id) => {
                    self.toasts.remove(&id);
                }
                None => break,
            }
        }
    }
}

impl Default for ToastBoard {
    fn default() -> Self {
        Self::new(DEFAULT_TOAST_CAPACITY)
    }
}

impl Notifier for ToastBoard {
    fn notify(&self, notification: Notification) {
        TracingNotifier.notify(notification.clone());
        let inserted = match self.toasts.entry(notification.id.clone()) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().1 = notification;
                false
            }
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert((seq, notification));
                true
            }
        };
        if inserted {
            self.trim();
        }
    }
}

/// Keeps every notification in memory, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications, oldest first
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Latest state of each toast id, in first-shown order
    pub fn latest(&self) -> Vec<Notification> {
        let sent = self.sent.lock();
        let mut latest: Vec<Notification> = Vec::new();
        for n in sent.iter() {
            match latest.iter_mut().find(|existing| existing.id == n.id) {
                Some(existing) => *existing = n.clone(),
                None => latest.push(n.clone()),
            }
        }
        latest
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        TracingNotifier.notify(notification.clone());
        self.sent.lock().push(notification);
    }
}
