//! Persisted keyed store
//!
//! Flat key -> JSON value storage. Services read through the typed helpers,
//! which fall back to a default when the key is missing or unreadable.

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Watch-list contents
pub const WATCHLIST_KEY: &str = "wtbList";
/// Outbound message template
pub const MESSAGE_TEMPLATE_KEY: &str = "wtbMessageTemplate";
/// Last completed price scraper run
pub const SCRAPER_LAST_RUN_KEY: &str = "price_scraper_last_run";

/// Durable key/value storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Read `key` as `T`, or `default` when missing or unreadable
pub async fn get_or<T>(store: &dyn KeyValueStore, key: &str, default: T) -> Result<T>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(Value::Null) | None => Ok(default),
        Some(value) => match serde_json::from_value(value) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!("Stored value for '{}' is unreadable, using default: {}", key, e);
                Ok(default)
            }
        },
    }
}

/// Read `key` as `T`, or `T::default()`
pub async fn get_or_default<T>(store: &dyn KeyValueStore, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    get_or(store, key, T::default()).await
}

/// Serialize and write `value` under `key`
pub async fn put<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    store.set(key, serde_json::to_value(value)?).await
}
