//! Watch-list and message commands

use crate::error::Result;
use crate::models::{CatalogItem, ComposedMessage, MessageTemplate, WatchEntry};
use crate::state::AppState;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct EditResponse {
    /// False when the edit was a no-op
    pub changed: bool,
    pub entries: Vec<WatchEntry>,
}

/// Get the watch-list
pub async fn get_watchlist(state: &AppState) -> Result<Vec<WatchEntry>> {
    Ok(state.watchlist.entries().await)
}

/// Add an entry unless already listed
pub async fn add_entry(state: &AppState, entry: WatchEntry) -> Result<EditResponse> {
    let changed = state.watchlist.add(entry).await?;
    edit_response(state, changed).await
}

/// Add a catalog item at price 0
pub async fn add_from_catalog(state: &AppState, item: CatalogItem) -> Result<EditResponse> {
    let changed = state.watchlist.add_from_catalog(item).await?;
    edit_response(state, changed).await
}

/// Change the price of a listed entry
pub async fn set_price(state: &AppState, url: String, price: f64) -> Result<EditResponse> {
    let changed = state.watchlist.set_price(&url, price).await?;
    edit_response(state, changed).await
}

/// Remove a listed entry
pub async fn remove_entry(state: &AppState, url: String) -> Result<EditResponse> {
    let changed = state.watchlist.remove(&url).await?;
    edit_response(state, changed).await
}

/// Empty the watch-list
pub async fn clear_watchlist(state: &AppState) -> Result<EditResponse> {
    state.watchlist.clear().await?;
    edit_response(state, true).await
}

/// Compose the WTB message
pub async fn get_message(state: &AppState) -> Result<ComposedMessage> {
    state.watchlist.message().await
}

pub async fn get_template(state: &AppState) -> Result<MessageTemplate> {
    state.watchlist.template().await
}

/// Replace the message template
pub async fn set_template(state: &AppState, template: String) -> Result<MessageTemplate> {
    state.watchlist.set_template(&template).await
}

async fn edit_response(state: &AppState, changed: bool) -> Result<EditResponse> {
    Ok(EditResponse {
        changed,
        entries: state.watchlist.entries().await,
    })
}
