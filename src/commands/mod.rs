//! Host commands
//!
//! Every operation the host surface can invoke. A command arrives as a JSON
//! object tagged by `command`, e.g. `{"command": "set_price", "url": "soma", "price": 25}`,
//! and is answered with a [`CommandResponse`].

pub mod recommendations;
pub mod scraper;
pub mod watchlist;

use crate::error::{ErrorResponse, Result};
use crate::models::{CatalogItem, ComputationParams, WatchEntry};
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    GetWatchlist,
    AddEntry {
        entry: WatchEntry,
    },
    AddFromCatalog {
        item: CatalogItem,
    },
    SetPrice {
        url: String,
        price: f64,
    },
    RemoveEntry {
        url: String,
    },
    ClearWatchlist,
    RequestRecommendations {
        #[serde(default)]
        params: ComputationParams,
        /// Correlation id; minted when absent
        #[serde(default)]
        id: Option<String>,
    },
    CommitReplacement {
        proposal_id: String,
    },
    DiscardReplacement {
        proposal_id: String,
    },
    GetMessage,
    GetTemplate,
    SetTemplate {
        template: String,
    },
    GetScraperState,
    GetProgress {
        #[serde(default)]
        id: Option<String>,
    },
    GetNotifications,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetWatchlist => "get_watchlist",
            Command::AddEntry { .. } => "add_entry",
            Command::AddFromCatalog { .. } => "add_from_catalog",
            Command::SetPrice { .. } => "set_price",
            Command::RemoveEntry { .. } => "remove_entry",
            Command::ClearWatchlist => "clear_watchlist",
            Command::RequestRecommendations { .. } => "request_recommendations",
            Command::CommitReplacement { .. } => "commit_replacement",
            Command::DiscardReplacement { .. } => "discard_replacement",
            Command::GetMessage => "get_message",
            Command::GetTemplate => "get_template",
            Command::SetTemplate { .. } => "set_template",
            Command::GetScraperState => "get_scraper_state",
            Command::GetProgress { .. } => "get_progress",
            Command::GetNotifications => "get_notifications",
        }
    }
}

/// Reply to one command
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub ok: bool,
    /// Echo of the caller's sequence number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl CommandResponse {
    pub fn from_result(seq: Option<Value>, result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self {
                ok: true,
                seq,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                ok: false,
                seq,
                data: None,
                error: Some(ErrorResponse::from(e)),
            },
        }
    }
}

/// Run one command against the application state
pub async fn dispatch(state: &AppState, command: Command) -> Result<Value> {
    tracing::debug!("Dispatching {}", command.name());

    let data = match command {
        Command::GetWatchlist => to_value(watchlist::get_watchlist(state).await?)?,
        Command::AddEntry { entry } => to_value(watchlist::add_entry(state, entry).await?)?,
        Command::AddFromCatalog { item } => to_value(watchlist::add_from_catalog(state, item).await?)?,
        Command::SetPrice { url, price } => to_value(watchlist::set_price(state, url, price).await?)?,
        Command::RemoveEntry { url } => to_value(watchlist::remove_entry(state, url).await?)?,
        Command::ClearWatchlist => to_value(watchlist::clear_watchlist(state).await?)?,
        Command::RequestRecommendations { params, id } => {
            to_value(recommendations::request_recommendations(state, params, id).await?)?
        }
        Command::CommitReplacement { proposal_id } => {
            to_value(recommendations::commit_replacement(state, proposal_id).await?)?
        }
        Command::DiscardReplacement { proposal_id } => {
            to_value(recommendations::discard_replacement(state, proposal_id).await?)?
        }
        Command::GetMessage => to_value(watchlist::get_message(state).await?)?,
        Command::GetTemplate => to_value(watchlist::get_template(state).await?)?,
        Command::SetTemplate { template } => to_value(watchlist::set_template(state, template).await?)?,
        Command::GetScraperState => to_value(scraper::get_scraper_state(state).await?)?,
        Command::GetProgress { id } => to_value(recommendations::get_progress(state, id).await?)?,
        Command::GetNotifications => to_value(scraper::get_notifications(state).await?)?,
    };

    Ok(data)
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
