//! Price scraper and notification commands

use crate::error::Result;
use crate::models::{ScraperState, ScraperStatus};
use crate::notifications::Notification;
use crate::state::AppState;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ScraperStateResponse {
    pub status: ScraperStatus,
    #[serde(flatten)]
    pub state: ScraperState,
}

/// Get the mirrored price scraper state
pub async fn get_scraper_state(state: &AppState) -> Result<ScraperStateResponse> {
    let scraper = state.scraper.state();
    Ok(ScraperStateResponse {
        status: scraper.status(),
        state: scraper,
    })
}

/// Latest state of every toast shown so far
pub async fn get_notifications(state: &AppState) -> Result<Vec<Notification>> {
    Ok(state.notifications.latest())
}
