//! Recommendation request and confirmation commands

use crate::error::Result;
use crate::models::{ComputationParams, ProgressRecord, WatchEntry};
use crate::services::ReplacementProposal;
use crate::state::AppState;

/// Request recommendations and hold the result for confirmation
///
/// Nothing is written to the watch-list until `commit_replacement`.
pub async fn request_recommendations(
    state: &AppState,
    params: ComputationParams,
    id: Option<String>,
) -> Result<ReplacementProposal> {
    let proposal = state.watchlist.request_recommendations(params, id).await?;
    tracing::info!(
        "Holding proposal {} with {} results for confirmation",
        proposal.id,
        proposal.results.len()
    );
    state.hold_proposal(proposal.clone());
    Ok(proposal)
}

/// Confirm a held proposal and replace the watch-list with it
pub async fn commit_replacement(state: &AppState, proposal_id: String) -> Result<Vec<WatchEntry>> {
    let proposal = state.take_proposal(&proposal_id)?;
    state.watchlist.commit_replacement(proposal).await
}

/// Drop a held proposal without touching the watch-list
pub async fn discard_replacement(state: &AppState, proposal_id: String) -> Result<ReplacementProposal> {
    let proposal = state.take_proposal(&proposal_id)?;
    tracing::info!("Discarded proposal {}", proposal.id);
    Ok(proposal)
}

/// Progress of one request, or of every tracked request
pub async fn get_progress(state: &AppState, id: Option<String>) -> Result<Vec<ProgressRecord>> {
    Ok(match id {
        Some(id) => state.tracker.get(&id).into_iter().collect(),
        None => state.tracker.records(),
    })
}
