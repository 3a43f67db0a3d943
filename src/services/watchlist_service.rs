//! Watchlist Controller
//!
//! Owns the watch-list and its persistence. Incremental edits (add, price
//! change, remove, clear) are written through to the store one at a time.
//! Recommendation results only ever land through the two-phase
//! `propose_replacement` / `commit_replacement` pair, which swaps the whole
//! list at once. There is no conflict detection between proposals: the last
//! committed one wins.

use crate::error::{AppError, Result};
use crate::models::{
    CatalogItem, ComposedMessage, ComputationParams, MessageTemplate, Recommendation, WatchEntry,
};
use crate::services::message_composer::MessageComposer;
use crate::services::recommendation_client::RecommendationClient;
use crate::store::{self, SharedStore, MESSAGE_TEMPLATE_KEY, WATCHLIST_KEY};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Price movement of one recommended item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceChange {
    pub url: String,
    pub name: String,
    /// Price currently on the watch-list, if the item is listed
    pub old_price: Option<f64>,
    pub previous_price: f64,
    pub new_price: f64,
}

/// Pending full replacement of the watch-list, awaiting confirmation
#[derive(Debug, Clone, Serialize)]
pub struct ReplacementProposal {
    pub id: String,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub changes: Vec<PriceChange>,
    /// Listed entries the replacement drops
    pub removed: Vec<WatchEntry>,
    pub results: Vec<Recommendation>,
}

/// Watchlist controller
pub struct WatchlistService {
    store: SharedStore,
    client: Arc<RecommendationClient>,
    entries: Mutex<Vec<WatchEntry>>,
    message_max_length: usize,
}

impl WatchlistService {
    /// Load the persisted watch-list
    pub async fn load(
        store: SharedStore,
        client: Arc<RecommendationClient>,
        message_max_length: usize,
    ) -> Result<Self> {
        let entries: Vec<WatchEntry> = store::get_or_default(store.as_ref(), WATCHLIST_KEY).await?;
        info!("Loaded watch-list with {} entries", entries.len());
        Ok(Self {
            store,
            client,
            entries: Mutex::new(entries),
            message_max_length,
        })
    }

    /// Current watch-list
    pub async fn entries(&self) -> Vec<WatchEntry> {
        self.entries.lock().await.clone()
    }

    /// Insert `entry` unless its identifier is already listed
    pub async fn add(&self, entry: WatchEntry) -> Result<bool> {
        if entry.url.trim().is_empty() {
            return Err(AppError::InvalidInput("entry identifier must not be empty".to_string()));
        }
        if !entry.price.is_finite() || entry.price < 0.0 {
            return Err(AppError::InvalidInput(format!(
                "price must be a non-negative number, got {}",
                entry.price
            )));
        }

        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.url == entry.url) {
            debug!("Watch-list already contains {}", entry.url);
            return Ok(false);
        }

        let mut updated = entries.clone();
        info!("WatchlistService::add - {}", entry.url);
        updated.push(entry);
        self.persist(&mut entries, updated).await?;
        Ok(true)
    }

    /// Add a catalog item with no price set yet
    pub async fn add_from_catalog(&self, item: CatalogItem) -> Result<bool> {
        self.add(WatchEntry::from(item)).await
    }

    /// Update the price of a listed entry; unknown identifiers are ignored
    pub async fn set_price(&self, url: &str, price: f64) -> Result<bool> {
        if !price.is_finite() || price <= 0.0 {
            return Err(AppError::InvalidInput(format!(
                "price must be greater than zero, got {}",
                price
            )));
        }

        let mut entries = self.entries.lock().await;
        let Some(index) = entries.iter().position(|e| e.url == url) else {
            debug!("set_price: {} is not on the watch-list", url);
            return Ok(false);
        };

        let mut updated = entries.clone();
        updated[index].price = price;
        info!("WatchlistService::set_price - {} -> {}", url, price);
        self.persist(&mut entries, updated).await?;
        Ok(true)
    }

    /// Remove a listed entry; unknown identifiers are ignored
    pub async fn remove(&self, url: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let Some(index) = entries.iter().position(|e| e.url == url) else {
            return Ok(false);
        };

        let mut updated = entries.clone();
        updated.remove(index);
        info!("WatchlistService::remove - {}", url);
        self.persist(&mut entries, updated).await?;
        Ok(true)
    }

    /// Empty the watch-list
    pub async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        info!("WatchlistService::clear - {} entries", entries.len());
        self.persist(&mut entries, Vec::new()).await
    }

    /// Ask the backend for purchase targets and return them as a proposal
    ///
    /// Nothing is written; on failure the watch-list stays as it was.
    pub async fn request_recommendations(
        &self,
        params: ComputationParams,
        correlation_id: Option<String>,
    ) -> Result<ReplacementProposal> {
        let snapshot = self.entries().await;
        let submission = self.client.submit(&snapshot, params, correlation_id).await?;
        let mut proposal = self.propose_replacement(submission.recommendations).await;
        proposal.request_id = Some(submission.id);
        Ok(proposal)
    }

    /// Diff `results` against the current watch-list
    pub async fn propose_replacement(&self, results: Vec<Recommendation>) -> ReplacementProposal {
        let entries = self.entries.lock().await;

        let changes = results
            .iter()
            .map(|rec| PriceChange {
                url: rec.entry.url.clone(),
                name: rec.entry.name.clone(),
                old_price: entries.iter().find(|e| e.url == rec.entry.url).map(|e| e.price),
                previous_price: rec.previous_price,
                new_price: rec.entry.price,
            })
            .collect();

        let incoming: HashSet<&str> = results.iter().map(|r| r.entry.url.as_str()).collect();
        let removed = entries
            .iter()
            .filter(|e| !incoming.contains(e.url.as_str()))
            .cloned()
            .collect();

        ReplacementProposal {
            id: Uuid::new_v4().to_string(),
            request_id: None,
            created_at: Utc::now(),
            changes,
            removed,
            results,
        }
    }

    /// Apply a confirmed proposal
    pub async fn commit_replacement(&self, proposal: ReplacementProposal) -> Result<Vec<WatchEntry>> {
        info!(
            "WatchlistService::commit_replacement - proposal {} with {} results",
            proposal.id,
            proposal.results.len()
        );
        self.replace_all(proposal.results).await
    }

    /// Overwrite the whole watch-list with `results`
    pub async fn replace_all(&self, results: Vec<Recommendation>) -> Result<Vec<WatchEntry>> {
        if let Some(bad) = results
            .iter()
            .find(|r| !r.entry.price.is_finite() || r.entry.price < 0.0)
        {
            return Err(AppError::InvalidInput(format!(
                "recommended price for {} must be a non-negative number, got {}",
                bad.entry.url, bad.entry.price
            )));
        }

        let mut seen = HashSet::new();
        let mut replacement = Vec::with_capacity(results.len());
        for rec in results {
            if seen.insert(rec.entry.url.clone()) {
                replacement.push(rec.entry);
            } else {
                warn!("Dropping duplicate recommendation for {}", rec.entry.url);
            }
        }

        let mut entries = self.entries.lock().await;
        self.persist(&mut entries, replacement.clone()).await?;
        Ok(replacement)
    }

    /// Stored template, or the default one
    pub async fn template(&self) -> Result<MessageTemplate> {
        let raw: Option<String> = store::get_or_default(self.store.as_ref(), MESSAGE_TEMPLATE_KEY).await?;
        Ok(raw.map(MessageTemplate::unchecked).unwrap_or_default())
    }

    /// Replace the template; it must contain the placeholder
    pub async fn set_template(&self, raw: &str) -> Result<MessageTemplate> {
        let template = MessageTemplate::parse(raw)?;
        store::put(self.store.as_ref(), MESSAGE_TEMPLATE_KEY, template.as_str()).await?;
        info!("Message template updated");
        Ok(template)
    }

    /// Compose the outbound message from the current list and template
    pub async fn message(&self) -> Result<ComposedMessage> {
        let template = self.template().await?;
        let entries = self.entries.lock().await;
        let message = MessageComposer::compose_checked(&entries, &template, self.message_max_length);
        if !message.placeholder_found {
            warn!("Message template has no {} placeholder", MessageTemplate::PLACEHOLDER);
        }
        if message.exceeds_limit {
            warn!(
                "Composed message is {} characters, limit is {}",
                message.length, message.max_length
            );
        }
        Ok(message)
    }

    /// Write `updated` through to the store, then adopt it
    async fn persist(&self, current: &mut Vec<WatchEntry>, updated: Vec<WatchEntry>) -> Result<()> {
        store::put(self.store.as_ref(), WATCHLIST_KEY, &updated).await?;
        *current = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::notifications::RecordingNotifier;
    use crate::services::recommendation_client::{
        ProgressReporter, RecommendationBackend, RecommendationRequest,
    };
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct FixedBackend(std::result::Result<Vec<Recommendation>, String>);

    #[async_trait]
    impl RecommendationBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "FixedBackend"
        }

        async fn generate_recommendations(
            &self,
            request: &RecommendationRequest,
            progress: &ProgressReporter,
        ) -> Result<Vec<Recommendation>> {
            progress.report(1, 1, format!("{} items", request.entries.len()));
            match &self.0 {
                Ok(recs) => Ok(recs.clone()),
                Err(message) => Err(AppError::remote("PriceCalculator", message.clone())),
            }
        }
    }

    fn rec(url: &str, price: f64, previous: f64) -> Recommendation {
        Recommendation {
            entry: WatchEntry::new(url, url.to_uppercase(), "", price),
            previous_price: previous,
        }
    }

    async fn service_with(
        store: Arc<MemoryStore>,
        backend: Option<Arc<dyn RecommendationBackend>>,
    ) -> WatchlistService {
        let client = Arc::new(RecommendationClient::new(
            backend,
            EventBus::new(),
            Arc::new(RecordingNotifier::new()),
        ));
        WatchlistService::load(store, client, 181).await.unwrap()
    }

    async fn service() -> (WatchlistService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (service_with(store.clone(), None).await, store)
    }

    async fn stored(store: &MemoryStore) -> Vec<WatchEntry> {
        store::get_or_default(store, WATCHLIST_KEY).await.unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_add_is_ignored() {
        let (service, store) = service().await;

        assert!(service.add(WatchEntry::new("soma", "Soma", "", 10.0)).await.unwrap());
        let before = stored(&store).await;

        assert!(!service.add(WatchEntry::new("soma", "Soma Prime", "x", 99.0)).await.unwrap());
        assert_eq!(stored(&store).await, before);
        assert_eq!(service.entries().await, before);
    }

    #[tokio::test]
    async fn test_add_from_catalog_starts_at_zero() {
        let (service, _) = service().await;
        let item = CatalogItem {
            url_name: "tigris".to_string(),
            item_name: "Tigris".to_string(),
            icon: "icons/tigris.png".to_string(),
        };
        assert!(service.add_from_catalog(item).await.unwrap());

        let entries = service.entries().await;
        assert_eq!(entries[0].name, "Tigris");
        assert_eq!(entries[0].price, 0.0);
    }

    #[tokio::test]
    async fn test_set_price_validation() {
        let (service, store) = service().await;
        service.add(WatchEntry::new("soma", "Soma", "", 10.0)).await.unwrap();
        let before = stored(&store).await;

        for bad in [0.0, -5.0, f64::NAN] {
            let err = service.set_price("soma", bad).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)));
        }
        assert_eq!(stored(&store).await, before);

        assert!(service.set_price("soma", 12.5).await.unwrap());
        assert_eq!(stored(&store).await[0].price, 12.5);

        assert!(!service.set_price("missing", 12.5).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (service, store) = service().await;
        service.add(WatchEntry::new("a", "A", "", 1.0)).await.unwrap();
        service.add(WatchEntry::new("b", "B", "", 2.0)).await.unwrap();

        assert!(service.remove("a").await.unwrap());
        assert!(!service.remove("a").await.unwrap());
        assert_eq!(stored(&store).await.len(), 1);

        service.clear().await.unwrap();
        assert!(stored(&store).await.is_empty());
        assert!(service.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_survives_reload() {
        let store = Arc::new(MemoryStore::new());
        {
            let service = service_with(store.clone(), None).await;
            service.add(WatchEntry::new("soma", "Soma", "", 10.0)).await.unwrap();
        }
        let service = service_with(store, None).await;
        assert_eq!(service.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_all_matches_result_set() {
        let (service, store) = service().await;
        service.add(WatchEntry::new("old", "Old", "", 5.0)).await.unwrap();
        service.add(WatchEntry::new("soma", "Soma", "", 10.0)).await.unwrap();

        let results = vec![rec("soma", 20.0, 10.0), rec("tigris", 15.0, 15.0)];
        let expected: Vec<WatchEntry> = results.iter().map(|r| r.entry.clone()).collect();

        service.replace_all(results).await.unwrap();
        assert_eq!(service.entries().await, expected);
        assert_eq!(stored(&store).await, expected);

        service.replace_all(vec![]).await.unwrap();
        assert!(service.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_proposal_diff_then_commit() {
        let (service, _) = service().await;
        service.add(WatchEntry::new("soma", "Soma", "", 10.0)).await.unwrap();
        service.add(WatchEntry::new("braton", "Braton", "", 3.0)).await.unwrap();

        let proposal = service
            .propose_replacement(vec![rec("soma", 20.0, 12.0), rec("kunai", 8.0, 8.0)])
            .await;

        assert_eq!(proposal.changes.len(), 2);
        assert_eq!(proposal.changes[0].old_price, Some(10.0));
        assert_eq!(proposal.changes[0].previous_price, 12.0);
        assert_eq!(proposal.changes[0].new_price, 20.0);
        assert_eq!(proposal.changes[1].old_price, None);
        assert_eq!(proposal.removed.len(), 1);
        assert_eq!(proposal.removed[0].url, "braton");

        // Proposing writes nothing
        assert_eq!(service.entries().await.len(), 2);
        assert_eq!(service.entries().await[0].price, 10.0);

        let applied = service.commit_replacement(proposal).await.unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(service.entries().await[0].price, 20.0);
    }

    #[tokio::test]
    async fn test_last_commit_wins() {
        let (service, _) = service().await;
        let first = service.propose_replacement(vec![rec("a", 1.0, 1.0)]).await;
        let second = service.propose_replacement(vec![rec("b", 2.0, 2.0)]).await;

        service.commit_replacement(second).await.unwrap();
        service.commit_replacement(first).await.unwrap();

        let entries = service.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "a");
    }

    #[tokio::test]
    async fn test_negative_result_price_leaves_list_alone() {
        let (service, store) = service().await;
        service.add(WatchEntry::new("soma", "Soma", "", 10.0)).await.unwrap();
        let before = stored(&store).await;

        let proposal = service
            .propose_replacement(vec![rec("soma", 20.0, 10.0), rec("kunai", -4.0, 2.0)])
            .await;
        let err = service.commit_replacement(proposal).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(stored(&store).await, before);
        assert_eq!(service.entries().await, before);
    }

    #[tokio::test]
    async fn test_duplicate_results_keep_first() {
        let (service, _) = service().await;
        let applied = service
            .replace_all(vec![rec("a", 1.0, 1.0), rec("a", 9.0, 9.0)])
            .await
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].price, 1.0);
    }

    #[tokio::test]
    async fn test_request_recommendations_success_and_failure() {
        let store = Arc::new(MemoryStore::new());
        let backend: Arc<dyn RecommendationBackend> =
            Arc::new(FixedBackend(Ok(vec![rec("soma", 20.0, 18.0)])));
        let service = service_with(store.clone(), Some(backend)).await;
        service.add(WatchEntry::new("soma", "Soma", "", 10.0)).await.unwrap();

        let proposal = service
            .request_recommendations(ComputationParams::default(), Some("req-1".to_string()))
            .await
            .unwrap();
        assert_eq!(proposal.request_id.as_deref(), Some("req-1"));
        assert_eq!(proposal.changes[0].old_price, Some(10.0));
        assert_eq!(service.entries().await[0].price, 10.0);

        let backend: Arc<dyn RecommendationBackend> = Arc::new(FixedBackend(Err("offline".to_string())));
        let failing = service_with(store.clone(), Some(backend)).await;
        let before = stored(&store).await;

        let err = failing
            .request_recommendations(ComputationParams::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.component(), Some("PriceCalculator"));
        assert_eq!(stored(&store).await, before);
    }

    #[tokio::test]
    async fn test_template_and_message() {
        let (service, _) = service().await;
        assert_eq!(service.template().await.unwrap().as_str(), MessageTemplate::DEFAULT);

        let err = service.set_template("no placeholder").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        service.set_template("WTB [WTB]").await.unwrap();
        service.add(WatchEntry::new("a", "A", "", 10.0)).await.unwrap();
        service.add(WatchEntry::new("b", "B", "", 10.0)).await.unwrap();
        service.add(WatchEntry::new("c", "C", "", 20.0)).await.unwrap();

        let message = service.message().await.unwrap();
        assert_eq!(message.text, "WTB [C]20 [A][B]10");
        assert_eq!(message.length, 18);
        assert!(!message.exceeds_limit);
    }

    #[tokio::test]
    async fn test_stored_placeholder_free_template_passes_through() {
        let (service, store) = service().await;
        store::put(store.as_ref(), MESSAGE_TEMPLATE_KEY, "hello").await.unwrap();
        service.add(WatchEntry::new("a", "A", "", 10.0)).await.unwrap();

        let message = service.message().await.unwrap();
        assert_eq!(message.text, "hello");
        assert!(!message.placeholder_found);
    }
}
