//! Computation Request Client
//!
//! Submits the watch-list to the recommendation backend and correlates the
//! request with the progress events the backend raises on the lifecycle
//! channel. Each submission resolves exactly once: the full recommendation
//! list (possibly empty) or a failure tagged with the failing component.

use crate::error::{AppError, Result};
use crate::events::{EventBus, LifecycleEvent, ProgressUpdate};
use crate::models::{ComputationParams, Recommendation, WatchEntry};
use crate::notifications::{Notification, SharedNotifier};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

const CLIENT_COMPONENT: &str = "RecommendationClient";
const HTTP_COMPONENT: &str = "RecommendationBackend";

/// One recommendation request as handed to a backend
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationRequest {
    pub id: String,
    pub entries: Vec<WatchEntry>,
    #[serde(flatten)]
    pub params: ComputationParams,
}

/// Publishes progress for one correlation id
///
/// Remembers the last reported `(current, total)` so the closing event stays
/// on the backend's own step scale.
#[derive(Clone)]
pub struct ProgressReporter {
    bus: EventBus,
    id: String,
    last: Arc<Mutex<Option<(u64, u64)>>>,
}

impl ProgressReporter {
    pub fn new(bus: EventBus, id: impl Into<String>) -> Self {
        Self {
            bus,
            id: id.into(),
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last reported `(current, total)`, if any
    pub fn last_reported(&self) -> Option<(u64, u64)> {
        *self.last.lock()
    }

    pub fn report(&self, current: u64, total: u64, message: impl Into<String>) {
        *self.last.lock() = Some((current, total));
        self.publish(current, total, message.into(), false);
    }

    /// Close the id as finished: every reported step is done
    pub fn complete(&self, message: impl Into<String>) {
        let total = self.last_reported().map(|(_, total)| total).unwrap_or(0);
        self.publish(total, total, message.into(), true);
    }

    /// Close the id as failed, keeping the steps reached so far
    pub fn fail(&self, message: impl Into<String>) {
        let (current, total) = self.last_reported().unwrap_or((0, 0));
        self.publish(current, total, message.into(), true);
    }

    fn publish(&self, current: u64, total: u64, message: String, is_completed: bool) {
        self.bus.publish(LifecycleEvent::RecommendationProgress(ProgressUpdate {
            id: self.id.clone(),
            total,
            current,
            message,
            is_completed,
        }));
    }
}

/// Remote capability producing purchase recommendations
#[async_trait]
pub trait RecommendationBackend: Send + Sync {
    /// Component name used to tag failures
    fn name(&self) -> &'static str;

    async fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
        progress: &ProgressReporter,
    ) -> Result<Vec<Recommendation>>;
}

/// Recommendation backend reached over HTTP
pub struct HttpRecommendationBackend {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct BackendError {
    component: Option<String>,
    message: String,
}

#[derive(Deserialize)]
struct BackendResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Vec<Recommendation>>,
    #[serde(default)]
    error: Option<BackendError>,
}

impl HttpRecommendationBackend {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Endpoint for one correlated request
    pub fn endpoint(&self, request_id: &str) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(&format!("recommendations/{}", urlencoding::encode(request_id)))
            .map_err(|e| AppError::Config(format!("Invalid backend URL: {}", e)))
    }
}

#[async_trait]
impl RecommendationBackend for HttpRecommendationBackend {
    fn name(&self) -> &'static str {
        HTTP_COMPONENT
    }

    async fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
        progress: &ProgressReporter,
    ) -> Result<Vec<Recommendation>> {
        let url = self.endpoint(&request.id)?;
        progress.report(0, 1, format!("Submitting {} items", request.entries.len()));

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::remote(HTTP_COMPONENT, e.to_string()))?;

        let status = response.status();
        let body: BackendResponse = response
            .json()
            .await
            .map_err(|e| AppError::remote(HTTP_COMPONENT, format!("Unreadable response ({}): {}", status, e)))?;

        if !status.is_success() || !body.success {
            let (component, message) = match body.error {
                Some(err) => (
                    err.component.unwrap_or_else(|| HTTP_COMPONENT.to_string()),
                    err.message,
                ),
                None => (HTTP_COMPONENT.to_string(), format!("Backend returned status {}", status)),
            };
            return Err(AppError::RemoteComputation { component, message });
        }

        Ok(body.data.unwrap_or_default())
    }
}

/// Resolved submission
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: String,
    pub recommendations: Vec<Recommendation>,
}

/// Computation request client
pub struct RecommendationClient {
    backend: Option<Arc<dyn RecommendationBackend>>,
    bus: EventBus,
    notifier: SharedNotifier,
}

impl RecommendationClient {
    pub fn new(
        backend: Option<Arc<dyn RecommendationBackend>>,
        bus: EventBus,
        notifier: SharedNotifier,
    ) -> Self {
        Self {
            backend,
            bus,
            notifier,
        }
    }

    /// Fresh correlation id
    pub fn mint_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Submit `entries` for recommendation
    ///
    /// Progress for the request is published under `correlation_id`, or a
    /// newly minted id. The id is always closed with a terminal progress
    /// event, whatever the outcome.
    pub async fn submit(
        &self,
        entries: &[WatchEntry],
        params: ComputationParams,
        correlation_id: Option<String>,
    ) -> Result<Submission> {
        params.validate()?;

        let id = correlation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(Self::mint_id);
        info!(
            "RecommendationClient::submit - {} entries, request {}",
            entries.len(),
            id
        );

        self.notifier.notify(Notification::loading(
            id.clone(),
            "Loading your data",
            "Calculating recommended prices, this cannot be closed yet",
        ));

        let reporter = ProgressReporter::new(self.bus.clone(), id.clone());
        let request = RecommendationRequest {
            id: id.clone(),
            entries: entries.to_vec(),
            params,
        };

        let result = match &self.backend {
            Some(backend) => backend
                .generate_recommendations(&request, &reporter)
                .await
                .map_err(|e| match e {
                    AppError::RemoteComputation { .. } => e,
                    other => AppError::remote(backend.name(), other.to_string()),
                })
                .and_then(|recommendations| check_recommendations(backend.name(), recommendations)),
            None => Err(AppError::remote(
                CLIENT_COMPONENT,
                "No recommendation backend configured",
            )),
        };

        match result {
            Ok(recommendations) => {
                let count = recommendations.len();
                reporter.complete(format!("{} recommendations ready", count));
                info!("Request {} resolved with {} recommendations", id, count);
                Ok(Submission { id, recommendations })
            }
            Err(e) => {
                error!("Request {} failed: {}", id, e);
                reporter.fail(e.to_string());
                let component = e.component().unwrap_or(CLIENT_COMPONENT).to_string();
                // Separate toast, the progress toast for `id` is closed by the terminal event
                self.notifier.notify(Notification::error(
                    format!("{}:error", id),
                    format!("{} failed", component),
                    e.to_string(),
                ));
                Err(e)
            }
        }
    }
}

/// Reject result rows that break the watch-list entry rules
fn check_recommendations(component: &str, recommendations: Vec<Recommendation>) -> Result<Vec<Recommendation>> {
    for rec in &recommendations {
        if rec.entry.url.trim().is_empty() {
            return Err(AppError::remote(component, "Recommendation without an item identifier"));
        }
        if !rec.entry.price.is_finite() || rec.entry.price < 0.0 {
            return Err(AppError::remote(
                component,
                format!("Invalid price {} recommended for {}", rec.entry.price, rec.entry.url),
            ));
        }
    }
    Ok(recommendations)
}
