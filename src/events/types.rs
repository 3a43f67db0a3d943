//! Typed lifecycle events and their wire payloads

use crate::error::{AppError, Result};
use crate::models::ProcessError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SCRAPER_INITIALIZE: &str = "PriceScraper:Initialize";
pub const SCRAPER_ON_CHANGE: &str = "PriceScraper:OnChange";
pub const SCRAPER_COMPLETE: &str = "PriceScraper:Complete";
pub const SCRAPER_ERROR: &str = "PriceScraper:Error";
pub const RECOMMENDATION_PROGRESS: &str = "GenerateWtbMessage:Progress";

/// Progress report for one correlated recommendation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: String,
    pub total: u64,
    pub current: u64,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "isCompleted", default)]
    pub is_completed: bool,
}

/// Event emitted by an external long-running process
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    ScraperInitialize { last_run: Option<DateTime<Utc>> },
    ScraperChange { max: f64, min: f64, current: f64 },
    ScraperComplete,
    ScraperError(ProcessError),
    RecommendationProgress(ProgressUpdate),
}

/// Wire envelope: `{ "event": <name>, "payload": <json> }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Deserialize)]
struct InitializePayload {
    #[serde(default)]
    last_run: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ChangePayload {
    max: f64,
    min: f64,
    current: f64,
}

#[derive(Deserialize)]
struct ProgressFields {
    total: u64,
    current: u64,
    #[serde(default)]
    message: String,
    #[serde(rename = "isCompleted", default)]
    is_completed: bool,
}

/// The scanner nests the counters under `data`; other producers send them flat
#[derive(Deserialize)]
#[serde(untagged)]
enum ProgressPayload {
    Nested { id: String, data: ProgressFields },
    Flat(ProgressUpdate),
}

impl LifecycleEvent {
    /// Channel name of this event
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ScraperInitialize { .. } => SCRAPER_INITIALIZE,
            LifecycleEvent::ScraperChange { .. } => SCRAPER_ON_CHANGE,
            LifecycleEvent::ScraperComplete => SCRAPER_COMPLETE,
            LifecycleEvent::ScraperError(_) => SCRAPER_ERROR,
            LifecycleEvent::RecommendationProgress(_) => RECOMMENDATION_PROGRESS,
        }
    }

    /// True for the events consumed by the scraper synchronizer
    pub fn is_scraper_event(&self) -> bool {
        !matches!(self, LifecycleEvent::RecommendationProgress(_))
    }

    /// Validate a named payload coming off the channel
    pub fn from_envelope(name: &str, payload: Value) -> Result<Self> {
        let event = match name {
            SCRAPER_INITIALIZE => {
                let payload = if payload.is_null() { json!({}) } else { payload };
                let p: InitializePayload = decode(name, payload)?;
                LifecycleEvent::ScraperInitialize { last_run: p.last_run }
            }
            SCRAPER_ON_CHANGE => {
                let p: ChangePayload = decode(name, payload)?;
                if ![p.max, p.min, p.current].iter().all(|v| v.is_finite()) {
                    return Err(AppError::InvalidEvent(format!(
                        "{}: non-finite value in payload",
                        name
                    )));
                }
                LifecycleEvent::ScraperChange {
                    max: p.max,
                    min: p.min,
                    current: p.current,
                }
            }
            SCRAPER_COMPLETE => LifecycleEvent::ScraperComplete,
            SCRAPER_ERROR => LifecycleEvent::ScraperError(decode(name, payload)?),
            RECOMMENDATION_PROGRESS => {
                let update = match decode::<ProgressPayload>(name, payload)? {
                    ProgressPayload::Nested { id, data } => ProgressUpdate {
                        id,
                        total: data.total,
                        current: data.current,
                        message: data.message,
                        is_completed: data.is_completed,
                    },
                    ProgressPayload::Flat(update) => update,
                };
                if update.id.is_empty() {
                    return Err(AppError::InvalidEvent(format!("{}: empty correlation id", name)));
                }
                LifecycleEvent::RecommendationProgress(update)
            }
            other => {
                return Err(AppError::InvalidEvent(format!("unknown event '{}'", other)));
            }
        };
        Ok(event)
    }

    /// Wire form of this event
    pub fn to_envelope(&self) -> EventEnvelope {
        let payload = match self {
            LifecycleEvent::ScraperInitialize { last_run } => json!({ "last_run": last_run }),
            LifecycleEvent::ScraperChange { max, min, current } => {
                json!({ "max": max, "min": min, "current": current })
            }
            LifecycleEvent::ScraperComplete => json!({}),
            LifecycleEvent::ScraperError(err) => json!({
                "component": err.component,
                "message": err.message,
            }),
            LifecycleEvent::RecommendationProgress(update) => json!({
                "id": update.id,
                "total": update.total,
                "current": update.current,
                "message": update.message,
                "isCompleted": update.is_completed,
            }),
        };
        EventEnvelope {
            event: self.name().to_string(),
            payload,
        }
    }
}

impl TryFrom<EventEnvelope> for LifecycleEvent {
    type Error = AppError;

    fn try_from(envelope: EventEnvelope) -> Result<Self> {
        LifecycleEvent::from_envelope(&envelope.event, envelope.payload)
    }
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| AppError::InvalidEvent(format!("{}: malformed payload: {}", name, e)))
}
