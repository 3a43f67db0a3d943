//! Domain models shared by the services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Active market offer attached to a watched item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOffer {
    pub id: String,
    pub starting_price: i64,
    #[serde(default)]
    pub buyout_price: Option<i64>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Remaining fields are carried through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Watch-list entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    /// Stable key (item url slug)
    pub url: String,
    pub name: String,
    pub icon: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auctions: Option<Vec<MarketOffer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
}

impl WatchEntry {
    pub fn new(url: impl Into<String>, name: impl Into<String>, icon: impl Into<String>, price: f64) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            icon: icon.into(),
            price,
            auctions: None,
            hidden: None,
        }
    }
}

/// Tradable item as listed by the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub url_name: String,
    pub item_name: String,
    #[serde(default)]
    pub icon: String,
}

impl From<CatalogItem> for WatchEntry {
    fn from(item: CatalogItem) -> Self {
        WatchEntry::new(item.url_name, item.item_name, item.icon, 0.0)
    }
}

/// Input to the recommendation backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComputationParams {
    #[serde(rename = "minSellers")]
    pub min_sellers: u32,
    #[serde(rename = "lowestPrice")]
    pub lowest_price: f64,
    pub discount: f64,
}

impl Default for ComputationParams {
    fn default() -> Self {
        Self {
            min_sellers: 15,
            lowest_price: 50.0,
            discount: 0.5,
        }
    }
}

impl ComputationParams {
    pub fn validate(&self) -> Result<()> {
        if !self.lowest_price.is_finite() || self.lowest_price < 0.0 {
            return Err(AppError::InvalidInput(format!(
                "lowest price must be a non-negative number, got {}",
                self.lowest_price
            )));
        }
        if !self.discount.is_finite() || !(0.0..=1.0).contains(&self.discount) {
            return Err(AppError::InvalidInput(format!(
                "discount must be between 0 and 1, got {}",
                self.discount
            )));
        }
        Ok(())
    }
}

/// One recommended purchase target returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(flatten)]
    pub entry: WatchEntry,
    #[serde(rename = "previousPrice")]
    pub previous_price: f64,
}

/// Progress of one correlated recommendation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRecord {
    pub id: String,
    pub total: u64,
    pub current: u64,
    pub message: String,
    #[serde(rename = "isCompleted")]
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Error reported by the background scanning process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessError {
    pub component: String,
    pub message: String,
}

impl From<ProcessError> for AppError {
    fn from(err: ProcessError) -> Self {
        AppError::ScraperProcess {
            component: err.component,
            message: err.message,
        }
    }
}

/// Coarse status of the mirrored scraper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperStatus {
    Idle,
    Running,
    Error,
}

/// Mirrored state of the background price scraper
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScraperState {
    pub is_running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub min: f64,
    pub max: f64,
    pub current: f64,
    pub error: Option<ProcessError>,
}

impl ScraperState {
    pub fn status(&self) -> ScraperStatus {
        if self.is_running {
            ScraperStatus::Running
        } else if self.error.is_some() {
            ScraperStatus::Error
        } else {
            ScraperStatus::Idle
        }
    }
}

/// Outbound message template holding one `[WTB]` placeholder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTemplate(String);

impl MessageTemplate {
    pub const PLACEHOLDER: &'static str = "[WTB]";
    pub const DEFAULT: &'static str = "WTB RIVENS FOR [WTB]";

    /// Validated constructor used for user edits
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if !raw.contains(Self::PLACEHOLDER) {
            return Err(AppError::InvalidInput(format!(
                "message template must contain the {} placeholder",
                Self::PLACEHOLDER
            )));
        }
        Ok(Self(raw))
    }

    /// Wrap a stored template without validation
    pub fn unchecked(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn has_placeholder(&self) -> bool {
        self.0.contains(Self::PLACEHOLDER)
    }

    /// Replace the first placeholder with `body`
    pub fn render(&self, body: &str) -> String {
        self.0.replacen(Self::PLACEHOLDER, body, 1)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

/// Result of composing the outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedMessage {
    pub text: String,
    pub length: usize,
    pub max_length: usize,
    pub exceeds_limit: bool,
    /// False when the template had no placeholder and was passed through
    pub placeholder_found: bool,
}
