//! Services Layer
//!
//! Business logic behind the command layer. Services own their state and
//! talk to the store, the event bus and the notifier; commands only parse
//! requests and shape responses.
//!
//! # Architecture
//!
//! ```text
//! Host (stdin) --> Commands --> WatchlistService --> RecommendationClient --> Backend
//!      |                              |                       |
//!      |                              v                       v
//!      |                            Store                 EventBus
//!      |                                                      |
//!      └──── events ────────────────────────────────> ProgressTracker
//!                                                      ScraperStateSync
//! ```
//!
//! # Services
//!
//! - `WatchlistService` - Watch-list edits, two-phase replacement, message composition
//! - `RecommendationClient` - Correlated recommendation requests
//! - `ProgressTracker` - Per-request progress records and toasts
//! - `ScraperStateSync` - Mirror of the background price scraper
//! - `MessageComposer` - Price-grouped WTB message rendering

pub mod message_composer;
pub mod progress_tracker;
pub mod recommendation_client;
pub mod scraper_sync;
pub mod watchlist_service;

// Re-export commonly used types and services
pub use message_composer::MessageComposer;
pub use progress_tracker::{ProgressOutcome, ProgressTracker};
pub use recommendation_client::{
    HttpRecommendationBackend, ProgressReporter, RecommendationBackend, RecommendationClient,
    RecommendationRequest, Submission,
};
pub use scraper_sync::ScraperStateSync;
pub use watchlist_service::{PriceChange, ReplacementProposal, WatchlistService};
