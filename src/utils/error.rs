use thiserror::Error;

use crate::models::Product;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Browser error: {0}")]
    Browser(#[from] DriverError),

    #[error("Scraping error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Plugin error: {plugin_type}: {message}")]
    Plugin { plugin_type: String, message: String },

    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("Session rejected by the site: {0}")]
    SessionInvalidated(String),

    #[error("Could not add {product_id} to the cart: {reason}")]
    AddItemFailed { product_id: String, reason: String },

    #[error("Cart total {total} stayed below minimum {minimum} after {rounds} top-up rounds")]
    ThresholdUnreachable {
        total: String,
        minimum: String,
        rounds: u32,
    },

    #[error("Cart total unavailable: {0}")]
    CartTotalUnavailable(String),

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Conditions that end a run early instead of being absorbed into the audit trail.
    pub fn is_run_aborting(&self) -> bool {
        matches!(
            self,
            AppError::AuthenticationRequired(_)
                | AppError::SessionInvalidated(_)
                | AppError::Planner(_)
                | AppError::Cancelled(_)
        )
    }
}

/// Failure of a single browser primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Interaction failed on {selector}: {message}")]
    Interaction { selector: String, message: String },

    #[error("Timed out after {millis}ms waiting for {what}")]
    Timeout { what: String, millis: u64 },

    #[error("Browser unavailable: {0}")]
    Unavailable(String),
}

/// Catalog fetch failure. Whatever was parsed before the failure travels with it.
#[derive(Error, Debug, Clone)]
#[error("{reason} ({} products recovered)", partial_results.len())]
pub struct ScrapeError {
    pub reason: String,
    pub partial_results: Vec<Product>,
}

impl ScrapeError {
    pub fn new(reason: impl Into<String>, partial_results: Vec<Product>) -> Self {
        Self {
            reason: reason.into(),
            partial_results,
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.partial_results.is_empty()
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
