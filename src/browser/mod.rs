use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::models::BrowserState;
use crate::utils::error::DriverError;

pub mod chrome;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use chrome::ChromeDriver;
#[cfg(any(test, feature = "testing"))]
pub use scripted::{ClickEffect, ScriptedBrowser, ScriptedElement, ScriptedPage, Visibility};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How to find an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "query", rename_all = "lowercase")]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn css(query: impl Into<String>) -> Self {
        Selector::Css(query.into())
    }

    pub fn xpath(query: impl Into<String>) -> Self {
        Selector::XPath(query.into())
    }

    /// Interpret a configured selector string.
    ///
    /// `xpath:` prefixes and expressions starting with `/` or `(/` are XPath,
    /// everything else is CSS.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("xpath:") {
            return Selector::XPath(rest.trim().to_string());
        }
        if let Some(rest) = raw.strip_prefix("css:") {
            return Selector::Css(rest.trim().to_string());
        }
        if raw.starts_with('/') || raw.starts_with("(/") {
            Selector::XPath(raw.to_string())
        } else {
            Selector::Css(raw.to_string())
        }
    }

    pub fn query(&self) -> &str {
        match self {
            Selector::Css(q) | Selector::XPath(q) => q,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(q) => write!(f, "css:{}", q),
            Selector::XPath(q) => write!(f, "xpath:{}", q),
        }
    }
}

/// A located element, addressed by the selector that found it and its match position.
///
/// Handles are re-resolved on every use, so a handle to an element that left the
/// page yields `ElementNotFound` instead of acting on a stale node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub selector: Selector,
    pub index: usize,
}

impl ElementHandle {
    pub fn new(selector: Selector, index: usize) -> Self {
        Self { selector, index }
    }
}

/// Browser automation primitives the engine is written against.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// First match, or `ElementNotFound`.
    async fn locate(&self, selector: &Selector) -> Result<ElementHandle, DriverError>;

    async fn locate_all(&self, selector: &Selector) -> Result<Vec<ElementHandle>, DriverError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn read_text(&self, element: &ElementHandle) -> Result<String, DriverError>;

    async fn read_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn page_source(&self) -> Result<String, DriverError>;

    async fn scroll_to_bottom(&self) -> Result<(), DriverError>;

    async fn export_state(&self) -> Result<BrowserState, DriverError>;

    async fn import_state(&self, state: &BrowserState) -> Result<(), DriverError>;

    async fn close(&self) -> Result<(), DriverError>;

    /// Poll for `selector` until it appears or `timeout` elapses.
    async fn wait_for(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<ElementHandle, DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.locate(selector).await {
                Ok(handle) => return Ok(handle),
                Err(DriverError::ElementNotFound { .. }) => {}
                Err(other) => return Err(other),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: selector.to_string(),
                    millis: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// First selector in `candidates` that matches, with its handle.
    async fn locate_first_of(&self, candidates: &[Selector]) -> Option<ElementHandle> {
        for selector in candidates {
            if let Ok(handle) = self.locate(selector).await {
                return Some(handle);
            }
        }
        None
    }
}
