use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, Selector};
use crate::config::{to_selectors, SiteConfig};
use crate::utils::cancel::Cancellation;
use crate::utils::error::AppError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    LoggedIn,
    LoggedOut,
    Unknown,
}

/// Classifies the current page from visible account widgets and the URL.
#[derive(Debug, Clone)]
pub struct LoginProbe {
    logged_in_indicators: Vec<Selector>,
    login_indicators: Vec<Selector>,
    login_url_markers: Vec<String>,
}

impl LoginProbe {
    pub fn new(
        logged_in_indicators: Vec<Selector>,
        login_indicators: Vec<Selector>,
        login_url_markers: Vec<String>,
    ) -> Self {
        Self {
            logged_in_indicators,
            login_indicators,
            login_url_markers,
        }
    }

    pub fn from_config(site: &SiteConfig) -> Self {
        Self::new(
            to_selectors(&site.logged_in_indicators),
            to_selectors(&site.login_indicators),
            site.login_url_markers.clone(),
        )
    }

    pub fn is_login_url(&self, url: &str) -> bool {
        self.login_url_markers.iter().any(|marker| url.contains(marker.as_str()))
    }

    pub async fn probe(&self, driver: &dyn BrowserDriver) -> LoginStatus {
        if let Ok(url) = driver.current_url().await {
            if self.is_login_url(&url) {
                return LoginStatus::LoggedOut;
            }
        }
        if driver.locate_first_of(&self.logged_in_indicators).await.is_some() {
            return LoginStatus::LoggedIn;
        }
        if driver.locate_first_of(&self.login_indicators).await.is_some() {
            return LoginStatus::LoggedOut;
        }
        LoginStatus::Unknown
    }
}

/// What to do when the run has no valid session.
#[async_trait]
pub trait LoginGate: Send + Sync {
    async fn await_login(
        &self,
        driver: &dyn BrowserDriver,
        probe: &LoginProbe,
        cancel: &Cancellation,
    ) -> Result<()>;
}

/// Opens the login page and waits for a human to finish logging in.
///
/// The page is never reloaded while waiting, so a half-typed password survives.
pub struct ManualLogin {
    login_url: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl ManualLogin {
    pub fn new(login_url: impl Into<String>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            login_url: login_url.into(),
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl LoginGate for ManualLogin {
    async fn await_login(
        &self,
        driver: &dyn BrowserDriver,
        probe: &LoginProbe,
        cancel: &Cancellation,
    ) -> Result<()> {
        driver.navigate(&self.login_url).await?;
        info!(
            timeout_secs = self.timeout.as_secs(),
            "Waiting for manual login in the browser window"
        );

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            match probe.probe(driver).await {
                LoginStatus::LoggedIn => {
                    info!("Login detected");
                    return Ok(());
                }
                status => debug!(?status, "Still waiting for login"),
            }

            if tokio::time::Instant::now() >= deadline {
                warn!("Gave up waiting for login");
                return Err(AppError::AuthenticationRequired(format!(
                    "no login detected within {}s",
                    self.timeout.as_secs()
                )));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AppError::Cancelled(cancel.reason().to_string()));
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

/// Auto mode never waits for a human.
pub struct Unattended;

#[async_trait]
impl LoginGate for Unattended {
    async fn await_login(
        &self,
        _driver: &dyn BrowserDriver,
        _probe: &LoginProbe,
        _cancel: &Cancellation,
    ) -> Result<()> {
        Err(AppError::AuthenticationRequired(
            "no valid session and running unattended".to_string(),
        ))
    }
}
