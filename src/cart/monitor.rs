use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, info};

use crate::browser::{BrowserDriver, Selector};
use crate::catalog::PriceParser;
use crate::config::{to_selectors, AppConfig};
use crate::models::{CartLineResult, CartState, Product};
use crate::utils::error::AppError;
use crate::Result;

const CURRENCY_MARKERS: [&str; 2] = ["€", "EUR"];

/// Reads the live cart total and picks products to close a gap to the minimum.
pub struct ThresholdMonitor {
    driver: Arc<dyn BrowserDriver>,
    total_selectors: Vec<Selector>,
    prices: PriceParser,
    currency: String,
    read_attempts: u32,
    read_delay: Duration,
}

impl ThresholdMonitor {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        total_selectors: Vec<Selector>,
        currency: impl Into<String>,
        read_attempts: u32,
        read_delay: Duration,
    ) -> Self {
        let currency = currency.into();
        Self {
            driver,
            total_selectors,
            prices: PriceParser::new(&currency),
            currency,
            read_attempts: read_attempts.max(1),
            read_delay,
        }
    }

    pub fn from_config(driver: Arc<dyn BrowserDriver>, config: &AppConfig) -> Self {
        Self::new(
            driver,
            to_selectors(&config.site.cart_total),
            config.cart.currency.clone(),
            config.cart.total_read_retries,
            config.cart.settle(),
        )
    }

    /// The cart as the site shows it right now.
    pub async fn current_state(&self, lines: &[CartLineResult]) -> Result<CartState> {
        let total = self.current_total().await?;
        Ok(CartState::observed(total, &self.currency, lines))
    }

    /// Read the displayed total, retrying a bounded number of times.
    pub async fn current_total(&self) -> Result<Decimal> {
        let schedule = FixedInterval::new(self.read_delay).take(self.read_attempts as usize - 1);
        let total = Retry::spawn(schedule, || self.read_total_once())
            .await
            .map_err(|_| {
                AppError::CartTotalUnavailable(format!(
                    "no readable total in {} selectors after {} attempts",
                    self.total_selectors.len(),
                    self.read_attempts
                ))
            })?;
        debug!(%total, "Read cart total");
        Ok(total)
    }

    async fn read_total_once(&self) -> std::result::Result<Decimal, ()> {
        for selector in &self.total_selectors {
            let Ok(element) = self.driver.locate(selector).await else {
                continue;
            };
            // The aria-label carries the amount on widgets that only show an icon
            let aria = self
                .driver
                .read_attribute(&element, "aria-label")
                .await
                .ok()
                .flatten();
            let text = self.driver.read_text(&element).await.ok();

            for candidate in [aria, text].into_iter().flatten() {
                if !CURRENCY_MARKERS.iter().any(|m| candidate.contains(m)) {
                    continue;
                }
                if let Some((total, _)) = self.prices.parse_with_currency(&candidate) {
                    return Ok(total);
                }
            }
        }
        Err(())
    }

    pub fn needs_top_up(state: &CartState, minimum: Decimal) -> bool {
        state.total < minimum
    }

    /// Cheapest available products first, ties broken by identifier, until
    /// their prices cover `shortfall`. Returns everything eligible when even
    /// that is not enough.
    pub fn select_top_up(remaining: &[Product], shortfall: Decimal) -> Vec<(Product, u32)> {
        if shortfall <= Decimal::ZERO {
            return Vec::new();
        }

        let mut candidates: Vec<&Product> = remaining
            .iter()
            .filter(|p| p.available && p.price > Decimal::ZERO)
            .collect();
        candidates.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.id.cmp(&b.id)));

        let mut covered = Decimal::ZERO;
        let mut picked = Vec::new();
        for product in candidates {
            if covered >= shortfall {
                break;
            }
            covered += product.price;
            picked.push((product.clone(), 1));
        }

        info!(%shortfall, %covered, items = picked.len(), "Selected top-up items");
        picked
    }
}
