use chrono::Duration as ChronoDuration;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::ProductCache;
use super::listing::ListingParser;
use crate::browser::{BrowserDriver, Selector};
use crate::config::{to_selectors, AppConfig, CatalogConfig};
use crate::models::{Product, ProductId, ProductSource};
use crate::utils::error::ScrapeError;
use crate::Result;

/// Fetches the discount and purchase-history listings.
pub struct CatalogScraper {
    driver: Arc<dyn BrowserDriver>,
    cache: ProductCache,
    parser: ListingParser,
    bonus_url: String,
    history_url: String,
    cookie_consent: Vec<Selector>,
    load_more: Vec<Selector>,
    settings: CatalogConfig,
    freshness: ChronoDuration,
    consent_checked: AtomicBool,
}

impl CatalogScraper {
    pub fn new(driver: Arc<dyn BrowserDriver>, cache: ProductCache, config: &AppConfig) -> Result<Self> {
        let parser = ListingParser::new(&config.site.listing, &config.site.base_url, &config.cart.currency)?;
        Ok(Self {
            driver,
            cache,
            parser,
            bonus_url: config.site.bonus_url.clone(),
            history_url: config.site.history_url.clone(),
            cookie_consent: to_selectors(&config.site.cookie_consent),
            load_more: to_selectors(&config.site.listing.load_more),
            settings: config.catalog.clone(),
            freshness: ChronoDuration::hours(config.cache.freshness_hours as i64),
            consent_checked: AtomicBool::new(false),
        })
    }

    pub fn cache(&self) -> &ProductCache {
        &self.cache
    }

    fn url_for(&self, source: ProductSource) -> &str {
        match source {
            ProductSource::Bonus => &self.bonus_url,
            ProductSource::History => &self.history_url,
        }
    }

    /// All products of one listing.
    ///
    /// A fresh cache entry short-circuits the browser entirely. A failure after
    /// some products were read returns them inside the error.
    pub async fn scrape(
        &self,
        source: ProductSource,
        use_cache: bool,
    ) -> std::result::Result<Vec<Product>, ScrapeError> {
        if use_cache {
            if let Some(products) = self.cache.get(source, self.freshness).await {
                return Ok(products);
            }
        }

        let url = self.url_for(source).to_string();
        info!(%source, %url, "Scraping listing");
        self.driver
            .navigate(&url)
            .await
            .map_err(|e| ScrapeError::new(format!("could not open {} listing: {}", source, e), vec![]))?;
        self.dismiss_cookie_consent().await;

        let mut collected: Vec<Product> = Vec::new();
        let mut seen: HashSet<ProductId> = HashSet::new();
        let mut skipped = 0;

        for round in 0..self.settings.max_rounds.max(1) {
            if round > 0 {
                if let Err(e) = self.load_more().await {
                    return Err(ScrapeError::new(
                        format!("{} listing stopped loading after {} rounds: {}", source, round, e),
                        collected,
                    ));
                }
                tokio::time::sleep(Duration::from_millis(self.settings.settle_ms)).await;
            }

            let html = match self.driver.page_source().await {
                Ok(html) => html,
                Err(e) => {
                    return Err(ScrapeError::new(
                        format!("could not read {} listing: {}", source, e),
                        collected,
                    ))
                }
            };

            let listing = self.parser.parse(&html, source);
            skipped = listing.skipped;
            let before = collected.len();
            for product in listing.products {
                if seen.insert(product.id.clone()) {
                    collected.push(product);
                }
            }
            debug!(%source, round, new = collected.len() - before, total = collected.len(), "Listing round");

            if collected.len() == before && round > 0 {
                break;
            }
            if collected.len() >= self.settings.max_products {
                collected.truncate(self.settings.max_products);
                break;
            }
        }

        if skipped > 0 {
            warn!(%source, skipped, "Some listing cards could not be parsed");
        }
        if collected.is_empty() {
            return Err(ScrapeError::new(format!("no products found on {} listing", source), vec![]));
        }

        if let Err(e) = self.cache.put(source, &collected).await {
            warn!(%source, "Could not cache products: {}", e);
        }
        info!(%source, count = collected.len(), "Scraped listing");
        Ok(collected)
    }

    /// Click "load more" when the page has one, otherwise scroll.
    async fn load_more(&self) -> std::result::Result<(), crate::utils::error::DriverError> {
        match self.driver.locate_first_of(&self.load_more).await {
            Some(button) => self.driver.click(&button).await,
            None => self.driver.scroll_to_bottom().await,
        }
    }

    /// Best effort, once per scraper; a missing banner is fine.
    async fn dismiss_cookie_consent(&self) {
        if self.consent_checked.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.driver.locate_first_of(&self.cookie_consent).await {
            Some(button) => match self.driver.click(&button).await {
                Ok(()) => info!("Accepted cookie consent"),
                Err(e) => warn!("Could not accept cookie consent: {}", e),
            },
            None => debug!("No cookie consent banner"),
        }
    }
}
