use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};
use url::Url;

use super::strategies::{default_strategies, xpath_literal, LocatorStrategy};
use crate::browser::{BrowserDriver, Selector};
use crate::config::{to_selectors, AppConfig};
use crate::models::{CartLineResult, LineOrigin, Product, ProductId};
use crate::utils::error::AppError;
use crate::Result;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);
const CONFIRM_POLL: Duration = Duration::from_millis(100);
const PRODUCT_LINK_FRAGMENT: &str = "/producten/";

/// Where to look for a product that cannot be opened by its own URL.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub url: String,
    pub query_param: String,
    pub results: Vec<Selector>,
}

impl SearchSettings {
    pub fn url_for(&self, title: &str) -> std::result::Result<Url, url::ParseError> {
        Url::parse_with_params(&self.url, &[(self.query_param.as_str(), title)])
    }
}

/// Product link on an open listing whose text carries `title`.
pub fn title_link(title: &str) -> Selector {
    Selector::xpath(format!(
        "//a[contains(@href, '{}') and contains(normalize-space(.), {})]",
        PRODUCT_LINK_FRAGMENT,
        xpath_literal(title)
    ))
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Extra attempts after the first one.
    pub retry_budget: u32,
    pub retry_delay: Duration,
    pub settle: Duration,
    pub confirm_timeout: Duration,
    pub cart_count: Vec<Selector>,
    pub login_markers: Vec<String>,
    pub overlay_close: Vec<Selector>,
    pub search: Option<SearchSettings>,
}

impl ExecutorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let site = &config.site;
        let search = (!site.search_url.is_empty() && !site.search_results.is_empty()).then(|| SearchSettings {
            url: site.search_url.clone(),
            query_param: site.search_query_param.clone(),
            results: to_selectors(&site.search_results),
        });
        Self {
            retry_budget: config.cart.retry_budget,
            retry_delay: Duration::from_millis(config.cart.retry_delay_ms),
            settle: config.cart.settle(),
            confirm_timeout: config.cart.confirm_timeout(),
            cart_count: to_selectors(&config.site.cart_count),
            login_markers: config.site.login_url_markers.clone(),
            overlay_close: to_selectors(&config.site.overlay_close),
            search,
        }
    }

    /// Delays of retry_delay, 2x, 4x ... capped at ten seconds.
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        let half = (self.retry_delay.as_millis() as u64) / 2;
        ExponentialBackoff::from_millis(2)
            .factor(half)
            .max_delay(MAX_RETRY_DELAY)
            .take(self.retry_budget as usize)
    }
}

/// Failure of one attempt at adding a product.
#[derive(Debug)]
enum AttemptError {
    /// Worth another try; carries the last strategy that was tried.
    Retryable {
        reason: String,
        strategy: Option<String>,
    },
    Fatal(AppError),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Retryable { .. })
    }
}

/// Adds planned products to the live cart, one product page at a time.
///
/// Every request ends up as exactly one [`CartLineResult`]. Only a session the
/// site no longer accepts surfaces as an error.
pub struct CartExecutor {
    driver: Arc<dyn BrowserDriver>,
    strategies: Vec<Box<dyn LocatorStrategy>>,
    settings: ExecutorSettings,
    count_pattern: Regex,
    added: HashSet<ProductId>,
    lines: Vec<CartLineResult>,
}

impl CartExecutor {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        strategies: Vec<Box<dyn LocatorStrategy>>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            driver,
            strategies,
            settings,
            count_pattern: Regex::new(r"\d+").unwrap(),
            added: HashSet::new(),
            lines: Vec::new(),
        }
    }

    pub fn from_config(driver: Arc<dyn BrowserDriver>, config: &AppConfig) -> Self {
        Self::new(
            driver,
            default_strategies(&config.site),
            ExecutorSettings::from_config(config),
        )
    }

    pub fn lines(&self) -> &[CartLineResult] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<CartLineResult> {
        self.lines
    }

    pub fn has_added(&self, id: &ProductId) -> bool {
        self.added.contains(id)
    }

    /// Products that already have a line, whatever its outcome.
    pub fn attempted(&self) -> HashSet<ProductId> {
        self.lines.iter().map(|line| line.product_id.clone()).collect()
    }

    pub async fn add_item(
        &mut self,
        product: &Product,
        quantity: u32,
        origin: LineOrigin,
    ) -> Result<CartLineResult> {
        let line = self.attempt_with_retries(product, quantity, origin).await?;
        self.lines.push(line.clone());
        Ok(line)
    }

    async fn attempt_with_retries(
        &mut self,
        product: &Product,
        quantity: u32,
        origin: LineOrigin,
    ) -> Result<CartLineResult> {
        if self.added.contains(&product.id) {
            debug!(product_id = %product.id, "Already in cart during this run");
            metrics::counter!("cart_lines_total", "outcome" => "skipped-duplicate").increment(1);
            return Ok(CartLineResult::skipped_duplicate(
                product.id.clone(),
                &product.title,
                quantity,
                origin,
            ));
        }

        if quantity == 0 || (product.url.is_empty() && self.settings.search.is_none()) {
            let reason = if quantity == 0 {
                "quantity must be at least one"
            } else {
                "product has no page to add it from"
            };
            return Ok(self.record_failure(product, quantity, None, reason.to_string(), 0, origin));
        }

        let attempts = AtomicU32::new(0);
        let outcome = {
            let this = &*self;
            let attempts = &attempts;
            RetryIf::spawn(
                this.settings.backoff(),
                move || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    this.attempt_once(product, quantity, attempt)
                },
                AttemptError::is_retryable,
            )
            .await
        };
        let attempts = attempts.load(Ordering::SeqCst);

        match outcome {
            Ok(strategy) => {
                self.added.insert(product.id.clone());
                metrics::counter!("cart_lines_total", "outcome" => "added").increment(1);
                info!(product_id = %product.id, %strategy, attempts, "Added to cart");
                Ok(CartLineResult::added(
                    product.id.clone(),
                    &product.title,
                    quantity,
                    strategy,
                    attempts,
                    origin,
                ))
            }
            Err(AttemptError::Retryable { reason, strategy }) => {
                Ok(self.record_failure(product, quantity, strategy, reason, attempts, origin))
            }
            Err(AttemptError::Fatal(e)) => Err(e),
        }
    }

    fn record_failure(
        &self,
        product: &Product,
        quantity: u32,
        strategy: Option<String>,
        reason: String,
        attempts: u32,
        origin: LineOrigin,
    ) -> CartLineResult {
        let error = AppError::AddItemFailed {
            product_id: product.id.to_string(),
            reason: reason.clone(),
        };
        warn!(attempts, "{}", error);
        metrics::counter!("cart_lines_total", "outcome" => "failed").increment(1);
        CartLineResult::failed(
            product.id.clone(),
            &product.title,
            quantity,
            strategy,
            reason,
            attempts,
            origin,
        )
    }

    /// Open the product page and walk the strategies until one confirms an add.
    async fn attempt_once(
        &self,
        product: &Product,
        quantity: u32,
        attempt: u32,
    ) -> std::result::Result<String, AttemptError> {
        self.open_product(product, attempt).await?;
        self.check_session(product).await?;
        tokio::time::sleep(self.settings.settle).await;
        self.dismiss_overlays().await;

        let mut last_reason = "no add strategies configured".to_string();
        let mut last_strategy = None;

        for strategy in &self.strategies {
            let name = strategy.name().to_string();
            let before = self.read_count().await.unwrap_or(0);

            let Some(control) = strategy.locate(self.driver.as_ref(), product).await else {
                debug!(product_id = %product.id, strategy = %name, "No add control found");
                last_reason = format!("{}: no add control found", name);
                last_strategy = Some(name);
                continue;
            };

            let mut clicked = true;
            for _ in 0..quantity {
                if let Err(e) = self.driver.click(&control).await {
                    debug!(product_id = %product.id, strategy = %name, "Click failed: {}", e);
                    last_reason = format!("{}: {}", name, e);
                    clicked = false;
                    break;
                }
            }
            if !clicked {
                last_strategy = Some(name);
                continue;
            }

            tokio::time::sleep(self.settings.settle).await;
            if self.confirm_increment(before).await {
                return Ok(name);
            }
            last_reason = format!("{}: cart count did not change", name);
            last_strategy = Some(name);
        }

        Err(AttemptError::Retryable {
            reason: last_reason,
            strategy: last_strategy,
        })
    }

    /// Get onto the product's page by its URL, falling back to search.
    async fn open_product(&self, product: &Product, attempt: u32) -> std::result::Result<(), AttemptError> {
        if !product.url.is_empty() {
            debug!(product_id = %product.id, attempt, "Opening product page");
            match self.driver.navigate(&product.url).await {
                Ok(()) => return Ok(()),
                Err(e) if self.settings.search.is_none() => return Err(retryable(e.to_string())),
                Err(e) => debug!(product_id = %product.id, "Product page failed, searching instead: {}", e),
            }
        }
        self.find_by_search(product).await
    }

    async fn find_by_search(&self, product: &Product) -> std::result::Result<(), AttemptError> {
        let Some(search) = &self.settings.search else {
            return Err(retryable("product has no page to add it from"));
        };

        // a listing that is already open may show the product
        if let Ok(link) = self.driver.locate(&title_link(&product.title)).await {
            debug!(product_id = %product.id, "Found product on the current page");
            return self.driver.click(&link).await.map_err(|e| retryable(e.to_string()));
        }

        let url = search
            .url_for(&product.title)
            .map_err(|e| retryable(format!("search URL: {}", e)))?;
        debug!(product_id = %product.id, %url, "Searching for product");
        self.driver
            .navigate(url.as_str())
            .await
            .map_err(|e| retryable(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + self.settings.confirm_timeout;
        let first = loop {
            if let Some(result) = self.driver.locate_first_of(&search.results).await {
                break result;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(retryable(format!("no search results for '{}'", product.title)));
            }
            tokio::time::sleep(CONFIRM_POLL).await;
        };
        self.driver.click(&first).await.map_err(|e| retryable(e.to_string()))
    }

    async fn check_session(&self, product: &Product) -> std::result::Result<(), AttemptError> {
        if let Ok(url) = self.driver.current_url().await {
            if self.settings.login_markers.iter().any(|m| url.contains(m.as_str())) {
                return Err(AttemptError::Fatal(AppError::SessionInvalidated(format!(
                    "redirected to {} while opening {}",
                    url, product.id
                ))));
            }
        }
        Ok(())
    }

    /// Close popups that would swallow clicks meant for the add control.
    async fn dismiss_overlays(&self) {
        for selector in &self.settings.overlay_close {
            let Ok(close) = self.driver.locate(selector).await else {
                continue;
            };
            match self.driver.click(&close).await {
                Ok(()) => debug!(%selector, "Closed overlay"),
                Err(e) => debug!(%selector, "Could not close overlay: {}", e),
            }
        }
    }

    async fn read_count(&self) -> Option<u32> {
        let badge = self.driver.locate_first_of(&self.settings.cart_count).await?;
        let text = self.driver.read_text(&badge).await.ok()?;
        self.count_pattern.find(&text)?.as_str().parse().ok()
    }

    async fn confirm_increment(&self, before: u32) -> bool {
        let deadline = tokio::time::Instant::now() + self.settings.confirm_timeout;
        loop {
            if self.read_count().await.is_some_and(|count| count > before) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(CONFIRM_POLL).await;
        }
    }
}

fn retryable(reason: impl Into<String>) -> AttemptError {
    AttemptError::Retryable {
        reason: reason.into(),
        strategy: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{ClickEffect, ScriptedBrowser, ScriptedElement, ScriptedPage};
    use crate::cart::strategies::{DirectButton, StructuralPosition, TextMatch};
    use crate::models::{LineOutcome, NewProduct, ProductSource};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn d(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    const BADGE: &str = "[data-testhook='basket-count']";

    fn product(sku: &str, price: &str) -> Product {
        Product::new(NewProduct {
            title: format!("Product {}", sku),
            price: d(price),
            original_price: None,
            currency: "EUR".into(),
            source: ProductSource::Bonus,
            tags: vec![],
            available: true,
            url: Some(format!("https://shop.test/producten/product/{}/x", sku)),
        })
    }

    fn settings() -> ExecutorSettings {
        ExecutorSettings {
            retry_budget: 2,
            retry_delay: Duration::ZERO,
            settle: Duration::ZERO,
            confirm_timeout: Duration::from_millis(200),
            cart_count: vec![Selector::css(BADGE)],
            login_markers: vec!["/login".into()],
            overlay_close: vec![],
            search: None,
        }
    }

    fn search_settings() -> SearchSettings {
        SearchSettings {
            url: "https://shop.test/zoeken".into(),
            query_param: "query".into(),
            results: vec![Selector::css("[data-testhook='product-card'] a")],
        }
    }

    /// Search results page for `item` whose first card links to `target`.
    fn search_page(item: &Product, target: &str) -> ScriptedPage {
        let url = search_settings().url_for(&item.title).unwrap();
        ScriptedPage::new(url.as_str()).with_element(
            Selector::css("[data-testhook='product-card'] a"),
            ScriptedElement::new(&item.title).on_click(ClickEffect::Navigate(target.to_string())),
        )
    }

    fn add_page(url: &str, price: &str) -> ScriptedPage {
        ScriptedPage::new(url).with_element(
            Selector::css("button[data-testid='product-plus']"),
            ScriptedElement::new("+").adds_to_cart(d(price)),
        )
    }

    fn strategies() -> Vec<Box<dyn LocatorStrategy>> {
        vec![
            Box::new(DirectButton::new(vec![Selector::css("button[data-testid='product-plus']")])),
            Box::new(TextMatch::new(vec!["+ Los".into()], "Kies")),
            Box::new(StructuralPosition::new(vec![Selector::css("article")])),
        ]
    }

    fn browser_with(page: ScriptedPage) -> Arc<ScriptedBrowser> {
        Arc::new(
            ScriptedBrowser::new()
                .with_global(Selector::css(BADGE), ScriptedElement::cart_count())
                .with_page(page),
        )
    }

    fn executor(browser: Arc<ScriptedBrowser>) -> CartExecutor {
        CartExecutor::new(browser, strategies(), settings())
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_button_adds_quantity() {
        let item = product("wi1", "2.49");
        let browser = browser_with(ScriptedPage::new(&item.url).with_element(
            Selector::css("button[data-testid='product-plus']"),
            ScriptedElement::new("+").adds_to_cart(d("2.49")),
        ));
        let mut executor = executor(browser.clone());

        let line = executor.add_item(&item, 2, LineOrigin::Planned).await.unwrap();
        assert_eq!(line.outcome, LineOutcome::Added);
        assert_eq!(line.strategy.as_deref(), Some("direct-button"));
        assert_eq!(line.attempts, 1);
        assert_eq!(browser.cart_count(), 2);
        assert_eq!(browser.cart_total(), d("4.98"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_to_later_strategy() {
        let item = product("wi2", "1.19");
        let browser = browser_with(
            ScriptedPage::new(&item.url)
                // the direct button exists but does nothing
                .with_element(
                    Selector::css("button[data-testid='product-plus']"),
                    ScriptedElement::new("+"),
                )
                .with_element(
                    TextMatch::selector_for("+ Los", "Kies"),
                    ScriptedElement::new("+ Los").adds_to_cart(d("1.19")),
                ),
        );
        let mut executor = executor(browser.clone());

        let line = executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        assert!(line.is_added());
        assert_eq!(line.strategy.as_deref(), Some("text-match"));
        assert_eq!(browser.cart_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_strategy_adds_when_others_find_nothing() {
        let item = product("wi7", "3.29");
        let browser = browser_with(ScriptedPage::new(&item.url).with_element(
            StructuralPosition::selector_for(&Selector::css("article")),
            ScriptedElement::new("+").adds_to_cart(d("3.29")),
        ));
        let mut executor = executor(browser.clone());

        let line = executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        assert_eq!(line.outcome, LineOutcome::Added);
        assert_eq!(line.strategy.as_deref(), Some("structural-position"));
        assert_eq!(line.attempts, 1);
        assert_eq!(line.failure_reason, None);
        assert!(executor.lines().iter().all(|l| !l.is_failed()));
        assert_eq!(browser.cart_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_is_closed_before_adding() {
        let item = product("wi8", "1.00");
        let close = Selector::css("button[data-testid='notification-tooltip-close']");
        let page = || {
            add_page(&item.url, "1.00").with_element(
                close.clone(),
                ScriptedElement::new("Sluiten").blocks_clicks().on_click(ClickEffect::Dismiss),
            )
        };

        // without a close selector every add click is intercepted
        let blocked = browser_with(page());
        let line = executor(blocked.clone()).add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        assert!(line.is_failed());
        assert_eq!(blocked.cart_count(), 0);

        let browser = browser_with(page());
        let mut executor = CartExecutor::new(
            browser.clone(),
            strategies(),
            ExecutorSettings {
                overlay_close: vec![close.clone()],
                ..settings()
            },
        );
        let line = executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        assert!(line.is_added());
        assert_eq!(line.attempts, 1);
        assert_eq!(browser.clicks().first(), Some(&close));
        assert_eq!(browser.cart_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_product_without_url_is_found_by_search() {
        let mut item = product("wi9", "2.19");
        let target = item.url.clone();
        item.url = String::new();
        let browser = Arc::new(
            ScriptedBrowser::new()
                .with_global(Selector::css(BADGE), ScriptedElement::cart_count())
                .with_page(search_page(&item, &target))
                .with_page(add_page(&target, "2.19")),
        );
        let settings = ExecutorSettings {
            search: Some(search_settings()),
            ..settings()
        };
        let mut executor = CartExecutor::new(browser.clone(), strategies(), settings);

        let line = executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        assert!(line.is_added(), "{:?}", line.failure_reason);
        let searched = search_settings().url_for(&item.title).unwrap();
        assert_eq!(browser.navigations(), vec![searched.to_string(), target]);
        assert_eq!(browser.cart_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_product_page_falls_back_to_search() {
        let item = product("wi10", "4.00");
        let alternative = "https://shop.test/producten/product/wi10/kopie";
        let browser = Arc::new(
            ScriptedBrowser::new()
                .with_global(Selector::css(BADGE), ScriptedElement::cart_count())
                .with_failing_url(&item.url)
                .with_page(search_page(&item, alternative))
                .with_page(add_page(alternative, "4.00")),
        );
        let settings = ExecutorSettings {
            search: Some(search_settings()),
            ..settings()
        };
        let mut executor = CartExecutor::new(browser.clone(), strategies(), settings);

        let line = executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        assert!(line.is_added(), "{:?}", line.failure_reason);
        assert_eq!(line.attempts, 1);
        assert_eq!(browser.cart_total(), d("4.00"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_listing_is_checked_before_searching() {
        let mut item = product("wi11", "0.99");
        let target = item.url.clone();
        item.url = String::new();
        let listing = "https://shop.test/producten/zuivel";
        let browser = Arc::new(
            ScriptedBrowser::new()
                .with_global(Selector::css(BADGE), ScriptedElement::cart_count())
                .with_page(ScriptedPage::new(listing).with_element(
                    title_link(&item.title),
                    ScriptedElement::new(&item.title).on_click(ClickEffect::Navigate(target.clone())),
                ))
                .with_page(add_page(&target, "0.99")),
        );
        browser.navigate(listing).await.unwrap();
        let settings = ExecutorSettings {
            search: Some(search_settings()),
            ..settings()
        };
        let mut executor = CartExecutor::new(browser.clone(), strategies(), settings);

        let line = executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        assert!(line.is_added(), "{:?}", line.failure_reason);
        assert_eq!(browser.navigations(), vec![listing.to_string(), target]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_record_failure() {
        let item = product("wi3", "3.00");
        let browser = browser_with(ScriptedPage::new(&item.url).with_element(
            StructuralPosition::selector_for(&Selector::css("article")),
            ScriptedElement::new("+").failing_click(),
        ));
        let mut executor = executor(browser.clone());

        let line = executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        assert_eq!(line.outcome, LineOutcome::Failed);
        assert_eq!(line.attempts, 3);
        assert_eq!(line.strategy.as_deref(), Some("structural-position"));
        assert!(line.failure_reason.as_deref().unwrap().contains("not clickable"));
        assert_eq!(browser.navigations().len(), 3);
        assert_eq!(executor.lines().len(), 1);
        assert_eq!(browser.cart_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_is_skipped_without_browser() {
        let item = product("wi4", "1.00");
        let browser = browser_with(ScriptedPage::new(&item.url).with_element(
            Selector::css("button[data-testid='product-plus']"),
            ScriptedElement::new("+").adds_to_cart(d("1.00")),
        ));
        let mut executor = executor(browser.clone());

        executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        let operations = browser.operations();

        let line = executor.add_item(&item, 1, LineOrigin::TopUp).await.unwrap();
        assert_eq!(line.outcome, LineOutcome::SkippedDuplicate);
        assert_eq!(browser.operations(), operations);
        assert_eq!(browser.cart_count(), 1);
        assert_eq!(executor.lines().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_redirect_is_fatal() {
        let item = product("wi5", "1.00");
        let browser = browser_with(ScriptedPage::new(&item.url).protected());
        let mut executor = executor(browser.clone());

        let err = executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap_err();
        assert!(matches!(err, AppError::SessionInvalidated(_)));
        assert_eq!(browser.navigations().len(), 1);
        assert!(executor.lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_url_fails_without_navigation() {
        let mut item = product("wi6", "1.00");
        item.url = String::new();
        let browser = browser_with(ScriptedPage::new("https://shop.test/"));
        let mut executor = executor(browser.clone());

        let line = executor.add_item(&item, 1, LineOrigin::Planned).await.unwrap();
        assert!(line.is_failed());
        assert_eq!(line.attempts, 0);
        assert!(browser.navigations().is_empty());
    }

    #[test]
    fn test_backoff_schedule() {
        let settings = ExecutorSettings {
            retry_delay: Duration::from_millis(500),
            retry_budget: 3,
            ..settings()
        };
        let delays: Vec<u64> = settings.backoff().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000]);
    }
}
