// Shared fixtures: a scripted shop with two listings, product pages and an
// account page, plus a planner that returns a fixed list.

pub mod cart_tests;
pub mod orchestrator_tests;
pub mod session_tests;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cartwright::browser::{BrowserDriver, ElementHandle, ScriptedBrowser, ScriptedElement, ScriptedPage, Selector, Visibility};
use cartwright::catalog::ProductCache;
use cartwright::models::{Bucket, BrowserState, Product, ProductId, RunMode, StoredCookie};
use cartwright::plugins::{BucketPlanner, PluginManager};
use cartwright::session::{LoginGate, LoginProbe, MemorySessionBackend, SessionStore};
use cartwright::utils::{Cancellation, DriverError};
use cartwright::{AppConfig, AppError, Result, RunOrchestrator};

pub const BASE_URL: &str = "https://shop.test";
pub const BONUS_URL: &str = "https://shop.test/bonus";
pub const HISTORY_URL: &str = "https://shop.test/history";
pub const ACCOUNT_URL: &str = "https://shop.test/account";
pub const LOGIN_URL: &str = "https://shop.test/login";

pub const ADD_BUTTON: &str = "button[data-testid='product-plus']";
pub const BADGE: &str = "[data-testhook='basket-count']";
pub const CART_WIDGET: &str = "[data-testid='navigation-shoppingList']";
pub const ACCOUNT_BUTTON: &str = "[data-testhook='account-button']";
pub const LOGIN_BUTTON: &str = "[data-testhook='login-button']";

pub fn d(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

pub fn product_url(sku: &str) -> String {
    format!("{}/producten/product/{}/x", BASE_URL, sku)
}

pub fn test_config(mode: RunMode, minimum: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.site.base_url = BASE_URL.into();
    config.site.bonus_url = BONUS_URL.into();
    config.site.history_url = HISTORY_URL.into();
    config.site.account_url = ACCOUNT_URL.into();
    config.site.login_url = LOGIN_URL.into();
    config.site.login_url_markers = vec!["/login".into()];
    config.site.logged_in_indicators = vec![ACCOUNT_BUTTON.into()];
    config.site.login_indicators = vec![LOGIN_BUTTON.into()];
    config.site.cookie_consent = vec![];
    config.site.cart_count = vec![BADGE.into()];
    config.site.cart_total = vec![CART_WIDGET.into()];
    config.site.add_buttons = vec![ADD_BUTTON.into()];
    config.site.add_button_labels = vec!["+ Los".into()];
    config.site.product_containers = vec!["article".into()];
    config.site.search_url = format!("{}/zoeken", BASE_URL);

    config.catalog.settle_ms = 0;
    config.catalog.max_rounds = 2;

    config.cart.minimum_total = d(minimum);
    config.cart.retry_budget = 1;
    config.cart.retry_delay_ms = 0;
    config.cart.settle_ms = 0;
    config.cart.confirm_timeout_ms = 300;
    config.cart.total_read_retries = 2;
    config.cart.top_up_rounds = 3;

    config.session.login_timeout_secs = 30;
    config.session.login_poll_ms = 500;
    config.planner.timeout_secs = 5;
    config.run.mode = mode;
    config
}

/// One product card as the listing pages render it.
pub struct Item {
    pub sku: &'static str,
    pub title: &'static str,
    pub price: &'static str,
}

pub const fn item(sku: &'static str, title: &'static str, price: &'static str) -> Item {
    Item { sku, title, price }
}

fn card(item: &Item) -> String {
    format!(
        r#"<div data-testhook="promotion-card">
             <a href="/producten/product/{sku}/x"><span data-testhook="promotion-card-title">{title}</span></a>
             <div data-testhook="price" data-testpricenow="{price}"></div>
           </div>"#,
        sku = item.sku,
        title = item.title,
        price = item.price
    )
}

fn listing(items: &[Item]) -> String {
    let cards: Vec<String> = items.iter().map(card).collect();
    format!("<html><body>{}</body></html>", cards.join(""))
}

pub fn session_cookie() -> StoredCookie {
    StoredCookie {
        name: "ah_session".into(),
        value: "valid-token".into(),
        domain: "shop.test".into(),
        path: "/".into(),
        expires: None,
        secure: true,
        http_only: true,
    }
}

/// A shop where every listed product has a working add button.
pub struct Shop {
    browser: ScriptedBrowser,
}

impl Shop {
    pub fn new(bonus: &[Item], history: &[Item]) -> Self {
        let mut browser = ScriptedBrowser::new()
            .with_login_url(LOGIN_URL)
            .with_accepted_session(session_cookie())
            .with_page(ScriptedPage::new(BONUS_URL).with_stage(listing(bonus)))
            .with_page(ScriptedPage::new(HISTORY_URL).with_stage(listing(history)))
            .with_page(ScriptedPage::new(ACCOUNT_URL).protected())
            .with_global(Selector::css(BADGE), ScriptedElement::cart_count())
            .with_global(Selector::css(CART_WIDGET), ScriptedElement::cart_total())
            .with_global(
                Selector::css(ACCOUNT_BUTTON),
                ScriptedElement::new("Mijn AH").visible_when(Visibility::Authenticated),
            )
            .with_global(
                Selector::css(LOGIN_BUTTON),
                ScriptedElement::new("Inloggen").visible_when(Visibility::Anonymous),
            );
        for item in bonus.iter().chain(history) {
            browser = browser.with_page(
                ScriptedPage::new(product_url(item.sku))
                    .protected()
                    .with_element(
                        Selector::css(ADD_BUTTON),
                        ScriptedElement::new("+").adds_to_cart(d(item.price)),
                    ),
            );
        }
        Self { browser }
    }

    /// Replace a product page with one whose add button never responds.
    pub fn with_broken_page(self, sku: &str) -> Self {
        Self {
            browser: self.browser.with_page(
                ScriptedPage::new(product_url(sku))
                    .protected()
                    .with_element(Selector::css(ADD_BUTTON), ScriptedElement::new("+").failing_click()),
            ),
        }
    }

    pub fn with_cart(self, count: u32, total: &str) -> Self {
        Self {
            browser: self.browser.with_cart(count, d(total)),
        }
    }

    pub fn build(self) -> Arc<ScriptedBrowser> {
        Arc::new(self.browser)
    }
}

pub fn memory_sessions() -> SessionStore {
    SessionStore::new(Arc::new(MemorySessionBackend::new()), "test", chrono::Duration::days(14))
}

/// Session store already holding the cookie the shop accepts.
pub async fn stored_sessions() -> SessionStore {
    let sessions = memory_sessions();
    sessions
        .save_state(BrowserState {
            cookies: vec![session_cookie()],
            ..BrowserState::default()
        })
        .await
        .unwrap();
    sessions
}

pub type Hook = Box<dyn Fn() + Send + Sync>;

/// Planner that returns the same buckets every time and counts its calls.
pub struct FixedPlanner {
    buckets: Vec<Bucket>,
    calls: AtomicUsize,
    fail: bool,
    on_plan: Option<Hook>,
}

impl FixedPlanner {
    pub fn new(buckets: Vec<Bucket>) -> Self {
        Self {
            buckets,
            calls: AtomicUsize::new(0),
            fail: false,
            on_plan: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    /// Run `hook` while planning, to change the shop between scraping and adding.
    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.on_plan = Some(hook);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BucketPlanner for FixedPlanner {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn plan(&self, _catalog: &[Product], _requirement: &str, _history: &[Product]) -> Result<Vec<Bucket>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_plan {
            hook();
        }
        if self.fail {
            return Err(AppError::Planner("service unavailable".into()));
        }
        Ok(self.buckets.clone())
    }
}

pub fn bucket(name: &str, items: &[(&str, u32)]) -> Bucket {
    items.iter().fold(Bucket::new(name, "test"), |bucket, (sku, qty)| {
        bucket.with_item(ProductId::new(*sku), *qty)
    })
}

/// Stands in for a human logging in through the browser window.
#[derive(Clone)]
pub struct ScriptedHuman {
    browser: Arc<ScriptedBrowser>,
    logins: Arc<AtomicUsize>,
}

impl ScriptedHuman {
    pub fn new(browser: Arc<ScriptedBrowser>) -> Self {
        Self {
            browser,
            logins: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginGate for ScriptedHuman {
    async fn await_login(&self, driver: &dyn BrowserDriver, _probe: &LoginProbe, _cancel: &Cancellation) -> Result<()> {
        driver.navigate(LOGIN_URL).await?;
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.browser.set_authenticated(true);
        Ok(())
    }
}

pub async fn orchestrator(
    config: AppConfig,
    browser: Arc<ScriptedBrowser>,
    sessions: SessionStore,
    planner: Arc<FixedPlanner>,
) -> RunOrchestrator {
    let cache = ProductCache::in_memory().await.unwrap();
    RunOrchestrator::new(config, browser, sessions, cache, planner, PluginManager::new()).unwrap()
}
