use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::browser::Selector;
use crate::models::RunMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub browser: BrowserConfig,
    pub catalog: CatalogConfig,
    pub cart: CartConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub planner: PlannerConfig,
    pub notifications: NotificationsConfig,
    pub run: RunConfig,
}

/// Where things live on the shop's website.
///
/// Selector strings starting with `/` are XPath, everything else is CSS
/// (see [`Selector::parse`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub bonus_url: String,
    pub history_url: String,
    /// Page only reachable when logged in; used to verify a restored session.
    pub account_url: String,
    pub login_url: String,
    /// Cart page linked from notifications.
    pub cart_url: String,
    /// URL fragments that mean "we got bounced to the login page".
    pub login_url_markers: Vec<String>,
    pub login_indicators: Vec<String>,
    pub logged_in_indicators: Vec<String>,
    pub cookie_consent: Vec<String>,
    pub cart_count: Vec<String>,
    pub cart_total: Vec<String>,
    pub add_buttons: Vec<String>,
    pub add_button_labels: Vec<String>,
    /// Buttons whose label contains this open a variant picker instead of adding.
    pub excluded_label: String,
    pub product_containers: Vec<String>,
    /// Search page used when a product page cannot be opened; empty disables searching.
    pub search_url: String,
    pub search_query_param: String,
    /// Result links on the search page, best match first.
    pub search_results: Vec<String>,
    /// Close buttons of popups that sit on top of the add controls.
    pub overlay_close: Vec<String>,
    /// Markers of a bonus page that bundles several products under one offer.
    pub product_group: Vec<String>,
    pub product_group_cards: Vec<String>,
    pub listing: ListingSelectors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    pub card: Vec<String>,
    pub title: Vec<String>,
    pub price: String,
    pub price_now_attribute: String,
    pub price_was_attribute: String,
    pub price_text: Vec<String>,
    pub link: String,
    pub tags: Vec<String>,
    pub unavailable: Vec<String>,
    pub load_more: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,
    pub idle_timeout_secs: u64,
    pub action_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub max_rounds: u32,
    pub settle_ms: u64,
    pub max_products: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CartConfig {
    pub minimum_total: Decimal,
    pub currency: String,
    /// Attempts per item after the first one fails.
    pub retry_budget: u32,
    pub retry_delay_ms: u64,
    pub settle_ms: u64,
    pub confirm_timeout_ms: u64,
    pub total_read_retries: u32,
    pub top_up_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub database_path: PathBuf,
    pub freshness_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub directory: PathBuf,
    pub profile: String,
    pub validity_days: i64,
    pub login_timeout_secs: u64,
    pub login_poll_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlannerKind {
    #[default]
    Llm,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub kind: PlannerKind,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_version: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_catalog_items: usize,
    pub categories: Vec<KeywordCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordCategory {
    pub name: String,
    pub keywords: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub from_name: String,
    pub to_address: Option<String>,
    pub use_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: RunMode,
    /// Wall-clock budget for unattended runs.
    pub time_budget_secs: u64,
    pub requirement: Option<String>,
    pub requirement_file: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub clear_cache_after_fill: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.ah.nl".into(),
            bonus_url: "https://www.ah.nl/bonus".into(),
            history_url: "https://www.ah.nl/producten/eerder-gekocht".into(),
            account_url: "https://www.ah.nl/mijn/dashboard".into(),
            login_url: "https://www.ah.nl/mijn/inloggen".into(),
            cart_url: "https://www.ah.nl/mijnlijst".into(),
            login_url_markers: vec!["/inloggen".into(), "login.ah.nl".into()],
            login_indicators: vec![
                "//a[contains(@href, 'inloggen')]".into(),
                "[data-testhook='login-button']".into(),
            ],
            logged_in_indicators: vec![
                "a[href*='/mijn-ah']".into(),
                "[data-testhook='account-button']".into(),
                "[data-testhook='user-menu']".into(),
            ],
            cookie_consent: vec![
                "//button[@data-testid='accept-cookies']".into(),
                "//button[contains(text(), 'Accepteren')]".into(),
            ],
            cart_count: vec![
                "[data-testhook='basket-count']".into(),
                "[data-testid='navigation-shoppingList'] [class*='badge']".into(),
            ],
            cart_total: vec![
                "[data-testid='navigation-shoppingList']".into(),
                "a[href='/mijnlijst']".into(),
                "a[aria-label*='winkelmand']".into(),
                "a[aria-label*='Totaalbedrag']".into(),
            ],
            add_buttons: vec![
                "button[data-testid='product-plus']".into(),
                "[data-testhook='add-to-cart-button']".into(),
                "button[aria-label*='Product toevoegen']".into(),
            ],
            add_button_labels: vec![
                "+ Los".into(),
                "+ 2 Stuks".into(),
                "+ 6 Stuks".into(),
                "toevoegen".into(),
            ],
            excluded_label: "Kies".into(),
            product_containers: vec![
                "[data-testhook='product-card']".into(),
                "article".into(),
            ],
            search_url: "https://www.ah.nl/zoeken".into(),
            search_query_param: "query".into(),
            search_results: vec![
                "[data-testhook='product-card'] a[href*='/producten/product/']".into(),
                "[data-testid='product-card'] a[href*='/producten/product/']".into(),
                "a[href*='/producten/product/']".into(),
            ],
            overlay_close: vec![
                "button[data-testid='notification-tooltip-close']".into(),
                "button[aria-label='Sluiten']".into(),
                ".notification-tooltip button".into(),
            ],
            product_group: vec![
                "[data-testhook='bonus-product-group']".into(),
                "[data-testhook='promotion-products']".into(),
                ".bonus-product-group".into(),
            ],
            product_group_cards: vec![
                "[data-testhook='product-card']".into(),
                "[data-testhook='promotion-product']".into(),
            ],
            listing: ListingSelectors::default(),
        }
    }
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            card: vec![
                "[data-testhook='promotion-card']".into(),
                "[data-testhook='product-card']".into(),
                "[data-testid='product-card']".into(),
            ],
            title: vec![
                "[data-testhook='promotion-card-title']".into(),
                "[data-testhook*='title']".into(),
                "[data-testhook*='name']".into(),
            ],
            price: "[data-testhook='price']".into(),
            price_now_attribute: "data-testpricenow".into(),
            price_was_attribute: "data-testpricewas".into(),
            price_text: vec![
                "[data-testid='price-amount']".into(),
                "[class*='price-amount']".into(),
            ],
            link: "a[href]".into(),
            tags: vec![
                "[data-testid='product-shield']".into(),
                "[class*='shield']".into(),
            ],
            unavailable: vec![
                "[data-testhook='product-unavailable']".into(),
                "[class*='unavailable']".into(),
            ],
            load_more: vec![
                "//button[contains(text(), 'Meer laden')]".into(),
                "[data-testhook='load-more']".into(),
            ],
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            chrome_path: None,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".into(),
            window_width: 1366,
            window_height: 900,
            idle_timeout_secs: 900,
            action_timeout_ms: 10_000,
            navigation_timeout_ms: 30_000,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            settle_ms: 1_500,
            max_products: 1_000,
        }
    }
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            minimum_total: Decimal::new(5000, 2),
            currency: "EUR".into(),
            retry_budget: 3,
            retry_delay_ms: 500,
            settle_ms: 300,
            confirm_timeout_ms: 3_000,
            total_read_retries: 3,
            top_up_rounds: 3,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/cartwright.db"),
            freshness_hours: 24,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/sessions"),
            profile: "default".into(),
            validity_days: 14,
            login_timeout_secs: 300,
            login_poll_ms: 2_000,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            kind: PlannerKind::Llm,
            endpoint: "https://api.anthropic.com/v1/messages".into(),
            api_key: None,
            api_version: "2023-06-01".into(),
            model: "claude-3-5-sonnet-20241022".into(),
            max_tokens: 4_096,
            timeout_secs: 60,
            max_catalog_items: 400,
            categories: default_categories(),
        }
    }
}

fn default_categories() -> Vec<KeywordCategory> {
    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    vec![
        KeywordCategory {
            name: "meat".into(),
            keywords: words(&[
                "vlees", "kip", "rundvlees", "varken", "worst", "gehakt", "biefstuk", "kipfilet",
                "spek", "ham", "salami", "braadworst", "kalkoen", "lam", "vis", "zalm", "tonijn",
                "kabeljauw",
            ]),
            count: 3,
        },
        KeywordCategory {
            name: "vegetables".into(),
            keywords: words(&[
                "groente", "tomaat", "ui", "wortel", "paprika", "broccoli", "spinazie", "sla",
                "komkommer", "courgette", "aubergine", "prei", "champignons", "rode kool",
                "witte kool", "bloemkool",
            ]),
            count: 5,
        },
        KeywordCategory {
            name: "fruit".into(),
            keywords: words(&[
                "fruit", "appel", "banaan", "sinaasappel", "peer", "druiven", "aardbei",
                "citroen", "kiwi", "ananas", "mango", "avocado", "perzik", "pruim", "kers",
                "frambozen", "bosbessen",
            ]),
            count: 3,
        },
    ]
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "smtp.gmail.com".into(),
            port: 587,
            username: None,
            password: None,
            from_address: None,
            from_name: "Cartwright".into(),
            to_address: None,
            use_tls: true,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Interactive,
            time_budget_secs: 1_800,
            requirement: None,
            requirement_file: None,
            log_dir: PathBuf::from("logs"),
            clear_cache_after_fill: false,
        }
    }
}

pub fn to_selectors(raw: &[String]) -> Vec<Selector> {
    raw.iter().map(|s| Selector::parse(s)).collect()
}

impl CartConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

impl RunConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("CARTWRIGHT").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.browser.chrome_path.is_none() {
            config.browser.chrome_path = env::var("CHROME_PATH").ok();
        }
        if config.planner.api_key.is_none() {
            config.planner.api_key = env::var("ANTHROPIC_API_KEY").ok();
        }
        if env::var("AUTO_MODE").is_ok_and(|v| v.eq_ignore_ascii_case("true")) {
            config.run.mode = RunMode::Auto;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("site.base_url", &self.site.base_url),
            ("site.bonus_url", &self.site.bonus_url),
            ("site.history_url", &self.site.history_url),
            ("site.account_url", &self.site.account_url),
            ("site.cart_url", &self.site.cart_url),
        ] {
            if Url::parse(value).is_err() {
                return Err(ConfigError::Message(format!("Invalid URL in {}", name)));
            }
        }

        if !self.site.search_url.is_empty() && Url::parse(&self.site.search_url).is_err() {
            return Err(ConfigError::Message("Invalid URL in site.search_url".into()));
        }

        if self.site.cart_total.is_empty() {
            return Err(ConfigError::Message("site.cart_total needs at least one selector".into()));
        }
        if self.site.cart_count.is_empty() {
            return Err(ConfigError::Message("site.cart_count needs at least one selector".into()));
        }
        if self.site.add_buttons.is_empty()
            && self.site.add_button_labels.is_empty()
            && self.site.product_containers.is_empty()
        {
            return Err(ConfigError::Message("No add-to-cart strategy has any selector configured".into()));
        }
        if self.site.listing.card.is_empty() {
            return Err(ConfigError::Message("site.listing.card needs at least one selector".into()));
        }

        if self.cart.minimum_total < Decimal::ZERO {
            return Err(ConfigError::Message("cart.minimum_total cannot be negative".into()));
        }
        if self.cart.total_read_retries == 0 {
            return Err(ConfigError::Message("cart.total_read_retries must be greater than 0".into()));
        }

        if self.cache.freshness_hours == 0 {
            return Err(ConfigError::Message("cache.freshness_hours must be greater than 0".into()));
        }

        if self.session.validity_days <= 0 {
            return Err(ConfigError::Message("session.validity_days must be greater than 0".into()));
        }
        if self.session.profile.trim().is_empty() {
            return Err(ConfigError::Message("session.profile cannot be empty".into()));
        }

        if self.planner.kind == PlannerKind::Llm && Url::parse(&self.planner.endpoint).is_err() {
            return Err(ConfigError::Message("Invalid URL in planner.endpoint".into()));
        }
        if self.planner.timeout_secs == 0 {
            return Err(ConfigError::Message("planner.timeout_secs must be greater than 0".into()));
        }

        if self.notifications.smtp.enabled {
            if self.notifications.smtp.port == 0 {
                return Err(ConfigError::Message("SMTP port must be greater than 0".into()));
            }
            if self.notifications.smtp.to_address.is_none() {
                return Err(ConfigError::Message("SMTP notifications need a to_address".into()));
            }
        }

        if self.run.mode.is_auto() && self.run.time_budget_secs == 0 {
            return Err(ConfigError::Message("Auto mode needs a non-zero run.time_budget_secs".into()));
        }

        Ok(())
    }
}
