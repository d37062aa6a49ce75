use async_trait::async_trait;
use tracing::debug;

use crate::browser::{BrowserDriver, ElementHandle, Selector};
use crate::config::{to_selectors, SiteConfig};
use crate::models::Product;

/// One way of finding the add-to-cart control on a product page.
#[async_trait]
pub trait LocatorStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn locate(&self, driver: &dyn BrowserDriver, product: &Product) -> Option<ElementHandle>;
}

/// Dedicated add buttons, matched by test hooks or aria labels.
pub struct DirectButton {
    selectors: Vec<Selector>,
}

impl DirectButton {
    pub fn new(selectors: Vec<Selector>) -> Self {
        Self { selectors }
    }
}

#[async_trait]
impl LocatorStrategy for DirectButton {
    fn name(&self) -> &str {
        "direct-button"
    }

    async fn locate(&self, driver: &dyn BrowserDriver, _product: &Product) -> Option<ElementHandle> {
        driver.locate_first_of(&self.selectors).await
    }
}

/// Buttons whose text or aria-label carries an add label such as "+ Los".
///
/// Buttons mentioning the excluded label open a unit picker and are skipped.
pub struct TextMatch {
    labels: Vec<String>,
    excluded: String,
}

/// Quote `value` as an XPath string literal.
pub(crate) fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value.split('\'').map(|part| format!("'{}'", part)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

impl TextMatch {
    pub fn new(labels: Vec<String>, excluded: impl Into<String>) -> Self {
        Self {
            labels,
            excluded: excluded.into(),
        }
    }

    pub fn selector_for(label: &str, excluded: &str) -> Selector {
        let label = xpath_literal(label);
        let excluded = xpath_literal(excluded);
        Selector::xpath(format!(
            "//button[(contains(normalize-space(.), {label}) or contains(@aria-label, {label})) \
             and not(contains(., {excluded})) and not(contains(@aria-label, {excluded}))]"
        ))
    }

    async fn is_excluded(&self, driver: &dyn BrowserDriver, handle: &ElementHandle) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        let text = driver.read_text(handle).await.unwrap_or_default();
        let aria = driver
            .read_attribute(handle, "aria-label")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        text.contains(&self.excluded) || aria.contains(&self.excluded)
    }
}

#[async_trait]
impl LocatorStrategy for TextMatch {
    fn name(&self) -> &str {
        "text-match"
    }

    async fn locate(&self, driver: &dyn BrowserDriver, _product: &Product) -> Option<ElementHandle> {
        for label in &self.labels {
            let selector = Self::selector_for(label, &self.excluded);
            let Ok(handle) = driver.locate(&selector).await else {
                continue;
            };
            if self.is_excluded(driver, &handle).await {
                debug!(label = %label, "Skipping unit picker button");
                continue;
            }
            return Some(handle);
        }
        None
    }
}

/// Last button inside the product container; the add control sits at the end of the card.
pub struct StructuralPosition {
    containers: Vec<Selector>,
}

impl StructuralPosition {
    pub fn new(containers: Vec<Selector>) -> Self {
        Self { containers }
    }

    pub fn selector_for(container: &Selector) -> Selector {
        match container {
            Selector::Css(query) => Selector::css(format!("{} button", query)),
            Selector::XPath(query) => Selector::xpath(format!("{}//button", query)),
        }
    }
}

#[async_trait]
impl LocatorStrategy for StructuralPosition {
    fn name(&self) -> &str {
        "structural-position"
    }

    async fn locate(&self, driver: &dyn BrowserDriver, _product: &Product) -> Option<ElementHandle> {
        for container in &self.containers {
            let selector = Self::selector_for(container);
            if let Ok(mut buttons) = driver.locate_all(&selector).await {
                if let Some(last) = buttons.pop() {
                    return Some(last);
                }
            }
        }
        None
    }
}

/// First product on a bonus page that groups several products under one offer.
///
/// Only answers on group pages, so ordinary product pages fall through to the
/// other strategies.
pub struct ProductGroup {
    markers: Vec<Selector>,
    cards: Vec<Selector>,
}

impl ProductGroup {
    pub fn new(markers: Vec<Selector>, cards: Vec<Selector>) -> Self {
        Self { markers, cards }
    }
}

#[async_trait]
impl LocatorStrategy for ProductGroup {
    fn name(&self) -> &str {
        "product-group"
    }

    async fn locate(&self, driver: &dyn BrowserDriver, product: &Product) -> Option<ElementHandle> {
        driver.locate_first_of(&self.markers).await?;
        for card in &self.cards {
            let selector = StructuralPosition::selector_for(card);
            if let Ok(buttons) = driver.locate_all(&selector).await {
                if let Some(first) = buttons.into_iter().next() {
                    debug!(product_id = %product.id, "Picking the first product of a bonus group");
                    return Some(first);
                }
            }
        }
        None
    }
}

/// Strategies in priority order; ones without configured selectors are left out.
pub fn default_strategies(site: &SiteConfig) -> Vec<Box<dyn LocatorStrategy>> {
    let mut strategies: Vec<Box<dyn LocatorStrategy>> = Vec::new();
    if !site.product_group.is_empty() && !site.product_group_cards.is_empty() {
        strategies.push(Box::new(ProductGroup::new(
            to_selectors(&site.product_group),
            to_selectors(&site.product_group_cards),
        )));
    }
    if !site.add_buttons.is_empty() {
        strategies.push(Box::new(DirectButton::new(to_selectors(&site.add_buttons))));
    }
    if !site.add_button_labels.is_empty() {
        strategies.push(Box::new(TextMatch::new(
            site.add_button_labels.clone(),
            site.excluded_label.clone(),
        )));
    }
    if !site.product_containers.is_empty() {
        strategies.push(Box::new(StructuralPosition::new(to_selectors(
            &site.product_containers,
        ))));
    }
    strategies
}
