use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::price::PriceParser;
use crate::config::ListingSelectors;
use crate::models::{NewProduct, Product, ProductSource};
use crate::utils::error::AppError;
use crate::Result;

/// Products found in one page snapshot, plus how many cards could not be read.
#[derive(Debug, Clone, Default)]
pub struct ParsedListing {
    pub products: Vec<Product>,
    pub skipped: usize,
}

/// Turns listing HTML into products using configured CSS selectors.
#[derive(Debug, Clone)]
pub struct ListingParser {
    card: Vec<Selector>,
    title: Vec<Selector>,
    price: Selector,
    price_now_attribute: String,
    price_was_attribute: String,
    price_text: Vec<Selector>,
    link: Selector,
    tags: Vec<Selector>,
    unavailable: Vec<Selector>,
    base_url: Url,
    prices: PriceParser,
    currency: String,
}

fn compile(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| AppError::Parse {
        message: format!("invalid CSS selector '{}': {:?}", raw, e),
    })
}

fn compile_all(raw: &[String]) -> Result<Vec<Selector>> {
    raw.iter().map(|s| compile(s)).collect()
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

impl ListingParser {
    pub fn new(selectors: &ListingSelectors, base_url: &str, currency: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| AppError::Parse {
            message: format!("invalid base URL '{}': {}", base_url, e),
        })?;

        Ok(Self {
            card: compile_all(&selectors.card)?,
            title: compile_all(&selectors.title)?,
            price: compile(&selectors.price)?,
            price_now_attribute: selectors.price_now_attribute.clone(),
            price_was_attribute: selectors.price_was_attribute.clone(),
            price_text: compile_all(&selectors.price_text)?,
            link: compile(&selectors.link)?,
            tags: compile_all(&selectors.tags)?,
            unavailable: compile_all(&selectors.unavailable)?,
            base_url,
            prices: PriceParser::new(currency),
            currency: currency.to_string(),
        })
    }

    pub fn parse(&self, html: &str, source: ProductSource) -> ParsedListing {
        let document = Html::parse_document(html);

        // The first card selector that matches anything decides the layout
        let cards: Vec<ElementRef<'_>> = self
            .card
            .iter()
            .map(|selector| document.select(selector).collect::<Vec<_>>())
            .find(|cards| !cards.is_empty())
            .unwrap_or_default();

        let mut listing = ParsedListing::default();
        for card in cards {
            match self.parse_card(card, source) {
                Some(product) => listing.products.push(product),
                None => listing.skipped += 1,
            }
        }
        listing
    }

    fn parse_card(&self, card: ElementRef<'_>, source: ProductSource) -> Option<Product> {
        let title = self
            .title
            .iter()
            .filter_map(|selector| card.select(selector).next())
            .map(text_of)
            .find(|text| !text.is_empty())?;

        let (price, original_price) = self.read_prices(card)?;

        let href = card
            .select(&self.link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .or_else(|| card.value().attr("href"));
        let url = href
            .and_then(|href| self.base_url.join(href).ok())
            .map(|url| url.to_string());

        let mut tags: Vec<String> = Vec::new();
        for selector in &self.tags {
            for element in card.select(selector) {
                let text = text_of(element);
                if !text.is_empty() && !tags.contains(&text) {
                    tags.push(text);
                }
            }
        }

        let available = !self
            .unavailable
            .iter()
            .any(|selector| card.select(selector).next().is_some());

        Some(Product::new(NewProduct {
            title,
            price,
            original_price,
            currency: self.currency.clone(),
            source,
            tags,
            available,
            url,
        }))
    }

    /// Current and pre-discount price; data attributes first, visible text second.
    fn read_prices(&self, card: ElementRef<'_>) -> Option<(Decimal, Option<Decimal>)> {
        if let Some(element) = card.select(&self.price).next() {
            let now = element
                .value()
                .attr(&self.price_now_attribute)
                .and_then(|v| self.prices.parse(v));
            let was = element
                .value()
                .attr(&self.price_was_attribute)
                .and_then(|v| self.prices.parse(v));
            if let Some(now) = now {
                return Some((now, was));
            }
        }

        self.price_text
            .iter()
            .filter_map(|selector| card.select(selector).next())
            .find_map(|element| self.prices.parse(&text_of(element)))
            .map(|now| (now, None))
    }
}
