use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::models::ProductSource;

/// Stable per-item key, derived from the site's product URL or SKU.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive an identifier from a product URL.
    ///
    /// SKU segments such as `/producten/product/wi123456/ah-halfvolle-melk` win;
    /// otherwise the last non-empty path segment is used.
    pub fn from_url(url: &str) -> Option<Self> {
        static SKU: OnceLock<Regex> = OnceLock::new();
        let sku = SKU.get_or_init(|| Regex::new(r"/(wi\d+)(?:[/?#]|$)").unwrap());

        if let Some(captures) = sku.captures(url) {
            return Some(Self(captures[1].to_string()));
        }

        let path = match url::Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
        };

        path.split('/')
            .filter(|segment| !segment.is_empty())
            .next_back()
            .map(|segment| Self(segment.to_string()))
    }

    /// Fallback identifier for listings without a usable link.
    pub fn from_title(title: &str) -> Self {
        let mut slug = String::with_capacity(title.len());
        for c in title.chars().flat_map(char::to_lowercase) {
            if c.is_alphanumeric() {
                slug.push(c);
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        Self(format!("title:{}", slug.trim_matches('-')))
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub price: Decimal,
    /// Price before the discount, when the listing shows one.
    pub original_price: Option<Decimal>,
    pub currency: String,
    pub discounted: bool,
    pub source: ProductSource,
    pub tags: Vec<String>,
    pub available: bool,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub title: String,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub currency: String,
    pub source: ProductSource,
    pub tags: Vec<String>,
    pub available: bool,
    pub url: Option<String>,
}

impl Product {
    pub fn new(new_product: NewProduct) -> Self {
        let url = new_product.url.unwrap_or_default();
        let id = ProductId::from_url(&url).unwrap_or_else(|| ProductId::from_title(&new_product.title));
        let discounted = new_product.source == ProductSource::Bonus
            || new_product
                .original_price
                .map(|was| was > new_product.price)
                .unwrap_or(false);

        Self {
            id,
            title: new_product.title,
            price: new_product.price,
            original_price: new_product.original_price,
            currency: new_product.currency,
            discounted,
            source: new_product.source,
            tags: new_product.tags,
            available: new_product.available,
            url,
        }
    }

    /// Discount as a whole percentage of the original price.
    pub fn discount_percent(&self) -> Option<u32> {
        use rust_decimal::prelude::ToPrimitive;

        let was = self.original_price?;
        if was <= Decimal::ZERO || was <= self.price {
            return None;
        }
        ((was - self.price) / was * Decimal::ONE_HUNDRED)
            .round()
            .to_u32()
    }

    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.title.to_lowercase().contains(&keyword)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&keyword))
    }
}
