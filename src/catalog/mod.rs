pub mod cache;
pub mod discovery;
pub mod listing;
pub mod price;

pub use cache::ProductCache;
pub use discovery::CatalogScraper;
pub use listing::{ListingParser, ParsedListing};
pub use price::PriceParser;

use std::collections::HashSet;

use crate::models::Product;

/// One catalog from both listings. A product on both keeps its discount record.
pub fn merge_catalog(bonus: Vec<Product>, history: Vec<Product>) -> Vec<Product> {
    let mut seen: HashSet<_> = bonus.iter().map(|p| p.id.clone()).collect();
    let mut merged = bonus;
    merged.extend(history.into_iter().filter(|p| seen.insert(p.id.clone())));
    merged
}
