use async_trait::async_trait;
use std::collections::HashSet;

use crate::models::{Bucket, Product, ProductId};
use crate::Result;

/// Turns a catalog and a free-text requirement into a categorized shopping list.
///
/// Implementations are best-effort and need not be deterministic. They never
/// touch the browser or the cart.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BucketPlanner: Send + Sync {
    fn name(&self) -> &str;

    /// `history` holds previously bought products and may be empty.
    async fn plan(&self, catalog: &[Product], requirement: &str, history: &[Product]) -> Result<Vec<Bucket>>;
}

/// Drop items that reference unknown products or ask for nothing, and empty buckets.
///
/// Returns the cleaned buckets plus one warning per dropped item.
pub fn validate_buckets(buckets: Vec<Bucket>, catalog: &[Product]) -> (Vec<Bucket>, Vec<String>) {
    let known: HashSet<&ProductId> = catalog.iter().map(|p| &p.id).collect();
    let mut warnings = Vec::new();
    let mut cleaned = Vec::with_capacity(buckets.len());

    for mut bucket in buckets {
        let name = bucket.name.clone();
        bucket.items.retain(|item| {
            if !known.contains(&item.product_id) {
                warnings.push(format!("bucket '{}': unknown product {}", name, item.product_id));
                false
            } else if item.quantity == 0 {
                warnings.push(format!("bucket '{}': zero quantity for {}", name, item.product_id));
                false
            } else {
                true
            }
        });
        if !bucket.is_empty() {
            cleaned.push(bucket);
        }
    }

    (cleaned, warnings)
}
