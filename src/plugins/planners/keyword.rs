use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

use crate::config::KeywordCategory;
use crate::models::{Bucket, Product, ProductId};
use crate::plugins::traits::BucketPlanner;
use crate::utils::error::AppError;
use crate::Result;

const REQUESTED_BUCKET: &str = "requested";
const MIN_WORD_LEN: usize = 3;
const STOP_WORDS: [&str; 12] = [
    "and", "the", "for", "with", "some", "week", "voor", "met", "een", "van", "het", "wat",
];

/// Offline planner: requirement words first, then a fixed number of products per
/// keyword category. Discounted and previously bought products are preferred,
/// cheaper before dearer.
pub struct KeywordPlanner {
    categories: Vec<KeywordCategory>,
}

impl KeywordPlanner {
    pub fn new(categories: Vec<KeywordCategory>) -> Self {
        Self { categories }
    }

    fn requirement_words(requirement: &str) -> Vec<String> {
        let mut words: Vec<String> = Vec::new();
        for word in requirement
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
        {
            if word.chars().count() >= MIN_WORD_LEN
                && !STOP_WORDS.contains(&word.as_str())
                && !words.contains(&word)
            {
                words.push(word);
            }
        }
        words
    }

    fn ranked<'a>(catalog: &'a [Product], history: &[Product]) -> Vec<&'a Product> {
        let bought: HashSet<&ProductId> = history.iter().map(|p| &p.id).collect();
        let mut ranked: Vec<&Product> = catalog.iter().filter(|p| p.available).collect();
        ranked.sort_by(|a, b| {
            (!a.discounted, !bought.contains(&a.id), a.price, &a.id).cmp(&(
                !b.discounted,
                !bought.contains(&b.id),
                b.price,
                &b.id,
            ))
        });
        ranked
    }
}

#[async_trait]
impl BucketPlanner for KeywordPlanner {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn plan(&self, catalog: &[Product], requirement: &str, history: &[Product]) -> Result<Vec<Bucket>> {
        let ranked = Self::ranked(catalog, history);
        let mut used: HashSet<&ProductId> = HashSet::new();
        let mut buckets = Vec::new();

        let words = Self::requirement_words(requirement);
        let mut requested = Bucket::new(REQUESTED_BUCKET, format!("matches for: {}", words.join(", ")));
        for word in &words {
            if let Some(product) = ranked
                .iter()
                .find(|p| !used.contains(&p.id) && p.matches_keyword(word))
            {
                used.insert(&product.id);
                requested = requested.with_item(product.id.clone(), 1);
            }
        }
        if !requested.is_empty() {
            buckets.push(requested);
        }

        for category in &self.categories {
            let mut bucket = Bucket::new(
                &category.name,
                format!("up to {} products matching {} keywords", category.count, category.name),
            );
            for product in &ranked {
                if bucket.items.len() >= category.count {
                    break;
                }
                if used.contains(&product.id) {
                    continue;
                }
                if category.keywords.iter().any(|k| product.matches_keyword(k)) {
                    used.insert(&product.id);
                    bucket = bucket.with_item(product.id.clone(), 1);
                }
            }
            debug!(category = %category.name, items = bucket.items.len(), "Filled keyword bucket");
            if !bucket.is_empty() {
                buckets.push(bucket);
            }
        }

        if buckets.is_empty() {
            return Err(AppError::Planner(format!(
                "none of {} catalog products matched the requirement or any category",
                catalog.len()
            )));
        }
        Ok(buckets)
    }
}
