use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PlannerConfig;
use crate::models::{Bucket, Product, ProductId, ProductSource};
use crate::plugins::traits::BucketPlanner;
use crate::utils::error::AppError;
use crate::Result;

const DEFAULT_REQUIREMENT: &str =
    "Buy healthy ingredients for a week, including meat, vegetables, fruits, and essentials";
const MAX_ITEMS_PER_BUCKET: usize = 10;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Shape the model is asked to answer with.
#[derive(Debug, Deserialize)]
struct PlanDocument {
    buckets: Vec<PlannedBucket>,
}

#[derive(Debug, Deserialize)]
struct PlannedBucket {
    name: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    items: Vec<PlannedItem>,
}

#[derive(Debug, Deserialize)]
struct PlannedItem {
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default = "one")]
    quantity: u32,
}

fn one() -> u32 {
    1
}

/// Requirement text split into free-form wishes and items that must be bought.
///
/// Recognizes the "Shopping Requirements:" / "Must-buy Items:" layout; anything
/// else is all requirements.
#[derive(Debug, Default, PartialEq)]
pub struct Requirement {
    pub wishes: String,
    pub must_buy: String,
}

impl Requirement {
    pub fn parse(raw: &str) -> Self {
        const WISHES: &str = "Shopping Requirements:";
        const MUST_BUY: &str = "Must-buy Items:";

        if !raw.contains(WISHES) && !raw.contains(MUST_BUY) {
            return Self {
                wishes: raw.trim().to_string(),
                must_buy: String::new(),
            };
        }

        let mut wishes = Vec::new();
        let mut must_buy = Vec::new();
        let mut section: Option<&mut Vec<String>> = None;
        for line in raw.lines() {
            if let Some((_, rest)) = line.split_once(WISHES) {
                section = Some(&mut wishes);
                push_non_empty(section.as_deref_mut(), rest);
            } else if let Some((_, rest)) = line.split_once(MUST_BUY) {
                section = Some(&mut must_buy);
                push_non_empty(section.as_deref_mut(), rest);
            } else {
                push_non_empty(section.as_deref_mut(), line);
            }
        }

        Self {
            wishes: wishes.join("\n"),
            must_buy: must_buy.join("\n"),
        }
    }
}

fn push_non_empty(section: Option<&mut Vec<String>>, line: &str) {
    let line = line.trim();
    if let Some(lines) = section {
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
}

/// Planner backed by an Anthropic-style messages endpoint.
pub struct LlmPlanner {
    client: Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    model: String,
    max_tokens: u32,
    max_catalog_items: usize,
}

impl LlmPlanner {
    pub fn new(config: &PlannerConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
            api_version: config.api_version.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_catalog_items: config.max_catalog_items,
        })
    }

    fn build_prompt(&self, catalog: &[Product], requirement: &str, history: &[Product]) -> String {
        let requirement = Requirement::parse(requirement);
        let bought: HashSet<&ProductId> = history.iter().map(|p| &p.id).collect();

        let mut prompt = String::from(
            "You are a grocery shopping assistant. Group products from the catalog below into \
             buckets (for example essentials, meat, vegetables, fruit, snacks, beverages, other) \
             that satisfy the shopper's requirements.\n\n\
             Rules:\n\
             - Prefer BONUS (discounted) products; use HISTORY products only when no bonus product fits.\n\
             - Only use product ids that appear in the catalog.\n",
        );
        let _ = writeln!(prompt, "- At most {} products per bucket.\n", MAX_ITEMS_PER_BUCKET);

        prompt.push_str("Catalog (id | title | price | source | tags):\n");
        for product in catalog.iter().take(self.max_catalog_items) {
            let source = match product.source {
                ProductSource::Bonus => "BONUS",
                ProductSource::History if bought.contains(&product.id) => "HISTORY (bought before)",
                ProductSource::History => "HISTORY",
            };
            let _ = writeln!(
                prompt,
                "{} | {} | {} {} | {} | {}",
                product.id,
                product.title,
                product.price,
                product.currency,
                source,
                product.tags.join(", ")
            );
        }

        let wishes = if requirement.wishes.is_empty() {
            DEFAULT_REQUIREMENT
        } else {
            requirement.wishes.as_str()
        };
        let _ = write!(prompt, "\nShopper requirements:\n{}\n", wishes);
        if !requirement.must_buy.is_empty() {
            let _ = write!(
                prompt,
                "\nThese items MUST be in the list, matched as closely as the catalog allows:\n{}\n",
                requirement.must_buy
            );
        }

        prompt.push_str(
            "\nAnswer with JSON only, in this shape:\n\
             {\"buckets\": [{\"name\": \"meat\", \"rationale\": \"why\", \
             \"items\": [{\"product_id\": \"wi123\", \"quantity\": 1}]}]}\n",
        );
        prompt
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Planner(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(AppError::Planner(format!("service answered {}: {}", status, snippet)));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AppError::Planner(format!("unreadable response: {}", e)))?;
        let text: String = body.content.into_iter().filter_map(|block| block.text).collect();
        if text.trim().is_empty() {
            return Err(AppError::Planner("empty response".to_string()));
        }
        Ok(text)
    }
}

/// The outermost JSON object in `text`, tolerating prose or code fences around it.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Resolve an item by id, or by a title that contains or is contained in a catalog title.
fn resolve_item<'a>(item: &PlannedItem, catalog: &'a [Product]) -> Option<&'a Product> {
    if let Some(id) = item.product_id.as_deref() {
        if let Some(product) = catalog.iter().find(|p| p.id.as_str() == id) {
            return Some(product);
        }
    }
    let title = item.title.as_deref()?.trim().to_lowercase();
    if title.is_empty() {
        return None;
    }
    catalog.iter().find(|p| {
        let candidate = p.title.to_lowercase();
        candidate.contains(&title) || title.contains(&candidate)
    })
}

fn to_buckets(document: PlanDocument, catalog: &[Product]) -> Vec<Bucket> {
    let mut buckets = Vec::with_capacity(document.buckets.len());
    for planned in document.buckets {
        let mut bucket = Bucket::new(planned.name, planned.rationale);
        for item in &planned.items {
            match resolve_item(item, catalog) {
                Some(product) => {
                    bucket = bucket.with_item(product.id.clone(), item.quantity);
                }
                None => {
                    // Kept as-is; validation drops it with a warning
                    let raw = item
                        .product_id
                        .clone()
                        .or_else(|| item.title.clone())
                        .unwrap_or_default();
                    bucket = bucket.with_item(ProductId::new(raw), item.quantity);
                }
            }
        }
        buckets.push(bucket);
    }
    buckets
}

#[async_trait]
impl BucketPlanner for LlmPlanner {
    fn name(&self) -> &str {
        "llm"
    }

    async fn plan(&self, catalog: &[Product], requirement: &str, history: &[Product]) -> Result<Vec<Bucket>> {
        if catalog.is_empty() {
            return Err(AppError::Planner("catalog is empty".to_string()));
        }
        if catalog.len() > self.max_catalog_items {
            warn!(
                catalog = catalog.len(),
                sent = self.max_catalog_items,
                "Catalog truncated for the planner"
            );
        }

        let prompt = self.build_prompt(catalog, requirement, history);
        debug!(model = %self.model, prompt_chars = prompt.len(), "Requesting shopping plan");
        let text = self.complete(prompt).await?;

        let json = extract_json(&text)
            .ok_or_else(|| AppError::Planner("response contains no JSON object".to_string()))?;
        let document: PlanDocument = serde_json::from_str(json)
            .map_err(|e| AppError::Planner(format!("response is not a bucket document: {}", e)))?;

        let buckets = to_buckets(document, catalog);
        info!(buckets = buckets.len(), "Received shopping plan");
        Ok(buckets)
    }
}
