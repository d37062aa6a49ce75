use serde::{Deserialize, Serialize};

use crate::models::ProductId;

/// One named category of the shopping list, e.g. "meat" or "dairy".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub items: Vec<BucketItem>,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl Bucket {
    pub fn new(name: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            rationale: rationale.into(),
        }
    }

    pub fn with_item(mut self, product_id: ProductId, quantity: u32) -> Self {
        self.items.push(BucketItem {
            product_id,
            quantity,
        });
        self
    }

    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
