use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ProductId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LineOutcome {
    Added,
    Failed,
    SkippedDuplicate,
}

/// Why a line was attempted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LineOrigin {
    Planned,
    TopUp,
}

/// Outcome of one add-to-cart request. Lines are append-only within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartLineResult {
    pub product_id: ProductId,
    pub title: String,
    pub quantity: u32,
    /// Strategy that confirmed the add, or the last one tried.
    pub strategy: Option<String>,
    pub outcome: LineOutcome,
    pub failure_reason: Option<String>,
    pub attempts: u32,
    pub origin: LineOrigin,
    pub timestamp: DateTime<Utc>,
}

impl CartLineResult {
    pub fn added(
        product_id: ProductId,
        title: impl Into<String>,
        quantity: u32,
        strategy: impl Into<String>,
        attempts: u32,
        origin: LineOrigin,
    ) -> Self {
        Self {
            product_id,
            title: title.into(),
            quantity,
            strategy: Some(strategy.into()),
            outcome: LineOutcome::Added,
            failure_reason: None,
            attempts,
            origin,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        product_id: ProductId,
        title: impl Into<String>,
        quantity: u32,
        strategy: Option<String>,
        reason: impl Into<String>,
        attempts: u32,
        origin: LineOrigin,
    ) -> Self {
        Self {
            product_id,
            title: title.into(),
            quantity,
            strategy,
            outcome: LineOutcome::Failed,
            failure_reason: Some(reason.into()),
            attempts,
            origin,
            timestamp: Utc::now(),
        }
    }

    pub fn skipped_duplicate(
        product_id: ProductId,
        title: impl Into<String>,
        quantity: u32,
        origin: LineOrigin,
    ) -> Self {
        Self {
            product_id,
            title: title.into(),
            quantity,
            strategy: None,
            outcome: LineOutcome::SkippedDuplicate,
            failure_reason: None,
            attempts: 0,
            origin,
            timestamp: Utc::now(),
        }
    }

    pub fn is_added(&self) -> bool {
        self.outcome == LineOutcome::Added
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == LineOutcome::Failed
    }
}

/// The threshold monitor's view of the cart.
///
/// `total` always comes from reading the live cart, never from planned prices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartState {
    pub total: Decimal,
    pub currency: String,
    pub lines_added: usize,
    pub lines_failed: usize,
}

impl CartState {
    pub fn empty(currency: impl Into<String>) -> Self {
        Self {
            total: Decimal::ZERO,
            currency: currency.into(),
            lines_added: 0,
            lines_failed: 0,
        }
    }

    pub fn observed(total: Decimal, currency: impl Into<String>, lines: &[CartLineResult]) -> Self {
        Self {
            total,
            currency: currency.into(),
            lines_added: lines.iter().filter(|l| l.is_added()).count(),
            lines_failed: lines.iter().filter(|l| l.is_failed()).count(),
        }
    }

    /// Amount still missing to reach `minimum`; zero when already met.
    pub fn shortfall(&self, minimum: Decimal) -> Decimal {
        (minimum - self.total).max(Decimal::ZERO)
    }
}
