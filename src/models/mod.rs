use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod bucket;
pub mod cart;
pub mod product;
pub mod run;
pub mod session;

// Re-exports for convenience
pub use bucket::*;
pub use cart::*;
pub use product::*;
pub use run::*;
pub use session::*;

/// Where a product record was scraped from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProductSource {
    /// Current discount listing.
    Bonus,
    /// The shopper's purchase history.
    History,
}

impl ProductSource {
    pub const ALL: [ProductSource; 2] = [ProductSource::Bonus, ProductSource::History];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductSource::Bonus => "bonus",
            ProductSource::History => "history",
        }
    }
}

impl fmt::Display for ProductSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bonus" => Ok(ProductSource::Bonus),
            "history" | "eerder-gekocht" => Ok(ProductSource::History),
            other => Err(format!("unknown product source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// A human is at the keyboard and can log in when asked.
    #[default]
    Interactive,
    /// Unattended: never blocks on human input.
    Auto,
}

impl RunMode {
    pub fn is_auto(&self) -> bool {
        matches!(self, RunMode::Auto)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Interactive => f.write_str("interactive"),
            RunMode::Auto => f.write_str("auto"),
        }
    }
}
