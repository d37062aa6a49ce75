pub mod keyword;
pub mod llm;

pub use keyword::KeywordPlanner;
pub use llm::LlmPlanner;

use std::sync::Arc;
use tracing::warn;

use crate::config::{PlannerConfig, PlannerKind};
use crate::plugins::traits::BucketPlanner;
use crate::Result;

/// The configured planner. An LLM planner without an API key degrades to keywords.
pub fn from_config(config: &PlannerConfig) -> Result<Arc<dyn BucketPlanner>> {
    match (&config.kind, &config.api_key) {
        (PlannerKind::Llm, Some(key)) => Ok(Arc::new(LlmPlanner::new(config, key.clone())?)),
        (PlannerKind::Llm, None) => {
            warn!("No planner API key configured, using the keyword planner");
            Ok(Arc::new(KeywordPlanner::new(config.categories.clone())))
        }
        (PlannerKind::Keyword, _) => Ok(Arc::new(KeywordPlanner::new(config.categories.clone()))),
    }
}
