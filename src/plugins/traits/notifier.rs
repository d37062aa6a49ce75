use async_trait::async_trait;

use crate::models::RunSummary;
use crate::Result;

/// Delivers a finished run's summary somewhere a person will see it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotifierPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn plugin_type(&self) -> &str;

    async fn notify(&self, summary: &RunSummary) -> Result<()>;
}
