use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::notifiers::EmailNotifier;
use super::traits::NotifierPlugin;
use crate::config::AppConfig;
use crate::models::RunSummary;
use crate::Result;

pub type NotifierPluginBox = Box<dyn NotifierPlugin>;

/// Registry of notification channels a finished run is reported to.
#[derive(Clone)]
pub struct PluginManager {
    notifiers: Arc<RwLock<HashMap<String, NotifierPluginBox>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            notifiers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Manager with every notifier enabled in the configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let manager = Self::new();
        if config.notifications.smtp.enabled {
            let email = EmailNotifier::new(config.notifications.smtp.clone(), &config.site.cart_url)?;
            manager.register_notifier(Box::new(email)).await;
        }
        Ok(manager)
    }

    pub async fn register_notifier(&self, plugin: NotifierPluginBox) {
        let plugin_type = plugin.plugin_type().to_string();
        let mut notifiers = self.notifiers.write().await;
        notifiers.insert(plugin_type, plugin);
    }

    pub async fn has_notifier(&self, plugin_type: &str) -> bool {
        let notifiers = self.notifiers.read().await;
        notifiers.contains_key(plugin_type)
    }

    pub async fn list_notifier_types(&self) -> Vec<String> {
        let notifiers = self.notifiers.read().await;
        let mut types: Vec<String> = notifiers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Hand the summary to every notifier. Failures are logged and otherwise ignored.
    ///
    /// Returns how many notifiers delivered.
    pub async fn notify_all(&self, summary: &RunSummary) -> usize {
        let notifiers = self.notifiers.read().await;
        let mut delivered = 0;
        for (plugin_type, notifier) in notifiers.iter() {
            match notifier.notify(summary).await {
                Ok(()) => {
                    delivered += 1;
                    info!(notifier = %plugin_type, "Run summary delivered");
                }
                Err(e) => warn!(notifier = %plugin_type, "Could not deliver run summary: {}", e),
            }
        }
        delivered
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}
