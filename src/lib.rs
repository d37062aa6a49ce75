pub mod browser;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod plugins;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use orchestrator::{RunOrchestrator, RunPhase};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
