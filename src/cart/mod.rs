pub mod executor;
pub mod monitor;
pub mod strategies;

pub use executor::{title_link, CartExecutor, ExecutorSettings, SearchSettings};
pub use monitor::ThresholdMonitor;
pub use strategies::{default_strategies, DirectButton, LocatorStrategy, ProductGroup, StructuralPosition, TextMatch};
