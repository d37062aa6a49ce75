pub mod manager;
pub mod notifiers;
pub mod planners;
pub mod traits;

pub use manager::PluginManager;
pub use traits::{validate_buckets, BucketPlanner, NotifierPlugin};
