pub mod notifier;
pub mod planner;

pub use notifier::NotifierPlugin;
pub use planner::{validate_buckets, BucketPlanner};
