pub mod cancel;
pub mod error;

pub use cancel::Cancellation;
pub use error::{AppError, DriverError, ScrapeError};
