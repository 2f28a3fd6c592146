pub mod config;
pub mod dedup;
pub mod extractor;
pub mod fetcher;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod relevance;
pub mod scheduler;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use pipeline::Pipeline;
pub use scheduler::{PassScheduler, RunMode, SchedulerState};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
