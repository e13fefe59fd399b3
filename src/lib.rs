pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod gate;
pub mod models;
pub mod render;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use utils::error::{AppError, RenderError};
pub use utils::Result;
