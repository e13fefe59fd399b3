use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Invalid cell reference: {reference}")]
    InvalidCell { reference: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by a render backend. They never cross the fetch task
/// boundary: the fetcher classifies them into a `FailureReason`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Failed to open page: {0}")]
    OpenPage(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Page is closed")]
    Closed,

    #[error("Render worker failed: {0}")]
    Worker(String),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
