pub mod error;

pub use error::{AppError, RenderError, Result};
