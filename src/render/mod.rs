//! Page rendering backends.
//!
//! The fetcher only talks to [`Renderer`] and [`Page`]; which engine sits
//! behind them is a configuration choice.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RendererKind, ScraperConfig};
use crate::utils::RenderError;

pub mod chrome;
pub mod http;

pub use chrome::ChromeRenderer;
pub use http::HttpRenderer;

/// Scrolls to the end of the document so lazily loaded content renders.
pub const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// One open page (browser tab or fetched document).
#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), RenderError>;

    /// Visible text of the first element matching `selector`, `None` when absent.
    async fn inner_text(&self, selector: &str) -> Option<String>;

    /// Text of the whole document body.
    async fn body_text(&self) -> Result<String, RenderError>;

    async fn click(&self, selector: &str) -> Result<(), RenderError>;

    async fn evaluate(&self, script: &str) -> Result<(), RenderError>;

    /// Release the page. Safe to call more than once.
    async fn close(&self) -> Result<(), RenderError>;
}

/// Owns an open page until it is closed.
///
/// Dropping the guard while the page is still open (an aborted task, a
/// dropped batch future, a panic) schedules `close` on the runtime.
pub struct PageGuard {
    page: Arc<dyn Page>,
    closed: bool,
}

impl PageGuard {
    pub fn new(page: Box<dyn Page>) -> Self {
        Self {
            page: Arc::from(page),
            closed: false,
        }
    }

    pub fn page(&self) -> &dyn Page {
        self.page.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn close(&mut self) -> Result<(), RenderError> {
        if self.closed {
            return Ok(());
        }
        let result = self.page.close().await;
        self.closed = true;
        result
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let page = Arc::clone(&self.page);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::warn!("Failed to close abandoned page: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("Page dropped outside the runtime, left open"),
        }
    }
}

/// Shared session that hands out pages.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn Page>, RenderError>;
}

pub fn build_renderer(config: &ScraperConfig) -> Result<Arc<dyn Renderer>, RenderError> {
    let renderer: Arc<dyn Renderer> = match config.renderer {
        RendererKind::Chrome => Arc::new(ChromeRenderer::new(config)?),
        RendererKind::Http => Arc::new(HttpRenderer::new(config)?),
    };
    Ok(renderer)
}
