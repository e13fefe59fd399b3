use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Page, Renderer};
use crate::config::ScraperConfig;
use crate::utils::RenderError;

/// Fetches server-rendered HTML and answers selector queries against it.
/// No scripts run, so it only suits pages whose product data is in the markup.
pub struct HttpRenderer {
    client: Client,
}

pub struct HttpPage {
    client: Client,
    document: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl HttpRenderer {
    pub fn new(config: &ScraperConfig) -> Result<Self, RenderError> {
        let mut builder = Client::builder();
        if let Some(ua) = config.pick_user_agent() {
            tracing::info!("Using user agent: {}", ua);
            builder = builder.user_agent(ua);
        }
        let client = builder
            .build()
            .map_err(|e| RenderError::Launch(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn open_page(&self) -> Result<Box<dyn Page>, RenderError> {
        Ok(Box::new(HttpPage::new(self.client.clone())))
    }
}

impl HttpPage {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            document: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// A page already holding `html`, as if it had been navigated to.
    #[cfg(test)]
    pub(crate) fn from_html(html: impl Into<String>) -> Self {
        let page = Self::new(Client::new());
        if let Ok(mut document) = page.document.lock() {
            *document = Some(html.into());
        }
        page
    }

    fn with_document<T>(&self, f: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let document = self.document.lock().ok()?;
        f(document.as_deref()?)
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), RenderError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RenderError::Closed);
        }

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?
            .error_for_status()
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        let html = response
            .text()
            .await
            .map_err(|e| RenderError::Navigation(format!("failed to read body: {}", e)))?;

        let mut document = self
            .document
            .lock()
            .map_err(|_| RenderError::Worker("document lock poisoned".to_string()))?;
        *document = Some(html);
        Ok(())
    }

    async fn inner_text(&self, selector: &str) -> Option<String> {
        self.with_document(|html| select_text(html, selector))
    }

    async fn body_text(&self) -> Result<String, RenderError> {
        self.with_document(|html| Some(select_text(html, "body").unwrap_or_default()))
            .ok_or(RenderError::Closed)
    }

    async fn click(&self, _selector: &str) -> Result<(), RenderError> {
        Err(RenderError::Unsupported("click"))
    }

    async fn evaluate(&self, _script: &str) -> Result<(), RenderError> {
        Err(RenderError::Unsupported("script evaluation"))
    }

    async fn close(&self) -> Result<(), RenderError> {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut document) = self.document.lock() {
            document.take();
        }
        Ok(())
    }
}

/// Whitespace-collapsed text of the first element matching `selector`.
pub fn select_text(html: &str, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);
    let element = document.select(&selector).next()?;
    let text = element.text().collect::<Vec<_>>().join(" ");
    Some(text.split_whitespace().collect::<Vec<_>>().join(" "))
}
