use std::sync::Arc;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ClosedStoreCheck, ExtractorConfig, ScraperConfig};
use crate::extractor::Extractor;
use crate::gate::ConcurrencyGate;
use crate::models::{FailureReason, Outcome, WorkItem};
use crate::render::{Page, PageGuard, Renderer, SCROLL_TO_BOTTOM};

/// Runs single fetch attempts: one permit, one page, one outcome.
pub struct Fetcher {
    renderer: Arc<dyn Renderer>,
    extractor: Extractor,
    config: ScraperConfig,
    readiness_selector: Option<String>,
    popup_close_selector: Option<String>,
    closed_store_text: String,
}

impl Fetcher {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        extractor: Extractor,
        config: ScraperConfig,
        extractor_config: &ExtractorConfig,
    ) -> Self {
        Self {
            renderer,
            extractor,
            config,
            readiness_selector: extractor_config.readiness_selector.clone(),
            popup_close_selector: extractor_config.popup_close_selector.clone(),
            closed_store_text: extractor_config.closed_store_text.clone(),
        }
    }

    /// One attempt for `item`. Never panics or errors: every failure is folded
    /// into `Outcome::Failed`. The page opened here is closed on every path,
    /// including cancellation, before the permit is given back. A fetch that
    /// is dropped part way leaves the close to its [`PageGuard`].
    pub async fn fetch(
        &self,
        gate: &ConcurrencyGate,
        item: &WorkItem,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Outcome {
        let Some(url) = item.parsed_url() else {
            warn!("Skipping invalid URL: {:?}", item.url);
            return Outcome::Failed(FailureReason::InvalidUrl(item.url.clone()));
        };

        let permit = match timeout_at(deadline, gate.acquire(cancel)).await {
            Ok(Some(permit)) => permit,
            Ok(None) => return Outcome::Failed(FailureReason::Cancelled),
            Err(_) => {
                warn!("No fetch permit before deadline for {}", url);
                return Outcome::Failed(FailureReason::Timeout);
            }
        };

        let outcome = self.attempt(url.as_str(), cancel).await;
        drop(permit);
        outcome
    }

    async fn attempt(&self, url: &str, cancel: &CancellationToken) -> Outcome {
        if !self.config.request_delay_ms.is_zero() {
            let delay = self.config.request_delay_ms.sample();
            debug!("Delay {:?} before request to {}", delay, url);
            tokio::select! {
                _ = cancel.cancelled() => return Outcome::Failed(FailureReason::Cancelled),
                _ = sleep(delay) => {}
            }
        }

        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Failed(FailureReason::Cancelled),
            opened = self.renderer.open_page() => match opened {
                Ok(page) => PageGuard::new(page),
                Err(e) => return Outcome::Failed(FailureReason::PageUnavailable(e.to_string())),
            },
        };

        debug!("Scraping: {}", url);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Failed(FailureReason::Cancelled),
            driven = self.drive(guard.page(), url) => driven.unwrap_or_else(Outcome::Failed),
        };

        // Dropping the guard would close the page too, but in the background
        match timeout(self.config.navigation_timeout(), guard.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close page for {}: {}", url, e),
            Err(_) => warn!("Timed out closing page for {}", url),
        }

        outcome
    }

    async fn drive(&self, page: &dyn Page, url: &str) -> Result<Outcome, FailureReason> {
        let navigation_timeout = self.config.navigation_timeout();
        match timeout(navigation_timeout, page.navigate(url, navigation_timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(FailureReason::Navigation(e.to_string())),
            Err(_) => {
                return Err(FailureReason::Navigation(format!(
                    "timed out after {} ms",
                    self.config.navigation_timeout_ms
                )));
            }
        }

        if self.config.closed_store_check == ClosedStoreCheck::BeforeReadiness
            && self.store_closed(page).await
        {
            warn!("Store closed: {}", url);
            return Ok(Outcome::SkippedClosedStore);
        }

        self.wait_until_ready(page).await?;
        self.dismiss_popup(page).await;

        if self.config.scroll_to_bottom {
            if let Err(e) = page.evaluate(SCROLL_TO_BOTTOM).await {
                debug!("Scroll skipped for {}: {}", url, e);
            }
        }
        if !self.config.settle_delay_ms.is_zero() {
            sleep(self.config.settle_delay_ms.sample()).await;
        }

        if self.config.closed_store_check == ClosedStoreCheck::AfterReadiness
            && self.store_closed(page).await
        {
            warn!("Store closed: {}", url);
            return Ok(Outcome::SkippedClosedStore);
        }

        match timeout(self.config.extraction_timeout(), self.extractor.extract(page)).await {
            Ok(result) => Ok(Outcome::Success(result)),
            Err(_) => Err(FailureReason::ExtractionTimeout),
        }
    }

    /// Polls the readiness selector until it carries text. First paint does
    /// not mean the product title is populated.
    async fn wait_until_ready(&self, page: &dyn Page) -> Result<(), FailureReason> {
        let Some(selector) = self.readiness_selector.as_deref() else {
            return Ok(());
        };
        let poll = self.config.readiness_poll();

        let ready = async {
            loop {
                if let Some(text) = page.inner_text(selector).await {
                    if !text.trim().is_empty() {
                        return;
                    }
                }
                sleep(poll).await;
            }
        };

        timeout(self.config.readiness_timeout(), ready)
            .await
            .map_err(|_| FailureReason::ReadinessTimeout)
    }

    // Best effort: a missing or stubborn overlay is not an error.
    async fn dismiss_popup(&self, page: &dyn Page) {
        let Some(selector) = self.popup_close_selector.as_deref() else {
            return;
        };
        if page.inner_text(selector).await.is_none() {
            return;
        }
        if let Err(e) = page.click(selector).await {
            debug!("Popup dismiss failed: {}", e);
        }
    }

    async fn store_closed(&self, page: &dyn Page) -> bool {
        match page.body_text().await {
            Ok(text) => text.contains(&self.closed_store_text),
            Err(e) => {
                debug!("Could not read body text: {}", e);
                false
            }
        }
    }
}
