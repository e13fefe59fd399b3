use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Page, Renderer};
use crate::config::ScraperConfig;
use crate::utils::RenderError;

/// Headless Chrome session shared by every fetch task of a run.
pub struct ChromeRenderer {
    browser: Browser,
    user_agent: Option<String>,
}

pub struct ChromePage {
    tab: Arc<Tab>,
    closed: AtomicBool,
}

impl ChromeRenderer {
    pub fn new(config: &ScraperConfig) -> Result<Self, RenderError> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false) // Often needed in containerized environments
            .window_size(Some((config.viewport_width, config.viewport_height)))
            .args(vec![
                std::ffi::OsStr::new("--no-sandbox"),
                std::ffi::OsStr::new("--disable-dev-shm-usage"),
                std::ffi::OsStr::new("--disable-gpu"),
                std::ffi::OsStr::new("--disable-extensions"),
                std::ffi::OsStr::new("--disable-background-timer-throttling"),
                std::ffi::OsStr::new("--disable-backgrounding-occluded-windows"),
                std::ffi::OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| RenderError::Launch(format!("invalid launch options: {}", e)))?;

        // Set Chrome path if provided
        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options).map_err(|e| RenderError::Launch(e.to_string()))?;

        let user_agent = config.pick_user_agent().map(str::to_string);
        if let Some(ua) = &user_agent {
            tracing::info!("Using user agent: {}", ua);
        }

        Ok(Self { browser, user_agent })
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn open_page(&self) -> Result<Box<dyn Page>, RenderError> {
        let browser = self.browser.clone();
        let user_agent = self.user_agent.clone();

        let tab = blocking(move || {
            let tab = browser
                .new_tab()
                .map_err(|e| RenderError::OpenPage(e.to_string()))?;
            if let Some(ua) = user_agent {
                tab.set_user_agent(&ua, None, None)
                    .map_err(|e| RenderError::OpenPage(format!("failed to set user agent: {}", e)))?;
            }
            Ok(tab)
        })
        .await?;

        Ok(Box::new(ChromePage {
            tab,
            closed: AtomicBool::new(false),
        }))
    }
}

impl ChromePage {
    fn tab(&self) -> Result<Arc<Tab>, RenderError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RenderError::Closed);
        }
        Ok(Arc::clone(&self.tab))
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), RenderError> {
        let tab = self.tab()?;
        let url = url.to_string();
        blocking(move || {
            // Bound the blocking wait as well, the caller's timeout only abandons it
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)
                .map_err(|e| RenderError::Navigation(e.to_string()))?;
            tab.wait_until_navigated()
                .map_err(|e| RenderError::Navigation(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn inner_text(&self, selector: &str) -> Option<String> {
        let tab = self.tab().ok()?;
        let selector = selector.to_string();
        blocking(move || {
            let element = tab
                .find_element(&selector)
                .map_err(|_| RenderError::ElementNotFound { selector: selector.clone() })?;
            element
                .get_inner_text()
                .map_err(|_| RenderError::ElementNotFound { selector })
        })
        .await
        .ok()
    }

    async fn body_text(&self) -> Result<String, RenderError> {
        let tab = self.tab()?;
        blocking(move || {
            tab.find_element("body")
                .and_then(|body| body.get_inner_text())
                .map_err(|e| RenderError::Script(format!("failed to read body text: {}", e)))
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<(), RenderError> {
        let tab = self.tab()?;
        let selector = selector.to_string();
        blocking(move || {
            let element = tab
                .find_element(&selector)
                .map_err(|_| RenderError::ElementNotFound { selector: selector.clone() })?;
            element
                .click()
                .map_err(|e| RenderError::Script(format!("click on '{}' failed: {}", selector, e)))?;
            Ok(())
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<(), RenderError> {
        let tab = self.tab()?;
        let script = script.to_string();
        blocking(move || {
            tab.evaluate(&script, false)
                .map_err(|e| RenderError::Script(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), RenderError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let tab = Arc::clone(&self.tab);
        blocking(move || {
            tab.close(true)
                .map_err(|e| RenderError::Script(format!("failed to close tab: {}", e)))?;
            Ok(())
        })
        .await
    }
}

// headless_chrome is synchronous; keep its calls off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, RenderError>
where
    F: FnOnce() -> Result<T, RenderError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RenderError::Worker(e.to_string()))?
}
