use config::{Config, ConfigError, Environment, File};
use rand::Rng;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::SheetLayout;
use crate::sink::CellRef;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub scheduler: SchedulerConfig,
    pub extractor: ExtractorConfig,
    pub sheet: SheetConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    /// Headless Chrome, runs page scripts.
    Chrome,
    /// Plain HTTP fetch, selectors evaluated against the served HTML.
    Http,
}

/// Where the closed-store marker is looked for relative to the readiness wait.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClosedStoreCheck {
    BeforeReadiness,
    AfterReadiness,
}

/// Inclusive range of milliseconds a random delay is drawn from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn is_zero(&self) -> bool {
        self.max_ms == 0
    }

    /// Draw a uniformly distributed delay from the range.
    pub fn sample(&self) -> Duration {
        if self.min_ms >= self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub renderer: RendererKind,
    pub user_agents: Vec<String>,
    pub chrome_path: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout_ms: u64,
    pub readiness_timeout_ms: u64,
    pub readiness_poll_ms: u64,
    pub extraction_timeout_ms: u64,
    pub request_delay_ms: DelayRange,
    pub settle_delay_ms: DelayRange,
    pub scroll_to_bottom: bool,
    pub closed_store_check: ClosedStoreCheck,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            renderer: RendererKind::Chrome,
            user_agents: vec![
                "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/537.36 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/537.36".to_string(),
                "Mozilla/5.0 (Linux; Android 10; SM-G975F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.72 Mobile Safari/537.36".to_string(),
                "Mozilla/5.0 (Linux; Android 11; Pixel 5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.114 Mobile Safari/537.36".to_string(),
            ],
            chrome_path: None,
            viewport_width: 390,
            viewport_height: 844,
            navigation_timeout_ms: 30_000,
            readiness_timeout_ms: 10_000,
            readiness_poll_ms: 250,
            extraction_timeout_ms: 10_000,
            request_delay_ms: DelayRange::none(),
            settle_delay_ms: DelayRange::new(1_500, 3_000),
            scroll_to_bottom: true,
            closed_store_check: ClosedStoreCheck::AfterReadiness,
        }
    }
}

impl ScraperConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms.max(1))
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }

    /// One user agent per run, picked at random from the configured list.
    pub fn pick_user_agent(&self) -> Option<&str> {
        if self.user_agents.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..self.user_agents.len());
        Some(self.user_agents[index].as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: DelayRange,
    pub acquire_timeout_ms: u64,
    pub chunk_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_retries: 3,
            retry_backoff_ms: DelayRange::new(2_000, 5_000),
            acquire_timeout_ms: 600_000,
            chunk_size: Some(100),
        }
    }
}

impl SchedulerConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Markers {
    /// Written when a field's selector is absent.
    pub not_available: String,
    /// Written for a missing rating count.
    pub missing_rating: String,
    /// Written in every field of a row whose fetch failed for good.
    pub failed: String,
    /// Written in every field of a row whose store is closed.
    pub store_closed: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            not_available: "TIDAK ADA".to_string(),
            missing_rating: "0".to_string(),
            failed: "GAGAL".to_string(),
            store_closed: "Toko Libur".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub readiness_selector: Option<String>,
    pub popup_close_selector: Option<String>,
    pub closed_store_text: String,
    pub name_selector: String,
    pub discounted_price_selector: String,
    pub original_price_selector: String,
    pub seller_selector: String,
    pub rating_selector: String,
    pub markers: Markers,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            readiness_selector: Some("h1".to_string()),
            popup_close_selector: None,
            closed_store_text: "Toko sedang libur".to_string(),
            name_selector: "h1".to_string(),
            discounted_price_selector: "h3[data-testid='pdpProductPrice']".to_string(),
            original_price_selector: "span[data-testid='pdpSlashPrice']".to_string(),
            seller_selector: "#pdpShopCredContainer h2".to_string(),
            rating_selector: "#pdp_comp-social_proof_mini button span.subtitle > u".to_string(),
            markers: Markers::default(),
        }
    }
}

impl ExtractorConfig {
    fn selectors(&self) -> Vec<(&'static str, &str)> {
        let mut selectors = vec![
            ("name_selector", self.name_selector.as_str()),
            ("discounted_price_selector", self.discounted_price_selector.as_str()),
            ("original_price_selector", self.original_price_selector.as_str()),
            ("seller_selector", self.seller_selector.as_str()),
            ("rating_selector", self.rating_selector.as_str()),
        ];
        if let Some(selector) = &self.readiness_selector {
            selectors.push(("readiness_selector", selector.as_str()));
        }
        if let Some(selector) = &self.popup_close_selector {
            selectors.push(("popup_close_selector", selector.as_str()));
        }
        selectors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    pub layout: SheetLayout,
    pub input_path: String,
    pub output_path: String,
    /// Cell for the "last updated" line. Defaults to one blank column after the data.
    pub timestamp_cell: Option<String>,
    pub summary_cell: Option<String>,
    pub utc_offset_minutes: i32,
    pub timezone_label: String,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            layout: SheetLayout::Simple,
            input_path: "data/input.csv".to_string(),
            output_path: "data/output.csv".to_string(),
            timestamp_cell: None,
            summary_cell: None,
            utc_offset_minutes: 7 * 60,
            timezone_label: "WIB".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("scraper.log".to_string()),
        }
    }
}

impl AppConfig {
    /// Built-in defaults, then the optional file at `path`, then `HARVESTER__*`
    /// environment variables.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("HARVESTER").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate scheduler configuration
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::Message("Scheduler max_concurrency must be greater than 0".into()));
        }

        if self.scheduler.acquire_timeout_ms == 0 {
            return Err(ConfigError::Message("Scheduler acquire_timeout_ms must be greater than 0".into()));
        }

        if self.scheduler.chunk_size == Some(0) {
            return Err(ConfigError::Message("Scheduler chunk_size must be greater than 0 when set".into()));
        }

        let ranges = [
            ("scheduler.retry_backoff_ms", &self.scheduler.retry_backoff_ms),
            ("scraper.request_delay_ms", &self.scraper.request_delay_ms),
            ("scraper.settle_delay_ms", &self.scraper.settle_delay_ms),
        ];
        for (name, range) in ranges {
            if range.min_ms > range.max_ms {
                return Err(ConfigError::Message(format!("{} min_ms cannot exceed max_ms", name)));
            }
        }

        // Validate scraper configuration
        let timeouts = [
            ("navigation_timeout_ms", self.scraper.navigation_timeout_ms),
            ("readiness_timeout_ms", self.scraper.readiness_timeout_ms),
            ("extraction_timeout_ms", self.scraper.extraction_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Message(format!("Scraper {} must be greater than 0", name)));
            }
        }

        if self.scraper.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::Message("Scraper user_agents must contain at least one entry".into()));
        }

        if self.scraper.viewport_width == 0 || self.scraper.viewport_height == 0 {
            return Err(ConfigError::Message("Scraper viewport must be non-empty".into()));
        }

        // Validate extractor configuration
        for (name, selector) in self.extractor.selectors() {
            if Selector::parse(selector).is_err() {
                return Err(ConfigError::Message(format!("Invalid CSS selector in extractor.{}: {}", name, selector)));
            }
        }

        if self.extractor.closed_store_text.trim().is_empty() {
            return Err(ConfigError::Message("Extractor closed_store_text must not be empty".into()));
        }

        // Validate sheet configuration
        for cell in [&self.sheet.timestamp_cell, &self.sheet.summary_cell].into_iter().flatten() {
            if CellRef::parse(cell).is_err() {
                return Err(ConfigError::Message(format!("Invalid cell reference in sheet config: {}", cell)));
            }
        }

        if self.sheet.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Message("Sheet utc_offset_minutes must be within one day".into()));
        }

        Ok(())
    }
}
