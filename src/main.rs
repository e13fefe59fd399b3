use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use price_harvester::{
    AppConfig,
    config::{LoggingConfig, RendererKind},
    extractor::Extractor,
    fetcher::Fetcher,
    models::{RunSummary, SheetLayout},
    render,
    scheduler::BatchScheduler,
    sink::{CsvSink, ResultPublisher, summary_line},
    source::{CsvSource, TableSource, parse_items},
};

#[derive(Parser, Debug)]
#[command(name = "price-harvester")]
#[command(about = "Scrape product prices from a list of pages into a sheet", long_about = None)]
struct Cli {
    /// Configuration file, extension optional
    #[arg(short, long, default_value = "config/default", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape every URL of the input sheet and publish the results
    Run(RunArgs),
    /// Validate the configuration and print it as JSON
    CheckConfig,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Input CSV file
    #[arg(short, long)]
    input: Option<String>,

    /// Output CSV file
    #[arg(short, long)]
    output: Option<String>,

    /// Sheet layout: simple or catalog
    #[arg(short, long, value_parser = parse_layout)]
    layout: Option<SheetLayout>,

    /// Maximum number of pages loading at once
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Items per chunk; results are published after each chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Render backend: chrome or http
    #[arg(long, value_parser = parse_renderer)]
    renderer: Option<RendererKind>,
}

impl RunArgs {
    fn apply(self, config: &mut AppConfig) {
        if let Some(input) = self.input {
            config.sheet.input_path = input;
        }
        if let Some(output) = self.output {
            config.sheet.output_path = output;
        }
        if let Some(layout) = self.layout {
            config.sheet.layout = layout;
        }
        if let Some(concurrency) = self.concurrency {
            config.scheduler.max_concurrency = concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            config.scheduler.max_retries = max_retries;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.scheduler.chunk_size = Some(chunk_size);
        }
        if let Some(renderer) = self.renderer {
            config.scraper.renderer = renderer;
        }
    }
}

fn parse_layout(value: &str) -> std::result::Result<SheetLayout, String> {
    match value.to_ascii_lowercase().as_str() {
        "simple" => Ok(SheetLayout::Simple),
        "catalog" => Ok(SheetLayout::Catalog),
        other => Err(format!("unknown layout '{}', expected simple or catalog", other)),
    }
}

fn parse_renderer(value: &str) -> std::result::Result<RendererKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "chrome" => Ok(RendererKind::Chrome),
        "http" => Ok(RendererKind::Http),
        other => Err(format!("unknown renderer '{}', expected chrome or http", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Run(args) => {
            args.apply(&mut config);
            config.validate().context("Invalid command line overrides")?;
            let _guard = init_logging(&config.logging)?;
            run(config).await
        }
    }
}

/// Stdout plus an optional plain-text log file. The returned guard flushes the
/// file writer when dropped.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{level},price_harvester={level},headless_chrome=warn,html5ever=error",
            level = config.level
        ))
    });

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

async fn run(config: AppConfig) -> Result<()> {
    info!(
        "Starting price harvester: {:?} renderer, {} concurrent pages, {} retries",
        config.scraper.renderer, config.scheduler.max_concurrency, config.scheduler.max_retries
    );

    let rows = CsvSource::new(&config.sheet.input_path)
        .read_rows()
        .await
        .with_context(|| format!("Failed to read input sheet {}", config.sheet.input_path))?;
    let items = parse_items(config.sheet.layout, &rows);
    if items.is_empty() {
        warn!("No URLs found in {}", config.sheet.input_path);
    }

    let renderer = render::build_renderer(&config.scraper).context("Failed to start render backend")?;
    let extractor = Extractor::from_config(&config.extractor)?;
    let fetcher = Arc::new(Fetcher::new(renderer, extractor, config.scraper.clone(), &config.extractor));
    let scheduler = BatchScheduler::new(fetcher, config.scheduler.clone(), config.extractor.markers.clone());

    let sink = Arc::new(CsvSink::new(&config.sheet.output_path));
    let publisher = ResultPublisher::new(sink, &config.sheet)?;

    let token = scheduler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight pages close");
            token.cancel();
        }
    });

    let started_at = Utc::now();
    let clock = Instant::now();
    let table = scheduler.run_chunked(&items, &publisher).await?;
    let summary = RunSummary::from_table(&table, started_at, clock.elapsed(), scheduler.is_cancelled());

    publisher.publish(&table, &summary).await?;

    info!("{}", summary_line(&summary));
    info!(
        "Run {}: {} succeeded, {} store closed, {} failed, {} unfinished, {} attempts, peak {}/{} concurrent pages",
        summary.run_id,
        summary.succeeded,
        summary.store_closed,
        summary.failed,
        summary.pending,
        summary.total_attempts,
        scheduler.gate().peak(),
        scheduler.gate().capacity()
    );
    info!("Results written to {}", config.sheet.output_path);
    Ok(())
}
