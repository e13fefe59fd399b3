use super::*;
use async_trait::async_trait;
use chrono::Utc;
use mockall::{Sequence, mock};
use price_harvester::{
    config::RendererKind,
    models::{RowStatus, RunSummary, SheetLayout},
    render,
    sink::{CellRange, CsvSink, ResultPublisher, TableSink},
    source::{CsvSource, TableSource, parse_items},
};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mock! {
    pub Sheet {}

    #[async_trait]
    impl TableSink for Sheet {
        async fn write_range(&self, range: &CellRange, rows: Vec<Vec<String>>) -> price_harvester::Result<()>;
    }
}

fn read_csv(path: &std::path::Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|record| record.unwrap().iter().map(str::to_string).collect())
        .collect()
}

#[tokio::test]
async fn test_chunked_run_publishes_each_chunk() -> anyhow::Result<()> {
    let urls: Vec<String> = (0..5).map(url).collect();
    let renderer = FakeRenderer::new(urls.iter().enumerate().map(|(i, u)| {
        (u.clone(), Script::page(product_html(&format!("Produk {}", i), "Rp9.000", None)))
    }));
    let mut config = get_test_config();
    config.scheduler.chunk_size = Some(2);

    let mut sheet = MockSheet::new();
    let mut seq = Sequence::new();
    // Three chunk writes and the final one, each covering header plus every row
    sheet.expect_write_range()
        .withf(|range, rows| range.to_string() == "A1:D6" && rows.len() == 6)
        .times(4)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    sheet.expect_write_range()
        .withf(|range, rows| range.to_string() == "G1:G2" && rows.len() == 2)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));

    let publisher = ResultPublisher::new(Arc::new(sheet), &config.sheet)?;
    let scheduler = build_scheduler(&renderer, &config);
    let started_at = Utc::now();
    let table = scheduler.run_chunked(&work_items(&urls), &publisher).await?;
    let summary = RunSummary::from_table(&table, started_at, Duration::from_secs(3), false);
    publisher.publish(&table, &summary).await?;

    assert_eq!(summary.succeeded, 5);
    Ok(())
}

#[tokio::test]
async fn test_chunk_write_failure_stops_run() -> anyhow::Result<()> {
    let urls: Vec<String> = (0..4).map(url).collect();
    let renderer = FakeRenderer::new(urls.iter().map(|u| (u.clone(), Script::page(product_html("X", "Rp1", None)))));
    let mut config = get_test_config();
    config.scheduler.chunk_size = Some(2);

    let mut sheet = MockSheet::new();
    sheet.expect_write_range()
        .times(1)
        .returning(|_, _| Err(price_harvester::AppError::Sink("permission denied".to_string())));

    let publisher = ResultPublisher::new(Arc::new(sheet), &config.sheet)?;
    let result = build_scheduler(&renderer, &config)
        .run_chunked(&work_items(&urls), &publisher)
        .await;

    assert!(result.is_err());
    // The second chunk never started
    assert_eq!(renderer.pages_opened(), 2);
    Ok(())
}

#[tokio::test]
async fn test_closed_store_run_end_to_end() -> anyhow::Result<()> {
    let first = "https://shop.example/a".to_string();
    let second = "https://shop.example/b".to_string();
    let renderer = FakeRenderer::new([
        (first.clone(), Script::page(product_html("Sabun", "Rp5.000", Some("Rp6.000")))),
        (second.clone(), Script::page(closed_store_html())),
    ]);
    let config = get_test_config();

    let dir = TempDir::new()?;
    let output = dir.path().join("results.csv");
    let sink = Arc::new(CsvSink::new(&output));
    let publisher = ResultPublisher::new(sink.clone(), &config.sheet)?;

    let scheduler = build_scheduler(&renderer, &config);
    let started_at = Utc::now();
    let table = scheduler.run_batch(&work_items(&[first.clone(), second.clone()])).await;
    let summary = RunSummary::from_table(&table, started_at, Duration::from_secs(61), false);
    publisher.publish(&table, &summary).await?;

    let cells = read_csv(&output);
    assert_eq!(cells[0][..4], ["URL", "Product Name", "Original Price", "Discounted Price"]);
    assert_eq!(cells[1][..4], [first.as_str(), "Sabun", "Rp6.000", "Rp5.000"]);
    assert_eq!(cells[2][..4], [second.as_str(), "Toko Libur", "Toko Libur", "Toko Libur"]);
    assert!(cells[0][6].starts_with("Last Updated (WIB): "));
    assert_eq!(
        cells[1][6],
        "Scrape finished in 1 min 1 s, scraped 2 of 2 products (100.00%)"
    );
    assert_eq!(sink.snapshot()?, cells);
    Ok(())
}

#[tokio::test]
async fn test_failing_item_next_to_healthy_item() -> anyhow::Result<()> {
    let broken = "https://a/1".to_string();
    let healthy = "https://a/2".to_string();
    let renderer = FakeRenderer::new([
        (broken.clone(), Script::always_failing()),
        (healthy.clone(), Script::page(product_html("Widget", "Rp1", None))),
    ]);
    let mut config = get_test_config();
    config.scheduler.max_concurrency = 1;
    config.scheduler.max_retries = 2;

    let dir = TempDir::new()?;
    let output = dir.path().join("results.csv");
    let publisher = ResultPublisher::new(Arc::new(CsvSink::new(&output)), &config.sheet)?;

    let scheduler = build_scheduler(&renderer, &config);
    let table = scheduler.run_batch(&work_items(&[broken.clone(), healthy.clone()])).await;
    let summary = RunSummary::from_table(&table, Utc::now(), Duration::from_secs(2), false);
    publisher.publish(&table, &summary).await?;

    let cells = read_csv(&output);
    assert_eq!(cells[1][..4], ["https://a/1", "GAGAL", "GAGAL", "GAGAL"]);
    assert_eq!(cells[2][..4], ["https://a/2", "Widget", "Rp1", "Rp1"]);
    assert_eq!(table.rows()[0].attempts, 3);
    assert_eq!(renderer.attempts(&broken), 3);
    assert_eq!(renderer.attempts(&healthy), 1);
    assert_eq!(scheduler.gate().peak(), 1);
    assert!(cells[1][6].contains("scraped 1 of 2 products (50.00%)"));
    Ok(())
}

#[tokio::test]
async fn test_blank_input_cell_keeps_row_position() -> anyhow::Result<()> {
    let mut input = NamedTempFile::new()?;
    writeln!(input, "Link")?;
    writeln!(input, "{}", url(1))?;
    writeln!(input, "\"\",note")?;
    writeln!(input, "{}", url(3))?;
    input.flush()?;

    let renderer = FakeRenderer::new([
        (url(1), Script::page(product_html("Satu", "Rp1", None))),
        (url(3), Script::page(product_html("Tiga", "Rp3", None))),
    ]);
    let config = get_test_config();

    let rows = CsvSource::new(input.path()).read_rows().await?;
    let items = parse_items(SheetLayout::Simple, &rows);
    assert_eq!(items.len(), 3);

    let dir = TempDir::new()?;
    let output = dir.path().join("results.csv");
    let publisher = ResultPublisher::new(Arc::new(CsvSink::new(&output)), &config.sheet)?;
    let table = build_scheduler(&renderer, &config).run_batch(&items).await;
    publisher.publish_rows(&table).await?;

    let cells = read_csv(&output);
    assert_eq!(cells[1][1], "Satu");
    assert_eq!(cells[2][..2], ["", "GAGAL"]);
    assert_eq!(cells[3][1], "Tiga");
    assert_eq!(table.rows()[1].attempts, 1);
    Ok(())
}

#[tokio::test]
async fn test_catalog_sheet_round_trip() -> anyhow::Result<()> {
    let mut input = NamedTempFile::new()?;
    writeln!(input, "SKU,Category,Sub Category,Brand,Weight,Name,Price,Link 1,Link 2")?;
    writeln!(input, "K-01,Minuman,Kopi,Kapal Api,250g,Kopi Bubuk,Rp20.000,{},{}", url(1), url(2))?;
    writeln!(input, "K-02,Minuman,Teh,Sariwangi,25s,Teh Celup,Rp8.000,,")?;
    input.flush()?;

    let renderer = FakeRenderer::new([
        (url(1), Script::page(product_html("Kopi A", "Rp19.000", None))),
        (url(2), Script::always_failing()),
    ]);
    let mut config = get_test_config();
    config.sheet.layout = SheetLayout::Catalog;
    config.scheduler.max_retries = 0;

    let rows = CsvSource::new(input.path()).read_rows().await?;
    let items = parse_items(config.sheet.layout, &rows);
    assert_eq!(items.len(), 2);

    let dir = TempDir::new()?;
    let output = dir.path().join("catalog.csv");
    let publisher = ResultPublisher::new(Arc::new(CsvSink::new(&output)), &config.sheet)?;
    let table = build_scheduler(&renderer, &config).run_batch(&items).await;
    let summary = RunSummary::from_table(&table, Utc::now(), Duration::from_secs(5), false);
    publisher.publish(&table, &summary).await?;

    let cells = read_csv(&output);
    assert_eq!(cells[0][0], "SKU");
    assert_eq!(cells[0][11], "URL");
    assert_eq!(cells[1][..4], ["K-01", "Minuman", "Kopi", "Kapal Api"]);
    assert_eq!(cells[1][6..12], ["Kopi A", "Rp19.000", "Rp19.000", "Toko Test", "0", url(1).as_str()]);
    assert_eq!(cells[2][6], "GAGAL");
    assert_eq!(cells[2][11], url(2));
    assert!(cells[0][13].starts_with("Last Updated"));
    assert!(cells[1][13].contains("1 of 2 products (50.00%)"));
    Ok(())
}

#[tokio::test]
async fn test_http_renderer_batch() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(product_html("Susu", "Rp12.000", Some("Rp14.000"))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p/2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = get_test_config();
    config.scraper.renderer = RendererKind::Http;
    config.scheduler.max_retries = 1;

    let renderer = render::build_renderer(&config.scraper)?;
    let extractor = Extractor::from_config(&config.extractor)?;
    let fetcher = Fetcher::new(renderer, extractor, config.scraper.clone(), &config.extractor);
    let scheduler = BatchScheduler::new(Arc::new(fetcher), config.scheduler.clone(), config.extractor.markers.clone());

    let items = work_items(&[format!("{}/p/1", server.uri()), format!("{}/p/2", server.uri())]);
    let table = scheduler.run_batch(&items).await;

    assert_eq!(table.rows()[0].status, RowStatus::Success);
    assert_eq!(table.rows()[0].value(price_harvester::models::Field::OriginalPrice), "Rp14.000");
    assert!(matches!(table.rows()[1].status, RowStatus::Failed(_)));
    assert_eq!(table.rows()[1].attempts, 2);
    Ok(())
}
