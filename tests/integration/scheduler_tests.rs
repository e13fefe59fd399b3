use super::*;
use price_harvester::models::{FailureReason, Field, RowStatus};
use rstest::rstest;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_table_matches_input_order() -> anyhow::Result<()> {
    let urls: Vec<String> = (0..12).map(url).collect();
    // Later items finish first
    let renderer = FakeRenderer::new(urls.iter().enumerate().map(|(i, u)| {
        let load = Duration::from_millis(((12 - i) * 3) as u64);
        (u.clone(), Script::slow(load, product_html(&format!("Produk {}", i), "Rp1.000", None)))
    }));
    let config = get_test_config();

    let table = build_scheduler(&renderer, &config).run_batch(&work_items(&urls)).await;

    assert_eq!(table.len(), urls.len());
    for (i, row) in table.rows().iter().enumerate() {
        assert_eq!(row.index, i);
        assert_eq!(row.item.url, urls[i]);
        assert_eq!(row.status, RowStatus::Success);
        assert_eq!(row.value(Field::Name), format!("Produk {}", i));
    }
    Ok(())
}

#[tokio::test]
async fn test_duplicate_urls_are_independent_rows() -> anyhow::Result<()> {
    let target = url(1);
    let renderer = FakeRenderer::new([(target.clone(), Script::page(product_html("Kopi", "Rp5.000", None)))]);
    let config = get_test_config();

    let items = work_items(&[target.clone(), target.clone()]);
    let table = build_scheduler(&renderer, &config).run_batch(&items).await;

    assert_eq!(table.len(), 2);
    assert_eq!(renderer.attempts(&target), 2);
    assert!(table.rows().iter().all(|row| row.status == RowStatus::Success));
    Ok(())
}

#[tokio::test]
async fn test_closed_store_skips_extractor() -> anyhow::Result<()> {
    let closed = url(1);
    let renderer = FakeRenderer::new([(closed.clone(), Script::page(closed_store_html()))]);
    let config = get_test_config();

    let table = build_scheduler(&renderer, &config).run_batch(&work_items(&[closed.clone()])).await;

    let row = &table.rows()[0];
    assert_eq!(row.status, RowStatus::StoreClosed);
    assert_eq!(row.attempts, 1);
    for field in Field::ALL {
        assert_eq!(row.value(field), config.extractor.markers.store_closed);
    }
    assert_eq!(renderer.field_lookups(&closed), 0);
    Ok(())
}

#[tokio::test]
async fn test_original_price_copies_discounted_price() -> anyhow::Result<()> {
    let target = url(1);
    let renderer = FakeRenderer::new([(target.clone(), Script::page(product_html("Gula", "Rp18.500", None)))]);
    let config = get_test_config();

    let table = build_scheduler(&renderer, &config).run_batch(&work_items(&[target])).await;

    let row = &table.rows()[0];
    assert_eq!(row.value(Field::DiscountedPrice), "Rp18.500");
    assert_eq!(row.value(Field::OriginalPrice), "Rp18.500");
    assert_eq!(row.value(Field::RatingCount), config.extractor.markers.missing_rating);
    Ok(())
}

#[rstest]
#[case(0, 1)]
#[case(1, 2)]
#[case(3, 4)]
#[tokio::test]
async fn test_recovers_after_transient_failures(#[case] failures: usize, #[case] expected_attempts: u32) {
    let target = url(7);
    let renderer = FakeRenderer::new([(
        target.clone(),
        Script::failing(failures, product_html("Beras", "Rp70.000", Some("Rp75.000"))),
    )]);
    let config = get_test_config();

    let table = build_scheduler(&renderer, &config).run_batch(&work_items(&[target.clone()])).await;

    let row = &table.rows()[0];
    assert_eq!(row.status, RowStatus::Success);
    assert_eq!(row.attempts, expected_attempts);
    assert_eq!(row.value(Field::OriginalPrice), "Rp75.000");
    assert_eq!(renderer.attempts(&target), expected_attempts as usize);
}

#[rstest]
#[case(0)]
#[case(2)]
#[case(3)]
#[tokio::test]
async fn test_permanent_failure_uses_every_retry(#[case] max_retries: u32) {
    let target = url(9);
    let renderer = FakeRenderer::new([(target.clone(), Script::always_failing())]);
    let mut config = get_test_config();
    config.scheduler.max_retries = max_retries;

    let table = build_scheduler(&renderer, &config).run_batch(&work_items(&[target.clone()])).await;

    let row = &table.rows()[0];
    assert!(matches!(row.status, RowStatus::Failed(FailureReason::Navigation(_))));
    assert_eq!(row.attempts, max_retries + 1);
    assert_eq!(renderer.attempts(&target), (max_retries + 1) as usize);
    for field in Field::ALL {
        assert_eq!(row.value(field), config.extractor.markers.failed);
    }
}

#[tokio::test]
async fn test_invalid_url_attempted_once() -> anyhow::Result<()> {
    let renderer = FakeRenderer::default();
    let config = get_test_config();

    let items = work_items(&["www.shop.example/no-scheme".to_string()]);
    let table = build_scheduler(&renderer, &config).run_batch(&items).await;

    let row = &table.rows()[0];
    assert!(matches!(row.status, RowStatus::Failed(FailureReason::InvalidUrl(_))));
    assert_eq!(row.attempts, 1);
    assert_eq!(renderer.pages_opened(), 0);
    Ok(())
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
#[tokio::test]
async fn test_peak_concurrency_never_exceeds_limit(#[case] max_concurrency: usize) {
    let urls: Vec<String> = (0..16).map(url).collect();
    let renderer = FakeRenderer::new(urls.iter().map(|u| {
        (u.clone(), Script::slow(Duration::from_millis(15), product_html("Item", "Rp1", None)))
    }));
    let mut config = get_test_config();
    config.scheduler.max_concurrency = max_concurrency;

    let scheduler = build_scheduler(&renderer, &config);
    let table = scheduler.run_batch(&work_items(&urls)).await;

    assert_eq!(table.count(|s| *s == RowStatus::Success), urls.len());
    assert!(renderer.peak_open_pages() <= max_concurrency);
    assert!(scheduler.gate().peak() <= max_concurrency);
    assert_eq!(scheduler.gate().peak(), max_concurrency);
    assert_eq!(scheduler.gate().in_flight(), 0);
    assert_eq!(renderer.pages_opened(), renderer.pages_closed());
}

#[tokio::test]
async fn test_retries_share_the_gate() -> anyhow::Result<()> {
    let mut scripts: Vec<(String, Script)> = (0..6)
        .map(|i| (url(i), Script::failing(2, product_html("Flaky", "Rp2", None))))
        .collect();
    scripts.push((url(99), Script::always_failing()));
    let urls: Vec<String> = scripts.iter().map(|(u, _)| u.clone()).collect();
    let renderer = FakeRenderer::new(scripts);
    let mut config = get_test_config();
    config.scheduler.max_concurrency = 2;

    let scheduler = build_scheduler(&renderer, &config);
    let table = scheduler.run_batch(&work_items(&urls)).await;

    assert_eq!(table.count(|s| *s == RowStatus::Success), 6);
    assert_eq!(table.count(|s| matches!(s, RowStatus::Failed(_))), 1);
    assert!(scheduler.gate().peak() <= 2);
    assert!(renderer.peak_open_pages() <= 2);
    assert_eq!(renderer.open_pages(), 0);
    Ok(())
}

#[tokio::test]
async fn test_readiness_timeout_is_retried() -> anyhow::Result<()> {
    let target = url(3);
    let renderer = FakeRenderer::new([(target.clone(), Script::page("<html><body><p>spinner</p></body></html>".to_string()))]);
    let mut config = get_test_config();
    config.scraper.readiness_timeout_ms = 20;
    config.scheduler.max_retries = 1;

    let table = build_scheduler(&renderer, &config).run_batch(&work_items(&[target.clone()])).await;

    assert_eq!(table.rows()[0].status, RowStatus::Failed(FailureReason::ReadinessTimeout));
    assert_eq!(renderer.attempts(&target), 2);
    assert_eq!(renderer.pages_closed(), 2);
    Ok(())
}

#[tokio::test]
async fn test_gate_acquire_deadline() -> anyhow::Result<()> {
    let urls = vec![url(1), url(2)];
    let renderer = FakeRenderer::new(
        urls.iter()
            .map(|u| (u.clone(), Script::slow(Duration::from_millis(200), product_html("Lambat", "Rp1", None)))),
    );
    let mut config = get_test_config();
    config.scheduler.max_concurrency = 1;
    config.scheduler.max_retries = 0;
    config.scheduler.acquire_timeout_ms = 20;

    let table = build_scheduler(&renderer, &config).run_batch(&work_items(&urls)).await;

    // One item holds the only permit for longer than the other may wait
    assert_eq!(table.count(|s| *s == RowStatus::Success), 1);
    assert_eq!(table.count(|s| *s == RowStatus::Failed(FailureReason::Timeout)), 1);
    assert_eq!(renderer.pages_opened(), 1);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_releases_pages_and_keeps_placeholders() -> anyhow::Result<()> {
    let urls: Vec<String> = (0..8).map(url).collect();
    let renderer = FakeRenderer::new(
        urls.iter()
            .map(|u| (u.clone(), Script::slow(Duration::from_secs(30), product_html("Lama", "Rp1", None)))),
    );
    let mut config = get_test_config();
    config.scraper.navigation_timeout_ms = 60_000;
    config.scheduler.max_concurrency = 2;

    let scheduler = build_scheduler(&renderer, &config);
    let token = scheduler.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let items = work_items(&urls);
    let table = timeout(Duration::from_secs(5), scheduler.run_batch(&items)).await?;

    assert_eq!(table.len(), urls.len());
    assert_eq!(table.count(|s| *s == RowStatus::Pending), urls.len());
    assert!(table
        .rows()
        .iter()
        .all(|row| row.value(Field::Name) == config.extractor.markers.failed));
    assert_eq!(renderer.pages_opened(), 2);
    assert_eq!(renderer.pages_closed(), 2);
    assert_eq!(scheduler.gate().in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn test_one_failure_does_not_abort_batch() -> anyhow::Result<()> {
    let good = url(1);
    let bad = url(2);
    let closed = url(3);
    let renderer = FakeRenderer::new([
        (good.clone(), Script::page(product_html("Minyak", "Rp30.000", Some("Rp35.000")))),
        (bad.clone(), Script::always_failing()),
        (closed.clone(), Script::page(closed_store_html())),
    ]);
    let mut config = get_test_config();
    config.scheduler.max_retries = 1;

    let table = build_scheduler(&renderer, &config)
        .run_batch(&work_items(&[bad, good, closed]))
        .await;

    let statuses: Vec<&RowStatus> = table.rows().iter().map(|row| &row.status).collect();
    assert!(matches!(statuses[0], RowStatus::Failed(_)));
    assert_eq!(*statuses[1], RowStatus::Success);
    assert_eq!(*statuses[2], RowStatus::StoreClosed);
    Ok(())
}

#[tokio::test]
async fn test_dropped_batch_closes_open_pages() -> anyhow::Result<()> {
    let urls: Vec<String> = (0..4).map(url).collect();
    let renderer = FakeRenderer::new(
        urls.iter()
            .map(|u| (u.clone(), Script::slow(Duration::from_secs(30), product_html("Lama", "Rp1", None)))),
    );
    let mut config = get_test_config();
    config.scraper.navigation_timeout_ms = 60_000;
    config.scheduler.max_concurrency = 2;

    let scheduler = build_scheduler(&renderer, &config);
    let items = work_items(&urls);
    // Dropping the batch future aborts every fetch task mid-navigation
    let abandoned = timeout(Duration::from_millis(50), scheduler.run_batch(&items)).await;
    assert!(abandoned.is_err());
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("Opened {}, closed {}", renderer.pages_opened(), renderer.pages_closed());
    assert_eq!(renderer.pages_opened(), 2);
    assert_eq!(renderer.pages_closed(), 2);
    assert_eq!(renderer.open_pages(), 0);
    assert_eq!(scheduler.gate().in_flight(), 0);
    Ok(())
}
