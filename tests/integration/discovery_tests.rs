use super::*;
use boxscore_harvester::discovery::{discover, fetch_listing_with_retry, parse_listing};
use boxscore_harvester::models::HarvestMode;
use chrono::NaiveDate;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn target() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

#[tokio::test]
async fn test_listing_over_http_backend() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let config = get_test_config(&server.uri());

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(header("user-agent", "BoxscoreHarvester-Test/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[
            ("LAL @ BOS", "/game/0022400601", "01/16/2025"),
            ("LAL @ BOS", "/game/0022400555", "01/15/2025"),
            ("BOS vs. LAL", "/game/0022400555", "01/15/2025"),
            ("NYK @ MIA", "/game/0022400556", "01/15/2025"),
            ("DEN @ PHX", "/game/0022400540", "01/14/2025"),
            ("GSW @ SAC", "/game/0022400541", "01/14/2025"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpSessionProvider::new(config.browser.clone())?;
    let markup = fetch_listing_with_retry(
        &provider,
        &config.listing,
        HarvestMode::Current,
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
    .await?;
    assert_eq!(provider.live_sessions(), 0);

    let rows = parse_listing(&markup, &config.listing)?;
    assert_eq!(rows.len(), 6);

    let outcome = discover(&rows, &config.listing, HarvestMode::Current, target())?;
    let ids: Vec<&str> = outcome.jobs.iter().map(|j| j.external_id.as_str()).collect();
    assert_eq!(ids, vec!["0022400555", "0022400556"]);
    assert_eq!(outcome.duplicates, 1);

    let first = &outcome.jobs[0];
    assert_eq!(first.away, "LAL");
    assert_eq!(first.home, "BOS");
    assert_eq!(
        first.url,
        format!("{}/game/0022400555/box-score", server.uri())
    );

    println!("✓ Discovered {} jobs over HTTP", outcome.jobs.len());
    Ok(())
}

#[tokio::test]
async fn test_historical_mode_keeps_every_date() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let config = get_test_config(&server.uri());

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[
            ("LAL @ BOS", "/game/0022300001", "04/14/2024"),
            ("DEN @ PHX", "/game/0022300002", "10/24/2023"),
        ])))
        .mount(&server)
        .await;

    // The HTTP backend cannot click the page-size control; the fetch still succeeds.
    let provider = HttpSessionProvider::new(config.browser.clone())?;
    let markup = fetch_listing_with_retry(
        &provider,
        &config.listing,
        HarvestMode::Historical,
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
    .await?;

    let rows = parse_listing(&markup, &config.listing)?;
    let outcome = discover(&rows, &config.listing, HarvestMode::Historical, target())?;
    assert_eq!(outcome.jobs.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_listing_fetch_retries_transient_failure() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let config = get_test_config(&server.uri());

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[(
            "LAL @ BOS",
            "/game/0022400555",
            "01/15/2025",
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpSessionProvider::new(config.browser.clone())?;
    let markup = fetch_listing_with_retry(
        &provider,
        &config.listing,
        HarvestMode::Current,
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
    .await?;

    assert_eq!(parse_listing(&markup, &config.listing)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_listing_fetch_exhaustion_is_fatal() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let config = get_test_config(&server.uri());

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let provider = HttpSessionProvider::new(config.browser.clone())?;
    let result = fetch_listing_with_retry(
        &provider,
        &config.listing,
        HarvestMode::Current,
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
    .await;

    match result {
        Err(boxscore_harvester::AppError::Discovery(message)) => {
            assert!(message.contains("Upstream listing fetch failed"));
            assert!(message.contains("503"));
        }
        other => panic!("expected discovery error, got {:?}", other.map(|m| m.len())),
    }
    Ok(())
}

#[tokio::test]
async fn test_listing_without_table_is_retried_then_fatal() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let config = get_test_config(&server.uri());

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body>maintenance</body></html>"),
        )
        .expect(2)
        .mount(&server)
        .await;

    let provider = HttpSessionProvider::new(config.browser.clone())?;
    let result = fetch_listing_with_retry(
        &provider,
        &config.listing,
        HarvestMode::Current,
        Duration::from_secs(5),
        Duration::from_secs(1),
    )
    .await;

    assert!(matches!(result, Err(boxscore_harvester::AppError::Discovery(_))));
    Ok(())
}
