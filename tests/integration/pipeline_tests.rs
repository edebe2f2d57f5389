use super::*;
use boxscore_harvester::harvester::{RunOutcome, RunParams, Season};
use boxscore_harvester::models::{HarvestMode, WriteMode};
use boxscore_harvester::orchestrator::AbortSignal;
use boxscore_harvester::plugins::traits::NotificationKind;
use chrono::NaiveDate;
use sqlx::Row;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn target() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

async fn mount_listing(server: &MockServer, rows: &[(&str, &str, &str)]) {
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(rows)))
        .mount(server)
        .await;
}

async fn mount_box_score(server: &MockServer, game: &str, markup: String) {
    Mock::given(method("GET"))
        .and(path(format!("/game/{}/box-score", game)))
        .respond_with(ResponseTemplate::new(200).set_body_string(markup))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_current_run_into_sqlite() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        &[
            ("LAL @ BOS", "/game/0022400555", "01/15/2025"),
            ("BOS vs. LAL", "/game/0022400555", "01/15/2025"),
            ("NYK @ MIA", "/game/0022400556", "01/15/2025"),
            ("DEN @ PHX", "/game/0022400540", "01/14/2025"),
        ],
    )
    .await;

    mount_box_score(
        &server,
        "0022400555",
        box_score_page(
            &[("LeBron James", 28), ("Austin Reaves", 17)],
            &[("Jayson Tatum", 31)],
            Some("Bench Guy"),
        ),
    )
    .await;

    // Fails once, then serves the page
    Mock::given(method("GET"))
        .and(path("/game/0022400556/box-score"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_box_score(
        &server,
        "0022400556",
        box_score_page(&[("Jalen Brunson", 35)], &[("Bam Adebayo", 20)], None),
    )
    .await;

    let pool = memory_pool().await?;
    let config = get_test_config(&server.uri());
    let (harvester, notifier) = create_test_harvester(config, pool.clone()).await?;

    let params = RunParams::from_config(harvester.config(), HarvestMode::Current, target());
    let outcome = harvester.run(&params, &AbortSignal::new()).await;
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            succeeded: 2,
            permanently_failed: 0,
            aborted: 0,
            rows: 6,
        }
    );
    println!("✓ Run completed: {:?}", outcome);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM boxscores")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 6);

    // Away table first, home second
    let tatum = sqlx::query("SELECT team, matchup, pts, plus_mins FROM boxscores WHERE player = ?")
        .bind("Jayson Tatum")
        .fetch_one(&pool)
        .await?;
    assert_eq!(tatum.try_get::<String, _>("team")?, "BOS");
    assert_eq!(tatum.try_get::<String, _>("matchup")?, "LAL");
    assert_eq!(tatum.try_get::<f64, _>("pts")?, 31.0);
    assert_eq!(tatum.try_get::<f64, _>("plus_mins")?, 6.0);

    let lebron = sqlx::query("SELECT team, game_id FROM boxscores WHERE player = ?")
        .bind("LeBron James")
        .fetch_one(&pool)
        .await?;
    assert_eq!(lebron.try_get::<String, _>("team")?, "LAL");
    assert_eq!(lebron.try_get::<String, _>("game_id")?, "0022400555");

    // The DNP row lost its stat cells; its context was moved back in place
    let bench = sqlx::query("SELECT team, game_id, fgm, fga FROM boxscores WHERE player = ?")
        .bind("Bench Guy")
        .fetch_one(&pool)
        .await?;
    assert_eq!(bench.try_get::<String, _>("team")?, "BOS");
    assert_eq!(bench.try_get::<String, _>("game_id")?, "0022400555");
    assert_eq!(bench.try_get::<Option<f64>, _>("fgm")?, None);
    assert_eq!(bench.try_get::<Option<f64>, _>("fga")?, None);
    println!("✓ Shape-violation row repaired");

    let declared: String = sqlx::query_scalar(
        "SELECT type FROM pragma_table_info('boxscores') WHERE name = 'game_date'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(declared, "DATE");

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::Completed);
    assert_eq!(sent[0].subject, "NBA SCRAPING: COMPLETED # OF GAMES 2");
    println!("✓ Notified: {}", sent[0].subject);

    Ok(())
}

#[tokio::test]
async fn test_permanently_failing_page() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        &[
            ("LAL @ BOS", "/game/0022400555", "01/15/2025"),
            ("NYK @ MIA", "/game/0022400556", "01/15/2025"),
        ],
    )
    .await;
    mount_box_score(
        &server,
        "0022400555",
        box_score_page(&[("LeBron James", 28)], &[("Jayson Tatum", 31)], None),
    )
    .await;
    // Only one stats table ever renders
    mount_box_score(
        &server,
        "0022400556",
        r#"<html><body><div class="StatsTable_st__g2iuW"><table></table></div></body></html>"#
            .to_string(),
    )
    .await;

    let pool = memory_pool().await?;
    let mut config = get_test_config(&server.uri());
    config.harvest.retry_ceiling = 2;
    let (harvester, notifier) = create_test_harvester(config, pool.clone()).await?;

    let mut params = RunParams::from_config(harvester.config(), HarvestMode::Current, target());
    params.serial = true;
    let outcome = harvester.run(&params, &AbortSignal::new()).await;

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            succeeded: 1,
            permanently_failed: 1,
            aborted: 0,
            rows: 2,
        }
    );

    let requests = server.received_requests().await.unwrap_or_default();
    let failing_hits = requests
        .iter()
        .filter(|r| r.url.path() == "/game/0022400556/box-score")
        .count();
    assert_eq!(failing_hits, 2);

    let sent = notifier.sent.lock().unwrap();
    assert!(sent[0].body.contains("Permanently failed: 1"));
    assert!(sent[0].body.contains("0022400556"));
    Ok(())
}

#[tokio::test]
async fn test_no_games_run() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_listing(&server, &[("DEN @ PHX", "/game/0022400540", "01/14/2025")]).await;

    let pool = memory_pool().await?;
    let (harvester, notifier) =
        create_test_harvester(get_test_config(&server.uri()), pool.clone()).await?;

    let params = RunParams::from_config(harvester.config(), HarvestMode::Current, target());
    let outcome = harvester.run(&params, &AbortSignal::new()).await;
    assert_eq!(outcome, RunOutcome::NoJobs);

    let tables: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE name = 'boxscores'")
            .fetch_one(&pool)
            .await?;
    assert_eq!(tables, 0);

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent[0].subject, "NBA SCRAPING: NO GAMES");
    Ok(())
}

#[tokio::test]
async fn test_unreachable_listing_crashes_run() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let pool = memory_pool().await?;
    let (harvester, notifier) =
        create_test_harvester(get_test_config(&server.uri()), pool).await?;

    let params = RunParams::from_config(harvester.config(), HarvestMode::Current, target());
    let outcome = harvester.run(&params, &AbortSignal::new()).await;
    assert!(matches!(outcome, RunOutcome::Crashed(_)));

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent[0].kind, NotificationKind::Crashed);
    assert_eq!(sent[0].subject, "NBA SCRAPING: SCRIPT CRASHED");
    assert!(sent[0].body.contains("500"));
    Ok(())
}

#[tokio::test]
async fn test_season_backfill_replaces_tables() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        &[
            ("LAL @ BOS", "/game/0022300001", "04/14/2024"),
            ("DEN @ PHX", "/game/0022300002", "10/24/2023"),
        ],
    )
    .await;
    for game in ["0022300001", "0022300002"] {
        mount_box_score(
            &server,
            game,
            box_score_page(&[("Away Player", 10)], &[("Home Player", 12)], None),
        )
        .await;
    }

    let pool = memory_pool().await?;
    sqlx::query("CREATE TABLE boxscores_2023_24 (stale TEXT)")
        .execute(&pool)
        .await?;
    sqlx::query("INSERT INTO boxscores_2023_24 (stale) VALUES ('old')")
        .execute(&pool)
        .await?;

    let (harvester, notifier) =
        create_test_harvester(get_test_config(&server.uri()), pool.clone()).await?;

    let seasons = vec![Season {
        destination: "boxscores_2023_24".to_string(),
        listing_url: format!("{}{}", server.uri(), LISTING_PATH),
    }];
    let mut base = RunParams::from_config(harvester.config(), HarvestMode::Current, target());
    base.write_mode = WriteMode::Append;

    let outcomes = harvester
        .run_seasons(&seasons, &base, &AbortSignal::new())
        .await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].1, RunOutcome::Completed { rows: 4, .. }));

    // Replace mode dropped the stale table and its columns
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM boxscores_2023_24")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 4);
    let stale: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('boxscores_2023_24') WHERE name = 'stale'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(stale, 0);

    assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    Ok(())
}
