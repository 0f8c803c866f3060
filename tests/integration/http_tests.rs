//! End-to-end crawls against a wiremock server

use shoal::config::{parse_config, Config};
use shoal::crawler::{crawl, ErrorKind};
use shoal::output::{open_sinks, FailureReport, Record};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html")
}

fn test_config(server: &MockServer, dir: &Path, database: bool) -> Config {
    let database_line = if database {
        format!("database-path = \"{}\"", dir.join("crawl.db").display())
    } else {
        String::new()
    };

    let toml = format!(
        r#"
[crawler]
worker-count = 2
min-interval-per-host = 0
fetch-timeout = 2000
max-retries = 2
backoff-base = 10
backoff-max = 100
backoff-jitter = 0
max-depth = 2
respect-robots = true

[user-agent]
crawler-name = "ShoalTest"
crawler-version = "0.1"
contact-url = "https://example.com/bot"
contact-email = "bot@example.com"

[output]
records-path = "{records}"
failures-path = "{failures}"
{database_line}

[[seed]]
url = "{uri}/"

[extract]

[[extract.field]]
name = "title"
selector = "h1"
required = true
"#,
        records = dir.join("records.jsonl").display(),
        failures = dir.join("failures.jsonl").display(),
        database_line = database_line,
        uri = server.uri(),
    );

    parse_config(&toml).unwrap()
}

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body>
                 <h1>Home</h1>
                 <a href="/page1">one</a>
                 <a href="/private/secret">secret</a>
                 <a href="/missing">missing</a>
               </body></html>"#,
        ))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(html(
            r#"<html><body><h1>Page One</h1><a href="/">home</a></body></html>"#,
        ))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/private/secret"))
        .respond_with(html("<h1>Secret</h1>"))
        .expect(0)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(server)
        .await;
}

fn read_lines<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_crawl_writes_records_and_failures_as_json_lines() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path(), false);

    let (records, failures) = open_sinks(&config.output, "hash").unwrap();
    let report = crawl(&config, records, failures, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.enqueued, 4);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.retries, 0);
    assert!(report.is_conserved());

    let records: Vec<Record> = read_lines(&dir.path().join("records.jsonl"));
    let mut titles: Vec<String> = records
        .iter()
        .map(|r| r.fields["title"].as_str().unwrap().to_string())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Home", "Page One"]);

    let failures: Vec<FailureReport> = read_lines(&dir.path().join("failures.jsonl"));
    assert_eq!(failures.len(), 2);

    let denied = failures
        .iter()
        .find(|f| f.error_kind == ErrorKind::RobotsDenied)
        .unwrap();
    assert_eq!(denied.url, format!("{}/private/secret", server.uri()));
    assert_eq!(denied.attempts, 0);

    let missing = failures
        .iter()
        .find(|f| f.error_kind == ErrorKind::HttpStatus(404))
        .unwrap();
    assert_eq!(missing.url, format!("{}/missing", server.uri()));
    assert_eq!(missing.attempts, 1);
}

#[tokio::test]
async fn test_crawl_writes_to_sqlite() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path(), true);

    let (records, failures) = open_sinks(&config.output, "abc123").unwrap();
    crawl(&config, records, failures, CancellationToken::new())
        .await
        .unwrap();

    let conn = rusqlite::Connection::open(dir.path().join("crawl.db")).unwrap();
    let records: i64 = conn
        .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
        .unwrap();
    let failures: i64 = conn
        .query_row("SELECT COUNT(*) FROM failures", [], |row| row.get(0))
        .unwrap();
    let (hash, finished): (String, Option<String>) = conn
        .query_row("SELECT config_hash, finished_at FROM runs", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();

    assert_eq!(records, 2);
    assert_eq!(failures, 2);
    assert_eq!(hash, "abc123");
    assert!(finished.is_some());
    assert!(!dir.path().join("records.jsonl").exists());
}

#[tokio::test]
async fn test_server_error_is_retried_until_success() {
    let server = MockServer::start().await;

    // No robots.txt mock: the 404 allows everything
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<h1>Back</h1>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path(), false);
    let (records, failures) = open_sinks(&config.output, "hash").unwrap();

    let report = crawl(&config, records, failures, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.retries, 1);
    assert_eq!(report.fetch_attempts, 2);

    let records: Vec<Record> = read_lines(&dir.path().join("records.jsonl"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fields["title"], "Back");
}

#[tokio::test]
async fn test_cancelled_before_start_fetches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html("<h1>x</h1>"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(&server, dir.path(), false);
    let (records, failures) = open_sinks(&config.output, "hash").unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = crawl(&config, records, failures, cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.enqueued, 1);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.fetch_attempts, 0);
    assert!(report.is_conserved());
}

#[tokio::test]
async fn test_trailing_slash_is_fetched_as_discovered() {
    let server = MockServer::start().await;

    // Only the slash forms exist; a stripped path would 404
    Mock::given(method("GET"))
        .and(path("/docs/"))
        .respond_with(html(
            r#"<h1>Docs</h1> <a href="guide/">Guide</a> <a href="/docs">again</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/guide/"))
        .respond_with(html("<h1>Guide</h1>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&server, dir.path(), false);
    config.seeds[0].url = format!("{}/docs/", server.uri());
    let (records, failures) = open_sinks(&config.output, "hash").unwrap();

    let report = crawl(&config, records, failures, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.enqueued, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 0);

    let records: Vec<Record> = read_lines(&dir.path().join("records.jsonl"));
    let mut sources: Vec<String> = records.iter().map(|r| r.source_url.clone()).collect();
    sources.sort();
    assert_eq!(
        sources,
        vec![
            format!("{}/docs/", server.uri()),
            format!("{}/docs/guide/", server.uri())
        ]
    );
}
