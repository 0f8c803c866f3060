//! Orchestrator tests against the scripted fetcher

use crate::common::{seeds, test_crawler_config, wait_until, Reply, ScriptedFetcher};
use serde_json::json;
use shoal::config::{CrawlerConfig, ExtractConfig, FieldKind, FieldRule, SeedEntry};
use shoal::crawler::{ErrorKind, Orchestrator, OrchestratorState, PageParser};
use shoal::output::{MemorySink, Record, RecordSink, SinkError, SinkResult};
use shoal::ShoalError;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(crawler: CrawlerConfig, fetcher: &Arc<ScriptedFetcher>) -> Orchestrator {
    Orchestrator::new(
        crawler,
        Arc::clone(fetcher) as Arc<dyn shoal::crawler::Fetcher>,
        PageParser::links_only().unwrap(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_is_attempted_max_retries_plus_one_times() {
    let fetcher = Arc::new(ScriptedFetcher::new().status("http://a.test/flaky", 500));
    let sink = MemorySink::new();

    let report = orchestrator(test_crawler_config(), &fetcher)
        .run(
            &seeds(&["http://a.test/flaky"]),
            Box::new(sink.clone()),
            Box::new(sink.clone()),
        )
        .await
        .unwrap();

    assert_eq!(fetcher.attempts("http://a.test/flaky"), 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.retries, 2);
    assert_eq!(report.fetch_attempts, 3);
    assert!(report.is_conserved());

    let failures = sink.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].url, "http://a.test/flaky");
    assert_eq!(failures[0].error_kind, ErrorKind::HttpStatus(500));
    assert_eq!(failures[0].attempts, 3);

    // Backoff doubles from the 100ms base
    let starts = fetcher.starts_for_host("a.test");
    assert!(starts[1] - starts[0] >= Duration::from_millis(100));
    assert!(starts[2] - starts[1] >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let fetcher = Arc::new(ScriptedFetcher::new().status("http://a.test/gone", 404));
    let sink = MemorySink::new();

    let report = orchestrator(test_crawler_config(), &fetcher)
        .run(
            &seeds(&["http://a.test/gone"]),
            Box::new(sink.clone()),
            Box::new(sink.clone()),
        )
        .await
        .unwrap();

    assert_eq!(fetcher.attempts("http://a.test/gone"), 1);
    assert_eq!(report.retries, 0);
    assert_eq!(sink.failures()[0].attempts, 1);
    assert_eq!(sink.failures()[0].error_kind, ErrorKind::HttpStatus(404));
}

#[tokio::test]
async fn test_duplicate_seeds_are_fetched_once() {
    let fetcher = Arc::new(ScriptedFetcher::new().page("http://a.test/", "<html></html>"));
    let sink = MemorySink::new();

    let report = orchestrator(test_crawler_config(), &fetcher)
        .run(
            &seeds(&["http://a.test/", "http://A.TEST:80/", "http://a.test/#top"]),
            Box::new(sink.clone()),
            Box::new(sink),
        )
        .await
        .unwrap();

    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(report.enqueued, 1);
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn test_cancel_discards_pending_and_aborts_in_flight() {
    let fetcher = Arc::new(ScriptedFetcher::new().otherwise(Reply::Hang));
    let crawler = CrawlerConfig {
        worker_count: 2,
        ..test_crawler_config()
    };
    let orchestrator = Arc::new(orchestrator(crawler, &fetcher));
    let urls: Vec<String> = (1..=7).map(|n| format!("http://host{}.test/", n)).collect();
    let urls: Vec<&str> = urls.iter().map(String::as_str).collect();
    let seeds = seeds(&urls);

    let sink = MemorySink::new();
    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        let sink = sink.clone();
        tokio::spawn(async move {
            orchestrator
                .run(&seeds, Box::new(sink.clone()), Box::new(sink))
                .await
        })
    };

    wait_until(Duration::from_secs(2), || fetcher.call_count() == 2).await;
    assert_eq!(orchestrator.state(), OrchestratorState::Running);
    orchestrator.cancel();

    let report = runner.await.unwrap().unwrap();
    assert_eq!(report.state, OrchestratorState::Stopped);
    assert!(report.cancelled);
    assert_eq!(report.enqueued, 7);
    assert_eq!(report.discarded, 5);
    assert_eq!(report.aborted, 2);
    assert_eq!(report.discarded_urls.len(), 5);
    assert_eq!(report.aborted_urls.len(), 2);
    assert_eq!(report.pending, 0);
    assert!(report.is_conserved());

    // Nothing was fetched after the cancel
    assert_eq!(fetcher.call_count(), 2);
    assert!(sink.failures().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fetches_to_one_host_are_spaced() {
    let fetcher = Arc::new(ScriptedFetcher::new().otherwise(Reply::Html("<html></html>".into())));
    let crawler = CrawlerConfig {
        worker_count: 4,
        min_interval_per_host: 500,
        ..test_crawler_config()
    };

    let report = orchestrator(crawler, &fetcher)
        .run(
            &seeds(&[
                "http://a.test/1",
                "http://a.test/2",
                "http://b.test/1",
                "http://a.test/3",
                "http://b.test/2",
                "http://a.test/4",
            ]),
            Box::new(MemorySink::new()),
            Box::new(MemorySink::new()),
        )
        .await
        .unwrap();
    assert_eq!(report.succeeded, 6);

    for host in ["a.test", "b.test"] {
        let starts = fetcher.starts_for_host(host);
        for pair in starts.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(500),
                "fetches to {} only {:?} apart",
                host,
                pair[1] - pair[0]
            );
        }
    }

    // Different hosts do not wait on each other
    let first_a = fetcher.starts_for_host("a.test")[0];
    let first_b = fetcher.starts_for_host("b.test")[0];
    assert!(first_b - first_a < Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_robots_crawl_delay_spaces_fetches() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .page("http://a.test/robots.txt", "User-agent: *\nCrawl-delay: 2\n")
            .otherwise(Reply::Html("<html></html>".into())),
    );
    let crawler = CrawlerConfig {
        worker_count: 2,
        min_interval_per_host: 0,
        respect_robots: true,
        ..test_crawler_config()
    };

    let report = orchestrator(crawler, &fetcher)
        .run(
            &seeds(&["http://a.test/1", "http://a.test/2"]),
            Box::new(MemorySink::new()),
            Box::new(MemorySink::new()),
        )
        .await
        .unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(fetcher.attempts("http://a.test/robots.txt"), 1);

    // robots.txt first, then each page at least the crawl delay after the last
    let calls = fetcher.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].0, "http://a.test/robots.txt");
    for pair in calls.windows(2) {
        assert!(
            pair[1].1 - pair[0].1 >= Duration::from_secs(2),
            "{} started only {:?} after {}",
            pair[1].0,
            pair[1].1 - pair[0].1,
            pair[0].0
        );
    }
}

#[tokio::test]
async fn test_higher_priority_seeds_are_fetched_first() {
    let fetcher = Arc::new(ScriptedFetcher::new().otherwise(Reply::Html("<html></html>".into())));
    let crawler = CrawlerConfig {
        worker_count: 1,
        ..test_crawler_config()
    };
    let seeds = vec![
        SeedEntry {
            url: "http://a.test/low".to_string(),
            priority: 0,
        },
        SeedEntry {
            url: "http://a.test/high".to_string(),
            priority: 10,
        },
        SeedEntry {
            url: "http://a.test/low-2".to_string(),
            priority: 0,
        },
    ];

    orchestrator(crawler, &fetcher)
        .run(&seeds, Box::new(MemorySink::new()), Box::new(MemorySink::new()))
        .await
        .unwrap();

    let order: Vec<String> = fetcher.calls().into_iter().map(|(url, _)| url).collect();
    assert_eq!(
        order,
        vec![
            "http://a.test/high",
            "http://a.test/low",
            "http://a.test/low-2"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_links_are_followed_within_depth_and_scope() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .page(
                "http://a.test/",
                r#"<a href="/a">A</a> <a href="/b">B</a> <a href="/c">C</a>
                   <a href="http://elsewhere.test/">off site</a>"#,
            )
            .page("http://a.test/a", r#"<a href="/d">D</a> <a href="/">home</a>"#)
            .status("http://a.test/b", 404)
            .status("http://a.test/c", 500)
            .page("http://a.test/d", r#"<a href="/e">too deep</a>"#),
    );
    let crawler = CrawlerConfig {
        max_depth: 2,
        max_retries: 1,
        ..test_crawler_config()
    };
    let sink = MemorySink::new();

    let report = orchestrator(crawler, &fetcher)
        .run(
            &seeds(&["http://a.test/"]),
            Box::new(sink.clone()),
            Box::new(sink.clone()),
        )
        .await
        .unwrap();

    assert_eq!(report.enqueued, 5);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 2);
    assert!(report.is_conserved());
    assert_eq!(fetcher.attempts("http://a.test/e"), 0);
    assert_eq!(fetcher.attempts("http://elsewhere.test/"), 0);
    assert_eq!(fetcher.attempts("http://a.test/"), 1);
    assert_eq!(fetcher.attempts("http://a.test/c"), 2);

    let mut failed: Vec<(String, u32)> = sink
        .failures()
        .into_iter()
        .map(|f| (f.url, f.attempts))
        .collect();
    failed.sort();
    assert_eq!(
        failed,
        vec![
            ("http://a.test/b".to_string(), 1),
            ("http://a.test/c".to_string(), 2)
        ]
    );
}

#[tokio::test]
async fn test_page_budget_caps_enqueued_urls() {
    let fetcher = Arc::new(ScriptedFetcher::new().page(
        "http://a.test/",
        r#"<a href="/1">1</a> <a href="/2">2</a> <a href="/3">3</a> <a href="/4">4</a>"#,
    ).otherwise(Reply::Html("<html></html>".into())));
    let crawler = CrawlerConfig {
        max_pages: 3,
        ..test_crawler_config()
    };

    let report = orchestrator(crawler, &fetcher)
        .run(
            &seeds(&["http://a.test/"]),
            Box::new(MemorySink::new()),
            Box::new(MemorySink::new()),
        )
        .await
        .unwrap();

    assert_eq!(report.enqueued, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(fetcher.call_count(), 3);
}

#[tokio::test]
async fn test_records_are_extracted_from_items() {
    let fetcher = Arc::new(ScriptedFetcher::new().page(
        "http://shop.test/books",
        r#"<ul>
             <li class="book"><h3>Dune</h3><span class="price">Price: 12 EUR</span>
                 <a href="/dune">more</a></li>
             <li class="book"><h3>Emma</h3><a href="/emma">more</a></li>
             <li class="book"><span class="price">Price: 3 EUR</span></li>
           </ul>"#,
    ));
    let extract = ExtractConfig {
        item: Some("li.book".to_string()),
        follow: "a[href]".to_string(),
        fields: vec![
            FieldRule {
                name: "title".to_string(),
                selector: Some("h3".to_string()),
                attribute: None,
                text_fallback: false,
                pattern: None,
                kind: FieldKind::Text,
                required: true,
            },
            FieldRule {
                name: "price".to_string(),
                selector: Some(".price".to_string()),
                attribute: None,
                text_fallback: false,
                pattern: Some(r"(\d+)".to_string()),
                kind: FieldKind::Number,
                required: false,
            },
            FieldRule {
                name: "link".to_string(),
                selector: Some("a".to_string()),
                attribute: Some("href".to_string()),
                text_fallback: false,
                pattern: None,
                kind: FieldKind::Url,
                required: false,
            },
        ],
    };
    let crawler = CrawlerConfig {
        max_depth: 0,
        ..test_crawler_config()
    };
    let sink = MemorySink::new();

    let report = Orchestrator::new(
        crawler,
        Arc::clone(&fetcher) as Arc<dyn shoal::crawler::Fetcher>,
        PageParser::new(&extract).unwrap(),
    )
    .run(
        &seeds(&["http://shop.test/books"]),
        Box::new(sink.clone()),
        Box::new(sink.clone()),
    )
    .await
    .unwrap();

    assert_eq!(report.records_emitted, 2);
    assert_eq!(report.enqueued, 1);

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].source_url, "http://shop.test/books");
    assert_eq!(records[0].fields["title"], json!("Dune"));
    assert_eq!(records[0].fields["price"], json!(12));
    assert_eq!(records[0].fields["link"], json!("http://shop.test/dune"));
    assert_eq!(records[1].fields["title"], json!("Emma"));
    assert_eq!(records[1].fields["price"], serde_json::Value::Null);
}

struct BrokenSink;

impl RecordSink for BrokenSink {
    fn emit(&mut self, _record: Record) -> SinkResult<()> {
        Err(SinkError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }
}

#[tokio::test]
async fn test_sink_failure_stops_the_crawl() {
    let fetcher = Arc::new(ScriptedFetcher::new().otherwise(Reply::Html("<p>x</p>".into())));
    let extract = ExtractConfig {
        fields: vec![FieldRule {
            name: "text".to_string(),
            selector: Some("p".to_string()),
            attribute: None,
            text_fallback: false,
            pattern: None,
            kind: FieldKind::Text,
            required: false,
        }],
        ..ExtractConfig::default()
    };
    let orchestrator = Orchestrator::new(
        test_crawler_config(),
        Arc::clone(&fetcher) as Arc<dyn shoal::crawler::Fetcher>,
        PageParser::new(&extract).unwrap(),
    );

    let err = orchestrator
        .run(
            &seeds(&["http://a.test/"]),
            Box::new(BrokenSink),
            Box::new(MemorySink::new()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ShoalError::Sink(_)));
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
}
