//! End-of-crawl statistics
//!
//! Printed to stderr so they never interleave with records streamed to stdout.

use crate::crawler::CrawlReport;

/// Share of settled URLs that succeeded, as a percentage
pub fn success_rate(report: &CrawlReport) -> f64 {
    let settled = report.succeeded + report.failed;
    if settled == 0 {
        return 0.0;
    }
    (report.succeeded as f64 / settled as f64) * 100.0
}

/// Prints the crawl report in a formatted manner
pub fn print_report(report: &CrawlReport) {
    eprintln!("=== Crawl Statistics ===\n");

    eprintln!("Overview:");
    eprintln!("  Final state: {}", report.state);
    if report.cancelled {
        eprintln!("  Cancelled: yes");
    }
    eprintln!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    eprintln!("  Unique URLs: {}", report.enqueued);
    eprintln!("  Fetch attempts: {}", report.fetch_attempts);
    eprintln!("  Retries: {}", report.retries);
    eprintln!();

    eprintln!("Outcomes:");
    eprintln!("  Succeeded: {}", report.succeeded);
    eprintln!("  Failed: {}", report.failed);
    eprintln!("  Discarded: {}", report.discarded);
    eprintln!("  Aborted: {}", report.aborted);
    if report.pending > 0 {
        eprintln!("  Unsettled: {}", report.pending);
    }
    eprintln!();

    eprintln!("Output:");
    eprintln!("  Records emitted: {}", report.records_emitted);
    eprintln!("  Links discovered: {}", report.links_discovered);
    eprintln!("  Failure reports: {}", report.failures_reported);
    eprintln!();

    if !report.discarded_urls.is_empty() {
        eprintln!("Discarded URLs ({}):", report.discarded_urls.len());
        for url in report.discarded_urls.iter().take(20) {
            eprintln!("  - {}", url);
        }
        if report.discarded_urls.len() > 20 {
            eprintln!("  ... and {} more", report.discarded_urls.len() - 20);
        }
        eprintln!();
    }

    eprintln!(
        "Success Rate: {:.1}% ({} / {} settled pages)",
        success_rate(report),
        report.succeeded,
        report.succeeded + report.failed
    );
}
