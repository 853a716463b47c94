use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters, exported on `/metrics`.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Every HTTP attempt against the upstream, including retries
    pub api_calls: AtomicU64,
    pub api_retries: AtomicU64,
    /// Calls that surfaced an error to the caller
    pub api_failures: AtomicU64,
    pub upserts: AtomicU64,
    pub upsert_failures: AtomicU64,
    /// Records dropped by validation or unresolved foreign keys
    pub records_skipped: AtomicU64,
    pub odds_snapshots: AtomicU64,
    pub line_movements: AtomicU64,
    pub cycles: AtomicU64,
    pub cycle_failures: AtomicU64,
    pub last_cycle_duration_ms: AtomicU64,
    pub webhook_events: AtomicU64,
    pub webhook_rejections: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn record_cycle(&self, duration_ms: u64, failed: bool) {
        Self::inc(&self.cycles);
        if failed {
            Self::inc(&self.cycle_failures);
        }
        self.last_cycle_duration_ms
            .store(duration_ms, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus text format
    pub fn prometheus(&self) -> String {
        let counters: [(&str, &str, &str, &AtomicU64); 13] = [
            ("ncaaf_api_calls_total", "counter", "Upstream HTTP attempts", &self.api_calls),
            ("ncaaf_api_retries_total", "counter", "Upstream retries after transient failures", &self.api_retries),
            ("ncaaf_api_failures_total", "counter", "Upstream calls that surfaced an error", &self.api_failures),
            ("ncaaf_upserts_total", "counter", "Successful store writes", &self.upserts),
            ("ncaaf_upsert_failures_total", "counter", "Failed store writes", &self.upsert_failures),
            ("ncaaf_records_skipped_total", "counter", "Provider records skipped", &self.records_skipped),
            ("ncaaf_odds_snapshots_total", "counter", "Odds snapshots appended", &self.odds_snapshots),
            ("ncaaf_line_movements_detected_total", "counter", "Line movements detected", &self.line_movements),
            ("ncaaf_sync_cycles_total", "counter", "Polling cycles run", &self.cycles),
            ("ncaaf_sync_cycle_failures_total", "counter", "Polling cycles that failed entirely", &self.cycle_failures),
            ("ncaaf_sync_cycle_duration_ms", "gauge", "Duration of the last polling cycle", &self.last_cycle_duration_ms),
            ("ncaaf_webhook_events_total", "counter", "Accepted webhook events", &self.webhook_events),
            ("ncaaf_webhook_rejections_total", "counter", "Rejected webhook deliveries", &self.webhook_rejections),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        out
    }
}
