//! Prometheus metrics for the lifecycle jobs and the HTTP boundary.
//!
//! Metrics live in a registry owned by [`Metrics`] rather than the global
//! default one, so several instances can coexist in one process (tests).

use prometheus::{opts, Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    discovered_total: IntCounterVec,
    deleted_total: IntCounterVec,
    extensions_total: IntCounterVec,
    tokens_issued_total: IntCounter,
    job_runs_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let discovered_total = IntCounterVec::new(
            opts!(
                "env_cleaner_discovered_total",
                "Environments newly written to the registry by crawlers"
            ),
            &["type"],
        )?;
        let deleted_total = IntCounterVec::new(
            opts!(
                "env_cleaner_deleted_total",
                "Outdated environments reclaimed (or announced in dry-run)"
            ),
            &["type", "dry_run"],
        )?;
        let extensions_total = IntCounterVec::new(
            opts!("env_cleaner_extensions_total", "Extension requests by outcome"),
            &["outcome"],
        )?;
        let tokens_issued_total = IntCounter::with_opts(opts!(
            "env_cleaner_tokens_issued_total",
            "Extension tokens issued by the stale notifier"
        ))?;
        let job_runs_total = IntCounterVec::new(
            opts!("env_cleaner_job_runs_total", "Periodic job runs by result"),
            &["job", "result"],
        )?;

        registry.register(Box::new(discovered_total.clone()))?;
        registry.register(Box::new(deleted_total.clone()))?;
        registry.register(Box::new(extensions_total.clone()))?;
        registry.register(Box::new(tokens_issued_total.clone()))?;
        registry.register(Box::new(job_runs_total.clone()))?;

        Ok(Self {
            registry,
            discovered_total,
            deleted_total,
            extensions_total,
            tokens_issued_total,
            job_runs_total,
        })
    }

    pub fn discovered(&self, kind: &str, count: u64) {
        self.discovered_total.with_label_values(&[kind]).inc_by(count);
    }

    pub fn deleted(&self, kind: &str, dry_run: bool) {
        let dry_run = if dry_run { "true" } else { "false" };
        self.deleted_total.with_label_values(&[kind, dry_run]).inc();
    }

    pub fn extension(&self, outcome: &str) {
        self.extensions_total.with_label_values(&[outcome]).inc();
    }

    pub fn token_issued(&self) {
        self.tokens_issued_total.inc();
    }

    pub fn job_run(&self, job: &str, result: &str) {
        self.job_runs_total.with_label_values(&[job, result]).inc();
    }

    /// Text exposition format for `GET /metrics`.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
