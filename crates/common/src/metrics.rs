use std::sync::{Arc, OnceLock};

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    fragments_dispatched: CounterVec,
    fragment_time_seconds: HistogramVec,
    partial_tables_collected: CounterVec,
    plan_executions: CounterVec,
    plan_time_seconds: HistogramVec,
    site_failures: CounterVec,
    chunked_rounds: CounterVec,
    chunked_rows: CounterVec,
    chunked_stalls: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_fragment(&self, fragment_id: u64, scope: &str, secs: f64) {
        let fragment = fragment_id.to_string();
        self.inner
            .fragments_dispatched
            .with_label_values(&[fragment.as_str(), scope])
            .inc();
        self.inner
            .fragment_time_seconds
            .with_label_values(&[fragment.as_str()])
            .observe(secs.max(0.0));
    }

    pub fn record_partial_table(&self, dependency_id: u32) {
        self.inner
            .partial_tables_collected
            .with_label_values(&[dependency_id.to_string().as_str()])
            .inc();
    }

    pub fn record_plan(&self, outcome: &str, secs: f64) {
        self.inner
            .plan_executions
            .with_label_values(&[outcome])
            .inc();
        self.inner
            .plan_time_seconds
            .with_label_values(&[outcome])
            .observe(secs.max(0.0));
    }

    pub fn inc_site_failures(&self, site_id: u64, kind: &str) {
        self.inner
            .site_failures
            .with_label_values(&[site_id.to_string().as_str(), kind])
            .inc();
    }

    pub fn record_chunked_round(&self, procedure: &str, rows: u64) {
        self.inner
            .chunked_rounds
            .with_label_values(&[procedure])
            .inc();
        self.inner
            .chunked_rows
            .with_label_values(&[procedure])
            .inc_by(rows as f64);
    }

    pub fn inc_chunked_stalls(&self, procedure: &str) {
        self.inner
            .chunked_stalls
            .with_label_values(&[procedure])
            .inc();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let fragments_dispatched = counter_vec(
            &registry,
            "sysproc_fragments_dispatched_total",
            "Fragment executions dispatched to sites",
            &["fragment_id", "scope"],
        );
        let fragment_time_seconds = histogram_vec(
            &registry,
            "sysproc_fragment_time_seconds",
            "Site-side fragment execution time",
            &["fragment_id"],
        );
        let partial_tables_collected = counter_vec(
            &registry,
            "sysproc_partial_tables_collected_total",
            "Partial result tables filed under a dependency id",
            &["dependency_id"],
        );
        let plan_executions = counter_vec(
            &registry,
            "sysproc_plan_executions_total",
            "Plan executions by terminal state",
            &["outcome"],
        );
        let plan_time_seconds = histogram_vec(
            &registry,
            "sysproc_plan_time_seconds",
            "Wall-clock time of plan executions",
            &["outcome"],
        );
        let site_failures = counter_vec(
            &registry,
            "sysproc_site_failures_total",
            "Site aborts and disconnects observed by the coordinator",
            &["site_id", "kind"],
        );

        let chunked_rounds = counter_vec(
            &registry,
            "sysproc_chunked_rounds_total",
            "Rounds executed by chunked procedures",
            &["procedure"],
        );
        let chunked_rows = counter_vec(
            &registry,
            "sysproc_chunked_rows_total",
            "Rows processed by chunked procedures",
            &["procedure"],
        );
        let chunked_stalls = counter_vec(
            &registry,
            "sysproc_chunked_stalls_total",
            "Rounds that made no progress while rows remained",
            &["procedure"],
        );

        Self {
            registry,
            fragments_dispatched,
            fragment_time_seconds,
            partial_tables_collected,
            plan_executions,
            plan_time_seconds,
            site_failures,
            chunked_rounds,
            chunked_rows,
            chunked_stalls,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
