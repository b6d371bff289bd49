use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Metrics はロギングサーバーの Prometheus メトリクス。
///
/// ログイベントの発行・取り込み結果と HTTP リクエストを計測する。
pub struct Metrics {
    log_events_published_total: IntCounterVec,
    log_events_consumed_total: IntCounterVec,
    http_requests_total: IntCounterVec,
    http_request_duration: HistogramVec,
    registry: Registry,
}

impl Metrics {
    /// service_name は全メトリクスの service ラベルになる。
    pub fn new(service_name: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let log_events_published_total = IntCounterVec::new(
            Opts::new(
                "log_events_published_total",
                "Total number of log events handed to the broker",
            )
            .const_label("service", service_name),
            &["result"],
        )?;

        let log_events_consumed_total = IntCounterVec::new(
            Opts::new(
                "log_events_consumed_total",
                "Total number of log event deliveries processed by the consumer",
            )
            .const_label("service", service_name),
            &["outcome"],
        )?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests")
                .const_label("service", service_name),
            &["method", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Histogram of HTTP request latency",
            )
            .const_label("service", service_name)
            .buckets(DURATION_BUCKETS.to_vec()),
            &["method"],
        )?;

        registry.register(Box::new(log_events_published_total.clone()))?;
        registry.register(Box::new(log_events_consumed_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            log_events_published_total,
            log_events_consumed_total,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    pub fn record_log_event_published(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.log_events_published_total
            .with_label_values(&[result])
            .inc();
    }

    /// outcome は persisted / requeued / retried / dead_lettered。
    pub fn record_log_event_consumed(&self, outcome: &str) {
        self.log_events_consumed_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_http_request(&self, method: &str, status: u16, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method])
            .observe(duration_secs);
    }

    /// Prometheus テキストフォーマットでメトリクスを返す。
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
