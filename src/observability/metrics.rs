use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub orders_created_total: IntCounterVec,
    pub status_transitions_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub partner_utilization: GaugeVec,
    pub realtime_events_total: IntCounterVec,
    pub stock_release_failures_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let orders_created_total = IntCounterVec::new(
            Opts::new("orders_created_total", "Orders created by payment method"),
            &["payment_method"],
        )
        .expect("valid orders_created_total metric");

        let status_transitions_total = IntCounterVec::new(
            Opts::new("status_transitions_total", "Order status transitions by target status"),
            &["status"],
        )
        .expect("valid status_transitions_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Partner assignments by mode and outcome"),
            &["mode", "outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of partner assignment in seconds",
            ),
            &["mode"],
        )
        .expect("valid assignment_latency_seconds metric");

        let partner_utilization = GaugeVec::new(
            Opts::new("partner_utilization", "Partner utilization ratio [0..1]"),
            &["partner_code"],
        )
        .expect("valid partner_utilization metric");

        let realtime_events_total = IntCounterVec::new(
            Opts::new("realtime_events_total", "Realtime events published by group kind"),
            &["group"],
        )
        .expect("valid realtime_events_total metric");

        let stock_release_failures_total = IntCounter::new(
            "stock_release_failures_total",
            "Line items whose stock could not be released on cancellation",
        )
        .expect("valid stock_release_failures_total metric");

        registry
            .register(Box::new(orders_created_total.clone()))
            .expect("register orders_created_total");
        registry
            .register(Box::new(status_transitions_total.clone()))
            .expect("register status_transitions_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(partner_utilization.clone()))
            .expect("register partner_utilization");
        registry
            .register(Box::new(realtime_events_total.clone()))
            .expect("register realtime_events_total");
        registry
            .register(Box::new(stock_release_failures_total.clone()))
            .expect("register stock_release_failures_total");

        Self {
            registry,
            orders_created_total,
            status_transitions_total,
            assignments_total,
            assignment_latency_seconds,
            partner_utilization,
            realtime_events_total,
            stock_release_failures_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
