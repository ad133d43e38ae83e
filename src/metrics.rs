use tracing::trace;

// Lightweight metrics helpers; request counters surface as trace events so
// log pipelines can aggregate them without extra recorder wiring.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "gasbora.metrics",
        route = route,
        "requests_total_inc"
    );
}
