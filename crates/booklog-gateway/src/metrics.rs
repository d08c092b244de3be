use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Dispatch outcomes
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_requests_total", "Total number of requests by outcome"),
        &["method", "route", "outcome"],
    )
    .unwrap()
});

pub static AUTH_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_auth_failures_total", "Rejected credentials by reason"),
        &["reason"],
    )
    .unwrap()
});

// Proxy metrics
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gateway_proxy_requests_total",
            "Total number of proxied requests",
        ),
        &["route"],
    )
    .unwrap()
});

pub static UPSTREAM_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gateway_upstream_errors_total",
            "Upstream transport failures by kind",
        ),
        &["route", "kind"],
    )
    .unwrap()
});

pub static PROXY_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "gateway_proxy_latency_seconds",
            "Time until upstream response headers arrive",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .unwrap()
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY.register(Box::new(REQUESTS_TOTAL.clone())).unwrap();
        REGISTRY.register(Box::new(AUTH_FAILURES.clone())).unwrap();
        REGISTRY
            .register(Box::new(PROXY_REQUESTS_TOTAL.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(UPSTREAM_ERRORS.clone()))
            .unwrap();
        REGISTRY.register(Box::new(PROXY_LATENCY.clone())).unwrap();
    });
}
