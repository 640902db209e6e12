//! Prometheus metrics.
//!
//! HTTP request metrics come from `axum-prometheus`. The pipeline records its own counters through
//! the `metrics` facade, which the same Prometheus recorder renders at `/internal/metrics`:
//!
//! - `blobsense_analyses_total{mode}` - dispatched analyses by mode
//! - `blobsense_image_fallbacks_total` - direct image submissions retried inline
//! - `blobsense_cleanups_total{outcome}` - fired cleanups by outcome (`deleted`, `skipped`, `failed`)

use axum::Router;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;

pub const ANALYSES_TOTAL: &str = "blobsense_analyses_total";
pub const IMAGE_FALLBACKS_TOTAL: &str = "blobsense_image_fallbacks_total";
pub const CLEANUPS_TOTAL: &str = "blobsense_cleanups_total";

fn describe_counters() {
    ::metrics::describe_counter!(ANALYSES_TOTAL, "Analyses dispatched, by analysis mode");
    ::metrics::describe_counter!(IMAGE_FALLBACKS_TOTAL, "Image analyses retried with inline content");
    ::metrics::describe_counter!(CLEANUPS_TOTAL, "Post-analysis cleanups, by outcome");
}

/// Add the metrics endpoint and the HTTP metrics layer to `router`.
pub fn instrument(router: Router) -> Router {
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
    describe_counters();

    router
        .route("/internal/metrics", get(move || async move { metric_handle.render() }))
        .layer(prometheus_layer)
}
