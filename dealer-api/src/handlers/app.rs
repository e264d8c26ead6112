use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use dealer_common::metrics;

use super::dealer::{self, Dealer};

pub fn app(dealer: Dealer, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop for now, just check axum health
        .route("/dealer", routing::get(dealer::get).post(dealer::post))
        .layer(TraceLayer::new_for_http())
        .with_state(dealer);

    metrics::add_metrics_routes(router, metrics)
}

pub async fn index() -> &'static str {
    "partition dealer"
}
