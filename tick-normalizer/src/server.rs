use std::future::ready;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::health::HealthRegistry;

pub async fn index() -> &'static str {
    "tick normalizer"
}

/// Probe routes. `/_liveness` reflects the registry, readiness is static.
pub fn router(liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(liveness.get_status())),
        )
}

/// Install the global Prometheus recorder and expose it on `/metrics`.
pub fn with_metrics_route(router: Router) -> Result<Router, BuildError> {
    let handle = setup_metrics_recorder()?;
    Ok(router.route("/metrics", get(move || ready(handle.render()))))
}

fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    // Seconds, for the backfill and processing histograms
    const BUCKETS: &[f64] = &[
        0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await
}
