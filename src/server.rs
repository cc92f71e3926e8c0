use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use log::info;
use prometheus::{Encoder, Registry, TextEncoder};

/// Bind address of the metrics endpoint.
pub const METRICS_ADDR: &str = "0.0.0.0:2112";

/// Serve the Prometheus exposition endpoint until the process exits.
pub async fn serve(bind: &str, registry: Registry) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("unable to bind metrics endpoint on {bind}"))?;
    info!("metrics endpoint listening on http://{bind}/metrics");
    axum::serve(listener, app).await.context("metrics server error")?;
    Ok(())
}

async fn render_metrics(State(registry): State<Registry>) -> Response {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buf) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding error: {e}"),
        )
            .into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buf,
    )
        .into_response()
}
