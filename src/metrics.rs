use std::time::Instant;

use axum::{
    Router, extract::Request, http::StatusCode, middleware::Next, response::IntoResponse,
    routing::get,
};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};

pub static HTTP_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_http_requests_total",
        "Total HTTP requests handled",
        &["method", "status"]
    )
    .expect("register gateway_http_requests_total")
});

pub static HTTP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_request_duration_seconds",
        "Request duration histogram",
        &["method"]
    )
    .expect("register gateway_request_duration_seconds")
});

/// 只记录已配置域名，避免任意 Host 撑爆标签
pub static UPSTREAM_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_upstream_requests_total",
        "Routing outcomes per configured service domain",
        &["domain", "outcome"]
    )
    .expect("register gateway_upstream_requests_total")
});

pub static BACKEND_UP: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "gateway_backend_up",
        "Last health check verdict per backend (1 = up)",
        &["domain", "server"]
    )
    .expect("register gateway_backend_up")
});

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

// ===== Prometheus 中间件 =====
pub async fn prometheus_middleware(req: Request, next: Next) -> impl IntoResponse {
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();

    HTTP_COUNTER.with_label_values(&[method.as_str(), status.as_str()]).inc();
    HTTP_DURATION
        .with_label_values(&[method.as_str()])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// 管理端口路由：/metrics 与 /healthz，不和代理端口共用
pub fn admin_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
}
