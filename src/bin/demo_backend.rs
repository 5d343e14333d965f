use axum::{Json, Router, extract::Request};
use serde_json::{Value, json};

// 本地演示用后端：demo_backend <port>
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "8081".to_string())
        .parse()?;

    let app = Router::new().fallback(move |req: Request| handle(port, req));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Backend {} listening on http://{}", port, listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle(port: u16, req: Request) -> Json<Value> {
    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Json(json!({
        "backend": port,
        "method": req.method().as_str(),
        "path": req.uri().to_string(),
        "forwarded_for": forwarded_for,
    }))
}
