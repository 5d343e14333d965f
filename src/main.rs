use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod health;
mod load_balancer;
mod metrics;
mod proxy;

use crate::health::HealthChecker;
use crate::load_balancer::LoadBalancer;

#[tokio::main]
async fn main() {
    // 初始化日志：若无 RUST_LOG 则默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    if let Err(err) = run().await {
        tracing::error!("fatal: {:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // 加载配置
    let path = config::config_path();
    let settings = config::load_settings(&path)
        .with_context(|| format!("Getting config from {}", path.display()))?;

    let client = proxy::build_client(&settings).context("Building upstream client")?;
    let lb = Arc::new(LoadBalancer::from_settings(&settings, client)?);
    if lb.count_services() == 0 {
        anyhow::bail!("no services configured, refusing to serve");
    }
    tracing::info!(
        services = lb.count_services(),
        policy = lb.policy_id(),
        "Load balancer ready"
    );

    // 先探测一轮，再起后台循环
    let checker = HealthChecker::new(
        lb.clone(),
        settings.proxy.health_check.interval(),
        settings.proxy.health_check.timeout(),
    );
    checker.check_all().await;
    let _health = checker.spawn();

    if let Some(admin_bind) = &settings.proxy.admin_bind {
        let admin = TcpListener::bind(admin_bind)
            .await
            .with_context(|| format!("Binding admin listener on {}", admin_bind))?;
        tracing::info!("📈 Metrics listening on http://{}/metrics", admin.local_addr()?);
        tokio::spawn(async move {
            if let Err(err) = axum::serve(admin, metrics::admin_router()).await {
                tracing::error!(error = %err, "admin listener stopped");
            }
        });
    }

    // 路由
    let app = proxy::router(lb).layer(axum::middleware::from_fn(metrics::prometheus_middleware));

    // 启动服务（带客户端地址信息）
    let listener = TcpListener::bind(settings.listen_addr())
        .await
        .with_context(|| format!("Listening on {}", settings.listen_addr()))?;
    tracing::info!("🚀 Gateway listening on http://{}", listener.local_addr()?);

    let make_svc = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_svc)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
