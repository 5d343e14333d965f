use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::load_balancer::{LoadBalancer, Server};
use crate::metrics::BACKEND_UP;

/// 后台健康检查：定期对每个后端做 TCP 拨号探测并更新存活标记
pub struct HealthChecker {
    lb: Arc<LoadBalancer>,
    interval: Duration,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(lb: Arc<LoadBalancer>, interval: Duration, timeout: Duration) -> Self {
        Self {
            lb,
            interval,
            timeout,
        }
    }

    /// 探测所有服务的所有后端，一轮内并发执行
    pub async fn check_all(&self) {
        let mut probes = JoinSet::new();
        for svc in self.lb.services() {
            if svc.pool.is_empty() {
                warn!(service = %svc.name, domain = %svc.domain, "service has no backends");
                continue;
            }
            debug!(
                service = %svc.name,
                domain = %svc.domain,
                servers = svc.pool.len(),
                "Starting health check"
            );
            for server in svc.pool.servers() {
                let server = Arc::clone(server);
                let domain = svc.domain.clone();
                let timeout = self.timeout;
                probes.spawn(async move {
                    let alive = probe(&server, timeout).await;
                    server.set_alive(alive);
                    BACKEND_UP
                        .with_label_values(&[domain.as_str(), server.url().as_str()])
                        .set(i64::from(alive));
                    let status = if alive { "up" } else { "down" };
                    info!(domain = %domain, server = %server.url(), status, "health check");
                });
            }
        }

        while let Some(res) = probes.join_next().await {
            if let Err(err) = res {
                warn!(error = %err, "health probe task failed");
            }
        }
    }

    /// 启动后台循环，进程存活期间一直运行
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            timeout_secs = self.timeout.as_secs_f64(),
            "Started health check background task"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即返回，启动时已探测过一轮
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.check_all().await;
            }
        })
    }
}

/// 仅做连接探测，不发送任何数据
pub async fn probe(server: &Server, timeout: Duration) -> bool {
    let Some((host, port)) = server.probe_target() else {
        warn!(server = %server.url(), "backend url has no host or port");
        return false;
    };

    match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            debug!(server = %server.url(), error = %err, "Service unreachable");
            false
        }
        Err(_) => {
            debug!(server = %server.url(), "Service unreachable: connect timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{ServerPool, Service};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn lb_for(addr: SocketAddr) -> Arc<LoadBalancer> {
        let url = reqwest::Url::parse(&format!("http://{}", addr)).unwrap();
        let server = Arc::new(Server::new(url, reqwest::Client::new()));
        Arc::new(LoadBalancer::new(
            "ROUND_ROBIN",
            vec![Service {
                name: "svc".to_string(),
                domain: "svc.local".to_string(),
                pool: ServerPool::new(vec![server]),
            }],
        ))
    }

    fn first_server(lb: &LoadBalancer) -> Arc<Server> {
        Arc::clone(&lb.service("svc.local").unwrap().pool.servers()[0])
    }

    #[tokio::test]
    async fn test_marks_reachable_and_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let lb = lb_for(addr);
        let checker =
            HealthChecker::new(lb.clone(), Duration::from_secs(20), Duration::from_secs(2));

        checker.check_all().await;
        assert!(first_server(&lb).is_alive());

        drop(listener);
        checker.check_all().await;
        assert!(!first_server(&lb).is_alive());
    }

    #[tokio::test]
    async fn test_server_comes_back_after_next_cycle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let lb = lb_for(addr);
        let checker =
            HealthChecker::new(lb.clone(), Duration::from_secs(20), Duration::from_secs(2));

        checker.check_all().await;
        assert!(!first_server(&lb).is_alive());

        let _listener = TcpListener::bind(addr).await.unwrap();
        checker.check_all().await;
        assert!(first_server(&lb).is_alive());
    }

    #[tokio::test]
    async fn test_background_loop_updates_flags() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let lb = lb_for(addr);
        assert!(!first_server(&lb).is_alive());

        let handle =
            HealthChecker::new(lb.clone(), Duration::from_millis(50), Duration::from_secs(1))
                .spawn();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(first_server(&lb).is_alive());

        handle.abort();
        drop(listener);
    }

    #[tokio::test]
    async fn test_probe_unresolvable_host() {
        let url = reqwest::Url::parse("http://nonexistent.invalid:8080").unwrap();
        let server = Server::new(url, reqwest::Client::new());
        assert!(!probe(&server, Duration::from_secs(2)).await);
    }
}
