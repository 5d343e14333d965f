pub mod pool;
pub mod random;
pub mod round_robin;
pub mod server;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ConfigError, Settings};

pub use pool::ServerPool;
pub use server::Server;

/// 负载均衡策略，只有两种，新增需要重新编译
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    RoundRobin,
    Random,
}

#[derive(Debug, Error)]
#[error("unknown load balancing policy {0:?}")]
pub struct UnknownPolicy(pub String);

impl FromStr for Policy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROUND_ROBIN" => Ok(Policy::RoundRobin),
            "RANDOM" => Ok(Policy::Random),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no live server in pool")]
    NoPeer,
    #[error("Not a valid load balancing policy in config: {0}")]
    InvalidPolicy(String),
}

/// 域名 -> 后端池 的绑定
#[derive(Debug)]
pub struct Service {
    pub name: String,
    pub domain: String,
    pub pool: ServerPool,
}

/// 按域名索引的服务表 + 全局策略，构造后只读
#[derive(Debug)]
pub struct LoadBalancer {
    services: HashMap<String, Service>,
    policy_id: String,
    policy: Option<Policy>,
}

impl LoadBalancer {
    /// 策略标识不合法时仍可构造，选择时返回 `InvalidPolicy`
    pub fn new(policy_id: impl Into<String>, services: Vec<Service>) -> Self {
        let policy_id = policy_id.into();
        let policy = policy_id.parse::<Policy>().ok();

        let mut by_domain = HashMap::with_capacity(services.len());
        for svc in services {
            let domain = svc.domain.clone();
            if by_domain.insert(domain.clone(), svc).is_some() {
                warn!(domain = %domain, "duplicate service domain, last definition wins");
            }
        }

        Self {
            services: by_domain,
            policy_id,
            policy,
        }
    }

    /// 从配置构建所有服务和后端池，所有后端共享一个 HTTP 客户端
    pub fn from_settings(
        settings: &Settings,
        client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let mut services = Vec::with_capacity(settings.proxy.services.len());
        for svc in &settings.proxy.services {
            let mut servers = Vec::with_capacity(svc.hosts.len());
            for host in &svc.hosts {
                let url = host.url(&svc.name)?;
                debug!(service = %svc.name, server = %url, "registering backend");
                let server =
                    Server::new(url, client.clone()).with_body_limit(settings.max_body_bytes());
                servers.push(Arc::new(server));
            }
            services.push(Service {
                name: svc.name.clone(),
                domain: svc.domain.clone(),
                pool: ServerPool::new(servers),
            });
        }
        Ok(Self::new(settings.proxy.lb_policy.clone(), services))
    }

    pub fn count_services(&self) -> usize {
        self.services.len()
    }

    pub fn service(&self, domain: &str) -> Option<&Service> {
        self.services.get(domain)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    /// 按配置的策略从池中选出下一个存活节点
    pub fn next_peer(&self, pool: &ServerPool) -> Result<Arc<Server>, SelectError> {
        let picked = match self.policy {
            Some(Policy::RoundRobin) => pool.next_round_robin(),
            Some(Policy::Random) => pool.next_random(),
            None => return Err(SelectError::InvalidPolicy(self.policy_id.clone())),
        };
        picked.ok_or(SelectError::NoPeer)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// 测试用后端池，第 i 个节点端口为 8000 + i
    pub fn pool_with(alive: &[bool]) -> ServerPool {
        let client = reqwest::Client::new();
        let servers = alive
            .iter()
            .enumerate()
            .map(|(i, &up)| {
                let url = reqwest::Url::parse(&format!("http://127.0.0.1:{}", 8000 + i)).unwrap();
                let server = Server::new(url, client.clone());
                server.set_alive(up);
                Arc::new(server)
            })
            .collect();
        ServerPool::new(servers)
    }

    pub fn service(domain: &str, alive: &[bool]) -> Service {
        Service {
            name: domain.split('.').next().unwrap_or(domain).to_string(),
            domain: domain.to_string(),
            pool: pool_with(alive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::service;
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!("ROUND_ROBIN".parse::<Policy>().unwrap(), Policy::RoundRobin);
        assert_eq!("RANDOM".parse::<Policy>().unwrap(), Policy::Random);
        assert!("round_robin".parse::<Policy>().is_err());
        assert!("UNKNOWN".parse::<Policy>().is_err());
    }

    #[test]
    fn test_lookup_and_count() {
        let lb = LoadBalancer::new(
            "ROUND_ROBIN",
            vec![service("service1.com", &[true]), service("service2.com", &[true, true])],
        );
        assert_eq!(lb.count_services(), 2);
        assert_eq!(lb.service("service2.com").unwrap().pool.len(), 2);
        assert!(lb.service("service3.com").is_none());
        // 精确匹配，不去端口
        assert!(lb.service("service1.com:80").is_none());
    }

    #[test]
    fn test_next_peer_round_robin() {
        let lb = LoadBalancer::new("ROUND_ROBIN", vec![service("a.com", &[true, true])]);
        let pool = &lb.service("a.com").unwrap().pool;

        let first = lb.next_peer(pool).unwrap();
        let second = lb.next_peer(pool).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_next_peer_random() {
        let lb = LoadBalancer::new("RANDOM", vec![service("a.com", &[true])]);
        let pool = &lb.service("a.com").unwrap().pool;
        assert!(lb.next_peer(pool).is_ok());
    }

    #[test]
    fn test_next_peer_no_peer() {
        let lb = LoadBalancer::new("ROUND_ROBIN", vec![service("a.com", &[false, false])]);
        let pool = &lb.service("a.com").unwrap().pool;
        assert_eq!(lb.next_peer(pool).unwrap_err(), SelectError::NoPeer);

        let lb = LoadBalancer::new("RANDOM", vec![service("b.com", &[])]);
        let pool = &lb.service("b.com").unwrap().pool;
        assert_eq!(lb.next_peer(pool).unwrap_err(), SelectError::NoPeer);
    }

    #[test]
    fn test_next_peer_invalid_policy() {
        let lb = LoadBalancer::new("UNKNOWN", vec![service("a.com", &[true])]);
        let pool = &lb.service("a.com").unwrap().pool;
        assert_eq!(
            lb.next_peer(pool).unwrap_err(),
            SelectError::InvalidPolicy("UNKNOWN".to_string())
        );
    }

    #[test]
    fn test_duplicate_domain_last_wins() {
        let lb = LoadBalancer::new(
            "ROUND_ROBIN",
            vec![service("a.com", &[true]), service("a.com", &[true, true, true])],
        );
        assert_eq!(lb.count_services(), 1);
        assert_eq!(lb.service("a.com").unwrap().pool.len(), 3);
    }
}
