use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::load_balancer::Policy;
use crate::proxy::DEFAULT_MAX_BODY_BYTES;

const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("loading config: {0}")]
    Load(#[from] config::ConfigError),
    #[error("no services configured")]
    NoServices,
    #[error("not a valid load balancing policy in config: {0:?}")]
    InvalidPolicy(String),
    #[error("service {0:?} has an empty domain")]
    EmptyDomain(String),
    #[error("domain {0:?} is declared by more than one service")]
    DuplicateDomain(String),
    #[error("invalid backend host {host:?} in service {service:?}: {reason}")]
    InvalidHost {
        service: String,
        host: String,
        reason: String,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Listen {
    #[serde(default = "default_listen_address")]
    pub address: String,
    pub port: u16,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostSettings {
    pub address: String,
    pub port: u16,
}

impl HostSettings {
    /// 拼出后端地址，缺少 scheme 时补 http://
    pub fn url(&self, service: &str) -> Result<reqwest::Url, ConfigError> {
        let raw = if self.address.contains("://") {
            format!("{}:{}", self.address, self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        };
        let invalid = |reason: String| ConfigError::InvalidHost {
            service: service.to_string(),
            host: format!("{}:{}", self.address, self.port),
            reason,
        };
        let url = reqwest::Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        // 地址里带路径时端口会被拼进路径
        if url.path() != "/" || url.query().is_some() {
            return Err(invalid("address must not contain a path or query".to_string()));
        }
        Ok(url)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceSettings {
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub hosts: Vec<HostSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthCheckSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_interval_secs() -> u64 {
    20
}

fn default_timeout_secs() -> u64 {
    2
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HealthCheckSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxySettings {
    pub lb_policy: String,
    pub listen: Listen,
    #[serde(default)]
    pub services: Vec<ServiceSettings>,
    #[serde(default)]
    pub health_check: HealthCheckSettings,
    pub request_timeout_secs: Option<u64>,
    pub max_body_bytes: Option<usize>,
    pub admin_bind: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub proxy: ProxySettings,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.request_timeout_secs.unwrap_or(30))
    }

    pub fn max_body_bytes(&self) -> usize {
        self.proxy.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.proxy.listen.address, self.proxy.listen.port)
    }

    /// 启动前校验：任何错误都是致命的
    pub fn validate(&self) -> Result<(), ConfigError> {
        let proxy = &self.proxy;
        if proxy.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        if proxy.lb_policy.parse::<Policy>().is_err() {
            return Err(ConfigError::InvalidPolicy(proxy.lb_policy.clone()));
        }

        let mut domains = HashSet::new();
        for svc in &proxy.services {
            if svc.domain.is_empty() {
                return Err(ConfigError::EmptyDomain(svc.name.clone()));
            }
            if !domains.insert(svc.domain.as_str()) {
                return Err(ConfigError::DuplicateDomain(svc.domain.clone()));
            }
            for host in &svc.hosts {
                host.url(&svc.name)?;
            }
        }
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    config_path_from(std::env::var("GATEWAY_CONFIG").ok())
}

fn config_path_from(var: Option<String>) -> PathBuf {
    var.filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// GATEWAY_PROXY__LB_POLICY=RANDOM 覆盖 proxy.lb_policy
fn gateway_env() -> config::Environment {
    config::Environment::with_prefix("GATEWAY")
        .prefix_separator("_")
        .separator("__")
}

pub fn load_settings(path: &std::path::Path) -> Result<Settings, ConfigError> {
    // also load .env
    dotenvy::dotenv().ok();
    load_settings_from(path, gateway_env())
}

fn load_settings_from(
    path: &std::path::Path,
    env: config::Environment,
) -> Result<Settings, ConfigError> {
    let c = config::Config::builder()
        .add_source(config::File::new(&path.to_string_lossy(), config::FileFormat::Yaml))
        .add_source(env)
        .build()?;
    let settings = c.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}
