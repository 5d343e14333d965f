use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::Url;

use crate::proxy::Forwarder;

/// 单个后端节点：地址 + 存活标记 + 转发句柄
///
/// 存活标记只由健康检查写入，请求路径并发读取。
#[derive(Debug)]
pub struct Server {
    url: Url,
    alive: AtomicBool,
    forwarder: Forwarder,
}

impl Server {
    /// 新建节点，初始为不可用，等待第一次健康检查
    pub fn new(url: Url, client: reqwest::Client) -> Self {
        let forwarder = Forwarder::new(url.clone(), client);
        Self {
            url,
            alive: AtomicBool::new(false),
            forwarder,
        }
    }

    /// 调整转发时允许的请求 body 上限
    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.forwarder = self.forwarder.with_body_limit(max_body_bytes);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 健康检查拨号目标 host:port
    pub fn probe_target(&self) -> Option<(String, u16)> {
        let host = self.url.host_str()?.to_string();
        let port = self.url.port_or_known_default()?;
        Some((host, port))
    }
}
