use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::Server;

/// 一个服务的后端列表及共享游标
///
/// 节点列表在构造后固定不变；游标由所有请求并发推进。
#[derive(Debug)]
pub struct ServerPool {
    pub(super) servers: Vec<Arc<Server>>,
    pub(super) current: AtomicUsize,
}

impl ServerPool {
    pub fn new(servers: Vec<Arc<Server>>) -> Self {
        Self {
            servers,
            current: AtomicUsize::new(0),
        }
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    #[cfg(test)]
    pub fn cursor(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// 尽力记录最近一次命中的位置，并发下丢失无妨
    pub(super) fn remember(&self, idx: usize) {
        self.current.store(idx, Ordering::Relaxed);
    }
}
