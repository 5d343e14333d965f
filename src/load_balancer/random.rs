use std::sync::Arc;
use std::sync::atomic::Ordering;

use rand::Rng;

use crate::load_balancer::{Server, ServerPool};

impl ServerPool {
    /// 随机选择：每次调用用线程本地随机源抽一次
    pub fn next_random(&self) -> Option<Arc<Server>> {
        self.next_random_with(&mut rand::thread_rng())
    }

    /// 只抽一次，抽到的节点不可用就直接返回 None，不换下标重试
    pub fn next_random_with<R: Rng>(&self, rng: &mut R) -> Option<Arc<Server>> {
        let len = self.servers.len();
        if len == 0 {
            return None;
        }

        let idx = rng.gen_range(0..len);
        let server = &self.servers[idx];
        if !server.is_alive() {
            return None;
        }
        if idx != self.current.load(Ordering::Relaxed) {
            self.remember(idx);
        }
        Some(Arc::clone(server))
    }
}
