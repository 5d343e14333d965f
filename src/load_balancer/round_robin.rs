use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::load_balancer::{Server, ServerPool};

impl ServerPool {
    /// 轮询选择：游标原子加一，然后从该位置起最多扫描一整圈找存活节点
    pub fn next_round_robin(&self) -> Option<Arc<Server>> {
        let len = self.servers.len();
        if len == 0 {
            return None;
        }

        let next = self.current.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % len;
        for offset in 0..len {
            let idx = (next + offset) % len;
            let server = &self.servers[idx];
            if server.is_alive() {
                if offset != 0 {
                    self.remember(idx);
                }
                return Some(Arc::clone(server));
            }
        }
        None
    }
}
