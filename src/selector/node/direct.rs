//! 直接加权节点
//!
//! 有效权重就是注册时声明的初始权重，完成回调不做任何统计。
//! random 与 wrr 均衡器使用这种节点。

use crate::selector::{DoneFunc, Node, WeightedNode, WeightedNodeBuilder};
use crate::utils::clock::now_nanos;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 未声明权重时的默认值
const DEFAULT_WEIGHT: f64 = 100.0;

/// 直接节点
pub struct DirectNode {
    node: Node,
    last_pick: AtomicI64,
}

impl WeightedNode for DirectNode {
    fn raw(&self) -> &Node {
        &self.node
    }

    fn weight(&self) -> f64 {
        self.node.initial_weight().map(|w| w as f64).unwrap_or(DEFAULT_WEIGHT)
    }

    fn pick(&self) -> DoneFunc {
        self.last_pick.store(now_nanos(), Ordering::Release);
        Box::new(|_ctx, _info| {})
    }

    fn pick_elapsed(&self) -> Duration {
        let elapsed = now_nanos() - self.last_pick.load(Ordering::Acquire);
        Duration::from_nanos(elapsed.max(0) as u64)
    }
}

/// 直接节点构建器
#[derive(Default)]
pub struct DirectNodeBuilder;

impl WeightedNodeBuilder for DirectNodeBuilder {
    fn build(&self, node: Node) -> Arc<dyn WeightedNode> {
        Arc::new(DirectNode { node, last_pick: AtomicI64::new(0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceInstance;

    #[test]
    fn test_weight_defaults_to_100() {
        let builder = DirectNodeBuilder;
        let plain = ServiceInstance::new("1", "echo", "v1");
        let node = builder.build(Node::new("http", "127.0.0.1:8000", &plain));
        assert_eq!(node.weight(), 100.0);
    }

    #[test]
    fn test_weight_uses_initial_weight() {
        let builder = DirectNodeBuilder;
        let weighted = ServiceInstance::new("1", "echo", "v1")
            .with_metadata([("weight".to_string(), "30".to_string())].into());
        let node = builder.build(Node::new("http", "127.0.0.1:8000", &weighted));
        assert_eq!(node.weight(), 30.0);
    }

    #[test]
    fn test_pick_stamps_last_pick() {
        let builder = DirectNodeBuilder;
        let node = builder.build(Node::direct("http", "127.0.0.1:8000"));
        let done = node.pick();
        assert!(node.pick_elapsed() < Duration::from_secs(1));
        done(&crate::transport::CallContext::background(), Default::default());
    }
}
