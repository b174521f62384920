//! 随机均衡器

use super::node::direct::DirectNodeBuilder;
use super::{
    err_no_available, Balancer, BalancerBuilder, DefaultSelectorBuilder, DoneFunc, WeightedNode,
};
use crate::error::Result;
use crate::transport::CallContext;
use rand::Rng;
use std::sync::Arc;

/// 均衡器名称
pub const NAME: &str = "random";

/// 随机均衡器
#[derive(Default)]
pub struct RandomBalancer;

impl Balancer for RandomBalancer {
    fn pick(
        &self,
        _ctx: &CallContext,
        nodes: &[Arc<dyn WeightedNode>],
    ) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        if nodes.is_empty() {
            return Err(err_no_available());
        }
        let index = rand::thread_rng().gen_range(0..nodes.len());
        let selected = nodes[index].clone();
        let done = selected.pick();
        Ok((selected, done))
    }
}

/// 随机均衡器构建器
#[derive(Default)]
pub struct RandomBalancerBuilder;

impl BalancerBuilder for RandomBalancerBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(RandomBalancer)
    }
}

/// 带随机均衡器的选择器构建器
pub fn builder() -> DefaultSelectorBuilder {
    DefaultSelectorBuilder::new(Arc::new(DirectNodeBuilder), Arc::new(RandomBalancerBuilder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceInstance;
    use crate::selector::{Node, SelectOptions, SelectorBuilder};

    #[test]
    fn test_single_node_always_picked() {
        let selector = builder().build();
        let ins = ServiceInstance::new("1", "echo", "v1");
        selector.apply(vec![Node::new("http", "127.0.0.1:8000", &ins)]);
        for _ in 0..8 {
            let (node, done) =
                selector.select(&CallContext::background(), SelectOptions::new()).unwrap();
            assert_eq!(node.address(), "127.0.0.1:8000");
            done(&CallContext::background(), Default::default());
        }
    }

    #[test]
    fn test_all_nodes_reachable() {
        let selector = builder().build();
        let ins = ServiceInstance::new("1", "echo", "v1");
        selector.apply(vec![
            Node::new("http", "127.0.0.1:8000", &ins),
            Node::new("http", "127.0.0.1:8001", &ins),
            Node::new("http", "127.0.0.1:8002", &ins),
        ]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..600 {
            let (node, done) =
                selector.select(&CallContext::background(), SelectOptions::new()).unwrap();
            *counts.entry(node.address().to_string()).or_insert(0usize) += 1;
            done(&CallContext::background(), Default::default());
        }
        assert_eq!(counts.len(), 3);
        for (_, c) in counts {
            assert!(c > 100, "uniform pick should visit every node");
        }
    }
}
