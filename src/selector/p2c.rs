//! 两次随机选择均衡器
//!
//! 随机抽取两个不同节点，取实时权重更高者。落选节点超过 3 秒
//! 未被选中时抢占单槽探测位强制选取一次，借机刷新其延迟与成功率。

use super::node::ewma::EwmaNodeBuilder;
use super::{
    err_no_available, Balancer, BalancerBuilder, DefaultSelectorBuilder, DoneFunc, WeightedNode,
};
use crate::error::Result;
use crate::transport::CallContext;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 均衡器名称
pub const NAME: &str = "p2c";

/// 强制探测间隔
const FORCE_PICK: Duration = Duration::from_secs(3);

/// p2c 均衡器
pub struct P2cBalancer {
    rng: Mutex<StdRng>,
    picked: AtomicI64,
}

impl P2cBalancer {
    fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            picked: AtomicI64::new(0),
        }
    }

    /// 随机抽取两个不同下标
    fn pre_pick(&self, len: usize) -> (usize, usize) {
        let mut rng = self.rng.lock().unwrap();
        let a = rng.gen_range(0..len);
        let mut b = rng.gen_range(0..len - 1);
        if b >= a {
            b += 1;
        }
        (a, b)
    }
}

impl Balancer for P2cBalancer {
    fn pick(
        &self,
        _ctx: &CallContext,
        nodes: &[Arc<dyn WeightedNode>],
    ) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        if nodes.is_empty() {
            return Err(err_no_available());
        }
        if nodes.len() == 1 {
            let node = nodes[0].clone();
            let done = node.pick();
            return Ok((node, done));
        }

        let (a, b) = self.pre_pick(nodes.len());
        let (node_a, node_b) = (nodes[a].clone(), nodes[b].clone());
        let (mut pc, upc) = if node_b.weight() > node_a.weight() {
            (node_b, node_a)
        } else {
            (node_a, node_b)
        };

        // 落选节点长期未被选中时强制选取一次，触发统计更新
        if upc.pick_elapsed() > FORCE_PICK
            && self
                .picked
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            pc = upc;
            self.picked.store(0, Ordering::Release);
        }

        let done = pc.pick();
        Ok((pc, done))
    }
}

/// p2c 均衡器构建器
#[derive(Default)]
pub struct P2cBalancerBuilder;

impl BalancerBuilder for P2cBalancerBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(P2cBalancer::new())
    }
}

/// 带 p2c 均衡器与 EWMA 节点的选择器构建器
pub fn builder() -> DefaultSelectorBuilder {
    DefaultSelectorBuilder::new(Arc::new(EwmaNodeBuilder::default()), Arc::new(P2cBalancerBuilder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceInstance;
    use crate::selector::{DoneInfo, Node, SelectOptions, Selector, SelectorBuilder};
    use std::collections::HashMap;

    fn weighted_instance(id: &str, weight: i64) -> ServiceInstance {
        ServiceInstance::new(id, "echo", "v1")
            .with_metadata([("weight".to_string(), weight.to_string())].into())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_equal_weight_nodes_all_alive() {
        // 三个等权节点，9000 次并发选取、每次 10ms 后完成，
        // 每个节点的选取次数应落在 [1500, 4500]。
        let selector: Arc<dyn Selector> = builder().build();
        selector.apply(vec![
            Node::new("http", "127.0.0.0:8080", &weighted_instance("0", 10)),
            Node::new("http", "127.0.0.1:8080", &weighted_instance("1", 10)),
            Node::new("http", "127.0.0.2:8080", &weighted_instance("2", 10)),
        ]);

        let counts = Arc::new(std::sync::Mutex::new(HashMap::<String, usize>::new()));
        let mut handles = Vec::new();
        for _ in 0..9000 {
            let selector = selector.clone();
            let counts = counts.clone();
            handles.push(tokio::spawn(async move {
                let ctx = CallContext::background();
                let (node, done) = selector.select(&ctx, SelectOptions::new()).unwrap();
                counts.lock().unwrap().entry(node.address().to_string()).and_modify(|c| *c += 1).or_insert(1);
                tokio::time::sleep(Duration::from_millis(10)).await;
                done(&ctx, DoneInfo::default());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let counts = counts.lock().unwrap();
        assert_eq!(counts.values().sum::<usize>(), 9000);
        for (addr, count) in counts.iter() {
            assert!(
                (1500..=4500).contains(count),
                "node {} picked {} times",
                addr,
                count
            );
        }
    }

    #[test]
    fn test_single_node_shortcut() {
        let selector = builder().build();
        selector.apply(vec![Node::new("http", "127.0.0.1:8080", &weighted_instance("1", 10))]);
        let ctx = CallContext::background();
        let (node, done) = selector.select(&ctx, SelectOptions::new()).unwrap();
        assert_eq!(node.address(), "127.0.0.1:8080");
        done(&ctx, DoneInfo::default());
    }

    #[test]
    fn test_pre_pick_returns_distinct_indices() {
        let balancer = P2cBalancer::new();
        for _ in 0..256 {
            let (a, b) = balancer.pre_pick(3);
            assert_ne!(a, b);
            assert!(a < 3 && b < 3);
        }
    }
}
