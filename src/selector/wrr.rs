//! 加权轮询均衡器
//!
//! 平滑加权轮询：每次选取为每个节点累加其有效权重，
//! 取累加值最大的节点并减去总权重。长期选取比例等于权重比例，
//! 短期突发被最大权重约束。

use super::node::direct::DirectNodeBuilder;
use super::{
    err_no_available, Balancer, BalancerBuilder, DefaultSelectorBuilder, DoneFunc, WeightedNode,
};
use crate::error::Result;
use crate::transport::CallContext;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// 均衡器名称
pub const NAME: &str = "wrr";

/// 加权轮询均衡器
#[derive(Default)]
pub struct WrrBalancer {
    current_weight: Mutex<HashMap<String, f64>>,
}

impl Balancer for WrrBalancer {
    fn pick(
        &self,
        _ctx: &CallContext,
        nodes: &[Arc<dyn WeightedNode>],
    ) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        if nodes.is_empty() {
            return Err(err_no_available());
        }

        let mut total_weight = 0.0;
        let mut selected: Option<Arc<dyn WeightedNode>> = None;
        let mut select_weight = 0.0;

        let mut current = self.current_weight.lock().unwrap();
        for node in nodes {
            let weight = node.weight();
            total_weight += weight;
            let cwt = current
                .entry(node.raw().address().to_string())
                .and_modify(|w| *w += weight)
                .or_insert(weight);
            if selected.is_none() || select_weight < *cwt {
                select_weight = *cwt;
                selected = Some(node.clone());
            }
        }
        let selected = selected.unwrap();
        current.insert(selected.raw().address().to_string(), select_weight - total_weight);
        drop(current);

        let done = selected.pick();
        Ok((selected, done))
    }
}

/// 加权轮询均衡器构建器
#[derive(Default)]
pub struct WrrBalancerBuilder;

impl BalancerBuilder for WrrBalancerBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(WrrBalancer::default())
    }
}

/// 带加权轮询均衡器的选择器构建器
pub fn builder() -> DefaultSelectorBuilder {
    DefaultSelectorBuilder::new(Arc::new(DirectNodeBuilder), Arc::new(WrrBalancerBuilder))
}
