//! 节点选择与负载均衡
//!
//! 选择器维护一份可整体替换的加权节点快照，每次调用在过滤器约束下
//! 选出一个节点，并通过完成回调把调用结果反馈给节点统计。
//! 快照原子发布，Select 端无锁读取。

pub mod filter;
pub mod node;
pub mod p2c;
pub mod random;
pub mod wrr;

mod global;

pub use global::{global_selector, set_global_selector};

use crate::error::{Error, Result};
use crate::registry::ServiceInstance;
use crate::transport::{CallContext, HeaderCarrier};
use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// 没有可用节点
pub fn err_no_available() -> Error {
    Error::service_unavailable("no_available_node", "")
}

/// 选择器节点
///
/// 从服务实例派生出的不可变值对象，是均衡器看到的一台后端。
#[derive(Debug, Clone)]
pub struct Node {
    scheme: String,
    address: String,
    name: String,
    version: String,
    metadata: HashMap<String, String>,
    initial_weight: Option<i64>,
}

impl Node {
    /// 从服务实例构建节点，权重取自 metadata["weight"]
    pub fn new(scheme: impl Into<String>, address: impl Into<String>, instance: &ServiceInstance) -> Self {
        let initial_weight = instance
            .metadata
            .get("weight")
            .and_then(|w| w.parse::<i64>().ok());
        Self {
            scheme: scheme.into(),
            address: address.into(),
            name: instance.name.clone(),
            version: instance.version.clone(),
            metadata: instance.metadata.clone(),
            initial_weight,
        }
    }

    /// 构建只有地址信息的节点
    pub fn direct(scheme: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            address: address.into(),
            name: String::new(),
            version: String::new(),
            metadata: HashMap::new(),
            initial_weight: None,
        }
    }

    /// 节点通信协议
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// 同一服务下唯一的 `host:port` 地址
    pub fn address(&self) -> &str {
        &self.address
    }

    /// 服务名称
    pub fn service_name(&self) -> &str {
        &self.name
    }

    /// 服务版本
    pub fn version(&self) -> &str {
        &self.version
    }

    /// 实例元数据
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// 初始调度权重，未设置返回 None
    pub fn initial_weight(&self) -> Option<i64> {
        self.initial_weight
    }
}

/// 调用完成时的回调信息
#[derive(Default)]
pub struct DoneInfo {
    /// 响应错误
    pub err: Option<Error>,
    /// 响应元数据
    pub reply_md: Option<HeaderCarrier>,
    /// 是否已向服务端发送字节
    pub bytes_sent: bool,
    /// 是否已从服务端接收字节
    pub bytes_received: bool,
}

/// 调用完成回调
///
/// 每次 Pick 恰好对应一次调用；FnOnce 从类型上保证只触发一次。
pub type DoneFunc = Box<dyn FnOnce(&CallContext, DoneInfo) + Send>;

/// 节点过滤器，按序应用于候选集
pub type NodeFilter = Arc<dyn Fn(&CallContext, Vec<Node>) -> Vec<Node> + Send + Sync>;

/// 选择选项
#[derive(Clone, Default)]
pub struct SelectOptions {
    /// 节点过滤器列表
    pub node_filters: Vec<NodeFilter>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置节点过滤器
    pub fn with_node_filters(mut self, filters: Vec<NodeFilter>) -> Self {
        self.node_filters = filters;
        self
    }
}

/// 节点重均衡器
pub trait Rebalancer: Send + Sync {
    /// 节点集变更时整体替换快照
    fn apply(&self, nodes: Vec<Node>);
}

/// 节点选择均衡器
///
/// select 成功时返回选中节点与完成回调。
pub trait Selector: Rebalancer {
    fn select(&self, ctx: &CallContext, opts: SelectOptions) -> Result<(Node, DoneFunc)>;
}

/// 选择器构建器
pub trait SelectorBuilder: Send + Sync {
    fn build(&self) -> Arc<dyn Selector>;
}

/// 实时计算调度权重的节点
pub trait WeightedNode: Send + Sync {
    /// 原始节点
    fn raw(&self) -> &Node;

    /// 运行时计算的有效权重
    fn weight(&self) -> f64;

    /// 选中该节点，返回完成回调
    fn pick(&self) -> DoneFunc;

    /// 距上次被选中的时长
    fn pick_elapsed(&self) -> Duration;
}

/// 加权节点构建器
pub trait WeightedNodeBuilder: Send + Sync {
    fn build(&self, node: Node) -> Arc<dyn WeightedNode>;
}

/// 负载均衡器：从候选节点中选出一个
pub trait Balancer: Send + Sync {
    fn pick(
        &self,
        ctx: &CallContext,
        nodes: &[Arc<dyn WeightedNode>],
    ) -> Result<(Arc<dyn WeightedNode>, DoneFunc)>;
}

/// 负载均衡器构建器
pub trait BalancerBuilder: Send + Sync {
    fn build(&self) -> Box<dyn Balancer>;
}

/// 组合选择器
///
/// 节点构建器负责把 Node 升级为带统计的加权节点，
/// 均衡器决定选取策略；快照通过 `ArcSwap` 原子发布。
pub struct DefaultSelector {
    node_builder: Arc<dyn WeightedNodeBuilder>,
    balancer: Box<dyn Balancer>,
    nodes: ArcSwap<Vec<Arc<dyn WeightedNode>>>,
}

impl DefaultSelector {
    pub fn new(node_builder: Arc<dyn WeightedNodeBuilder>, balancer: Box<dyn Balancer>) -> Self {
        Self {
            node_builder,
            balancer,
            nodes: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl Rebalancer for DefaultSelector {
    fn apply(&self, nodes: Vec<Node>) {
        let weighted: Vec<Arc<dyn WeightedNode>> =
            nodes.into_iter().map(|n| self.node_builder.build(n)).collect();
        self.nodes.store(Arc::new(weighted));
    }
}

impl Selector for DefaultSelector {
    fn select(&self, ctx: &CallContext, opts: SelectOptions) -> Result<(Node, DoneFunc)> {
        let snapshot = self.nodes.load_full();

        // 选项过滤器之后追加上下文携带的客户端过滤器
        let mut filters: Vec<NodeFilter> = opts.node_filters;
        if let Some(tr) = ctx.client_transport() {
            filters.extend(tr.node_filters().iter().cloned());
        }

        let candidates: Vec<Arc<dyn WeightedNode>> = if filters.is_empty() {
            snapshot.as_ref().clone()
        } else {
            let mut raw: Vec<Node> = snapshot.iter().map(|w| w.raw().clone()).collect();
            for f in &filters {
                raw = f(ctx, raw);
            }
            let keep: HashSet<&str> = raw.iter().map(|n| n.address()).collect();
            snapshot
                .iter()
                .filter(|w| keep.contains(w.raw().address()))
                .cloned()
                .collect()
        };

        if candidates.is_empty() {
            return Err(err_no_available());
        }

        let (picked, done) = self.balancer.pick(ctx, &candidates)?;
        ctx.set_peer(picked.raw().clone());
        Ok((picked.raw().clone(), done))
    }
}

/// 组合选择器的构建器
pub struct DefaultSelectorBuilder {
    node_builder: Arc<dyn WeightedNodeBuilder>,
    balancer_builder: Arc<dyn BalancerBuilder>,
}

impl DefaultSelectorBuilder {
    pub fn new(
        node_builder: Arc<dyn WeightedNodeBuilder>,
        balancer_builder: Arc<dyn BalancerBuilder>,
    ) -> Self {
        Self { node_builder, balancer_builder }
    }
}

impl SelectorBuilder for DefaultSelectorBuilder {
    fn build(&self) -> Arc<dyn Selector> {
        Arc::new(DefaultSelector::new(
            self.node_builder.clone(),
            self.balancer_builder.build(),
        ))
    }
}
