//! 服务发现解析器
//!
//! 把注册中心 Watcher 的实例变更翻译成选择器的节点更新。
//! HTTP 与 gRPC 客户端共用同一套解析逻辑，仅 scheme 不同。

use crate::error::{Error, Result};
use crate::registry::{Discovery, ServiceInstance, Watcher};
use crate::selector::{Node, Selector};
use crate::utils::{endpoint, subset};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

/// 解析后的目标地址
///
/// `discovery:///provider-demo` 解析为 scheme=discovery、endpoint=provider-demo；
/// 不带 scheme 的直连地址按 TLS 配置补全 http / https 前缀。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    pub endpoint: String,
}

/// 解析目标地址
///
/// `discovery:///name` 这类目标的 authority 为空，标准 URI 解析会拒绝，
/// 这里按 `scheme://authority/endpoint` 手工切分。
pub fn parse_target(raw: &str, insecure: bool) -> Result<Target> {
    let mut raw = raw.to_string();
    if !raw.contains("://") {
        if insecure {
            raw = format!("http://{}", raw);
        } else {
            raw = format!("https://{}", raw);
        }
    }
    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| Error::internal_server("INVALID_TARGET", format!("invalid target: {}", raw)))?;
    if scheme.is_empty() {
        return Err(Error::internal_server("INVALID_TARGET", format!("invalid target: {}", raw)));
    }
    let (authority, endpoint) = match rest.split_once('/') {
        Some((authority, endpoint)) => (authority, endpoint),
        None => (rest, ""),
    };
    Ok(Target {
        scheme: scheme.to_string(),
        authority: authority.to_string(),
        endpoint: endpoint.to_string(),
    })
}

/// 解析器配置
pub struct ResolverOptions {
    /// 端点匹配的基础 scheme（`http` 或 `grpc`）
    pub base_scheme: &'static str,
    /// 是否明文传输；TLS 开启时按 `<scheme>s` 匹配端点
    pub insecure: bool,
    /// 阻塞等待首个非空节点集
    pub block: bool,
    /// 阻塞等待的时限
    pub block_timeout: Duration,
    /// 确定性子集大小，0 表示关闭
    pub subset_size: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            base_scheme: "http",
            insecure: true,
            block: false,
            block_timeout: Duration::from_secs(10),
            subset_size: 0,
        }
    }
}

/// 服务发现解析器
///
/// 持有 Watcher 与后台监视任务；`close` 停止两者。
pub struct Resolver {
    watcher: Arc<Mutex<Box<dyn Watcher>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Resolver {
    /// 创建解析器并开始监视
    pub async fn new(
        discovery: Arc<dyn Discovery>,
        target: Target,
        rebalancer: Arc<dyn Selector>,
        options: ResolverOptions,
    ) -> Result<Self> {
        let watcher = discovery.watch(&target.endpoint).await?;
        let watcher = Arc::new(Mutex::new(watcher));

        let scheme = endpoint::scheme(options.base_scheme, !options.insecure);
        let selector_key = uuid::Uuid::new_v4().to_string();
        let subset_size = options.subset_size;

        if options.block {
            let first = async {
                loop {
                    let instances = watcher.lock().await.next().await?;
                    if update(&target, &scheme, &selector_key, subset_size, &rebalancer, instances) {
                        return Ok::<(), Error>(());
                    }
                }
            };
            match tokio::time::timeout(options.block_timeout, first).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(target = %target.endpoint, error = %err, "watch failed before first update");
                    let _ = watcher.lock().await.stop().await;
                    return Err(err);
                }
                Err(_) => {
                    error!(target = %target.endpoint, "watch reached deadline before first update");
                    let _ = watcher.lock().await.stop().await;
                    return Err(Error::gateway_timeout(
                        "DISCOVERY_TIMEOUT",
                        format!("discovery {} reached deadline", target.endpoint),
                    ));
                }
            }
        }

        let loop_watcher = watcher.clone();
        let loop_target = target.clone();
        let handle = tokio::spawn(async move {
            loop {
                let next = loop_watcher.lock().await.next().await;
                match next {
                    Ok(instances) => {
                        update(
                            &loop_target,
                            &scheme,
                            &selector_key,
                            subset_size,
                            &rebalancer,
                            instances,
                        );
                    }
                    Err(err) if err.is_client_closed() => return,
                    Err(err) => {
                        warn!(target = %loop_target.endpoint, error = %err, "watch got unexpected error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self { watcher, handle })
    }

    /// 停止监视
    pub async fn close(&self) -> Result<()> {
        self.handle.abort();
        self.watcher.lock().await.stop().await
    }
}

/// 把一次实例快照应用到选择器
///
/// 过滤出 scheme 匹配的实例并按地址去重；结果为空时保留上一份快照。
/// 返回是否发生了应用。
fn update(
    target: &Target,
    scheme: &str,
    selector_key: &str,
    subset_size: usize,
    rebalancer: &Arc<dyn Selector>,
    instances: Vec<ServiceInstance>,
) -> bool {
    let mut filtered = Vec::with_capacity(instances.len());
    let mut seen = HashSet::new();
    for instance in instances {
        match endpoint::parse_endpoint(&instance.endpoints, scheme) {
            Ok(Some(address)) => {
                if seen.insert(address.clone()) {
                    filtered.push((address, instance));
                }
            }
            Ok(None) => continue,
            Err(err) => {
                error!(
                    target = %target.endpoint,
                    endpoints = ?instance.endpoints,
                    error = %err,
                    "failed to parse discovery endpoint"
                );
                continue;
            }
        }
    }

    if subset_size != 0 {
        let chosen = subset::subset(
            selector_key,
            filtered.iter().map(|(_, ins)| ins.clone()).collect(),
            subset_size,
        );
        let keep: HashSet<String> = chosen.into_iter().map(|ins| ins.id).collect();
        filtered.retain(|(_, ins)| keep.contains(&ins.id));
    }

    let nodes: Vec<Node> = filtered
        .iter()
        .map(|(address, instance)| Node::new(scheme, address.clone(), instance))
        .collect();

    if nodes.is_empty() {
        warn!(target = %target.endpoint, "zero endpoint found, refused to write");
        return false;
    }
    rebalancer.apply(nodes);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, Registrar};
    use crate::selector::{random, SelectOptions, SelectorBuilder};
    use crate::transport::CallContext;

    fn instance(id: &str, port: u16) -> ServiceInstance {
        ServiceInstance::new(id, "echo", "v1")
            .with_endpoints(vec![format!("http://127.0.0.1:{}?isSecure=false", port)])
    }

    #[test]
    fn test_parse_target() {
        let t = parse_target("discovery:///provider-demo", true).unwrap();
        assert_eq!(t.scheme, "discovery");
        assert_eq!(t.endpoint, "provider-demo");

        let t = parse_target("127.0.0.1:8000", true).unwrap();
        assert_eq!(t.scheme, "http");
        assert_eq!(t.authority, "127.0.0.1:8000");

        let t = parse_target("127.0.0.1:8000", false).unwrap();
        assert_eq!(t.scheme, "https");
    }

    #[tokio::test]
    async fn test_block_waits_for_first_update() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.register(&instance("1", 8000)).await.unwrap();

        let selector = random::builder().build();
        let resolver = Resolver::new(
            registry.clone() as Arc<dyn Discovery>,
            parse_target("discovery:///echo", true).unwrap(),
            selector.clone(),
            ResolverOptions { block: true, ..Default::default() },
        )
        .await
        .unwrap();

        let (node, done) = selector
            .select(&CallContext::background(), SelectOptions::new())
            .unwrap();
        assert_eq!(node.address(), "127.0.0.1:8000");
        done(&CallContext::background(), Default::default());
        resolver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_update_keeps_last_known_good() {
        let registry = Arc::new(MemoryRegistry::new());
        let ins = instance("1", 8000);
        registry.register(&ins).await.unwrap();

        let selector = random::builder().build();
        let resolver = Resolver::new(
            registry.clone() as Arc<dyn Discovery>,
            parse_target("discovery:///echo", true).unwrap(),
            selector.clone(),
            ResolverOptions { block: true, ..Default::default() },
        )
        .await
        .unwrap();

        // 注销唯一实例产生一次空更新
        registry.deregister(&ins).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 快照保持最后一份非空集合
        let (node, done) = selector
            .select(&CallContext::background(), SelectOptions::new())
            .unwrap();
        assert_eq!(node.address(), "127.0.0.1:8000");
        done(&CallContext::background(), Default::default());

        // 新实例出现后快照被替换
        registry.register(&instance("2", 9000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (node, done) = selector
            .select(&CallContext::background(), SelectOptions::new())
            .unwrap();
        assert_eq!(node.address(), "127.0.0.1:9000");
        done(&CallContext::background(), Default::default());

        resolver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_scheme_mismatch_filtered_out() {
        let registry = Arc::new(MemoryRegistry::new());
        let grpc_only = ServiceInstance::new("1", "echo", "v1")
            .with_endpoints(vec!["grpc://127.0.0.1:9000?isSecure=false".to_string()]);
        let http_one = instance("2", 8000);
        registry.register(&grpc_only).await.unwrap();
        registry.register(&http_one).await.unwrap();

        let selector = random::builder().build();
        let resolver = Resolver::new(
            registry.clone() as Arc<dyn Discovery>,
            parse_target("discovery:///echo", true).unwrap(),
            selector.clone(),
            ResolverOptions { block: true, ..Default::default() },
        )
        .await
        .unwrap();

        for _ in 0..8 {
            let (node, done) = selector
                .select(&CallContext::background(), SelectOptions::new())
                .unwrap();
            assert_eq!(node.address(), "127.0.0.1:8000");
            done(&CallContext::background(), Default::default());
        }
        resolver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_subsetting_bounds_fanout() {
        let registry = Arc::new(MemoryRegistry::new());
        for i in 0..20u16 {
            registry.register(&instance(&format!("ins-{:02}", i), 8000 + i)).await.unwrap();
        }

        let selector = random::builder().build();
        let resolver = Resolver::new(
            registry.clone() as Arc<dyn Discovery>,
            parse_target("discovery:///echo", true).unwrap(),
            selector.clone(),
            ResolverOptions { block: true, subset_size: 5, ..Default::default() },
        )
        .await
        .unwrap();

        // 随机均衡下多次选择只会命中子集里的 5 个地址
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let (node, done) = selector
                .select(&CallContext::background(), SelectOptions::new())
                .unwrap();
            seen.insert(node.address().to_string());
            done(&CallContext::background(), Default::default());
        }
        assert_eq!(seen.len(), 5);
        resolver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_block_times_out_without_instances() {
        let registry = Arc::new(MemoryRegistry::new());
        let selector = random::builder().build();
        let err = Resolver::new(
            registry.clone() as Arc<dyn Discovery>,
            parse_target("discovery:///missing", true).unwrap(),
            selector,
            ResolverOptions {
                block: true,
                block_timeout: Duration::from_millis(100),
                ..Default::default()
            },
        )
        .await;
        let err = match err {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.is_gateway_timeout());
    }
}
