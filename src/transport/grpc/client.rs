//! gRPC 客户端
//!
//! 节点选择由框架选择器驱动，每个后端地址缓存一条 tonic Channel；
//! 生成的服务桩从这里取 Channel 发起调用，完成后由 Done 回调
//! 把结果喂回节点统计。

use crate::error::{Error, Result};
use crate::registry::Discovery;
use crate::selector::{
    p2c, DoneFunc, DoneInfo, NodeFilter, SelectOptions, Selector, SelectorBuilder,
};
use crate::transport::resolver::{parse_target, Resolver, ResolverOptions, Target};
use crate::transport::{CallContext, HeaderCarrier, Kind, TransportInfo};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// 客户端构建器
pub struct ClientBuilder {
    endpoint: String,
    timeout: Duration,
    dial_timeout: Duration,
    tls: Option<tonic::transport::ClientTlsConfig>,
    discovery: Option<Arc<dyn Discovery>>,
    selector_builder: Option<Arc<dyn SelectorBuilder>>,
    node_filters: Vec<NodeFilter>,
    subset_size: usize,
    block: bool,
}

impl ClientBuilder {
    /// 目标端点：`discovery:///service-name` 或直连 `host:port`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(2),
            dial_timeout: Duration::from_secs(5),
            tls: None,
            discovery: None,
            selector_builder: None,
            node_filters: Vec::new(),
            subset_size: 25,
            block: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: tonic::transport::ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_selector_builder(mut self, builder: Arc<dyn SelectorBuilder>) -> Self {
        self.selector_builder = Some(builder);
        self
    }

    pub fn with_node_filters(mut self, filters: Vec<NodeFilter>) -> Self {
        self.node_filters = filters;
        self
    }

    pub fn with_subset_size(mut self, size: usize) -> Self {
        self.subset_size = size;
        self
    }

    pub fn with_block(mut self) -> Self {
        self.block = true;
        self
    }

    /// gRPC 客户端默认使用 p2c + EWMA 均衡
    pub async fn connect(self) -> Result<Client> {
        let insecure = self.tls.is_none();
        let target = parse_target(&self.endpoint, insecure)?;

        let (selector, resolver) = if target.scheme == "discovery" {
            let discovery = self.discovery.clone().ok_or_else(|| {
                Error::internal_server(
                    "NO_DISCOVERY",
                    format!("endpoint {} requires a discovery", self.endpoint),
                )
            })?;
            let selector = match self.selector_builder {
                Some(builder) => builder.build(),
                // gRPC 侧缺省 p2c + EWMA
                None => p2c::builder().build(),
            };
            let resolver = Resolver::new(
                discovery,
                target.clone(),
                selector.clone(),
                ResolverOptions {
                    base_scheme: "grpc",
                    insecure,
                    block: self.block,
                    block_timeout: self.dial_timeout,
                    subset_size: self.subset_size,
                },
            )
            .await?;
            (Some(selector), Some(resolver))
        } else {
            (None, None)
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                endpoint: self.endpoint,
                target,
                timeout: self.timeout,
                dial_timeout: self.dial_timeout,
                tls: self.tls,
                node_filters: self.node_filters,
                selector,
                resolver,
                channels: tokio::sync::Mutex::new(HashMap::new()),
            }),
        })
    }
}

struct ClientInner {
    endpoint: String,
    target: Target,
    timeout: Duration,
    dial_timeout: Duration,
    tls: Option<tonic::transport::ClientTlsConfig>,
    node_filters: Vec<NodeFilter>,
    selector: Option<Arc<dyn Selector>>,
    resolver: Option<Resolver>,
    channels: tokio::sync::Mutex<HashMap<String, Channel>>,
}

/// gRPC 客户端
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// 为一次调用准备上下文
    pub fn context(&self, operation: impl Into<String>) -> CallContext {
        let info = TransportInfo::new(Kind::Grpc, self.inner.endpoint.clone(), operation)
            .with_node_filters(self.inner.node_filters.clone());
        CallContext::builder()
            .timeout(self.inner.timeout)
            .client_transport(info)
            .build()
    }

    /// 选择节点并返回其 Channel 与完成回调
    pub async fn pick_channel(&self, ctx: &CallContext) -> Result<(Channel, Option<DoneFunc>)> {
        let (authority, done) = match &self.inner.selector {
            Some(selector) => {
                let (node, done) = selector.select(ctx, SelectOptions::new())?;
                (node.address().to_string(), Some(done))
            }
            None => (self.inner.target.authority.clone(), None),
        };
        let channel = self.channel_for(&authority).await?;
        Ok((channel, done))
    }

    /// 发起一次调用并维护 Done 统计
    ///
    /// `call` 拿到选中节点的 Channel 后执行实际的 gRPC 调用；
    /// 响应元数据通过 Done 回调喂给均衡器。
    pub async fn invoke<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        let ctx = self.context(operation);
        let (channel, mut done) = self.pick_channel(&ctx).await?;

        let deadline = ctx.remaining().unwrap_or(self.inner.timeout);
        let outcome = match tokio::time::timeout(deadline, call(channel)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(status)) => Err(Error::from(status)),
            Err(_) => Err(Error::gateway_timeout(
                "REQUEST_TIMEOUT",
                format!("operation {} timed out", operation),
            )),
        };

        if let Some(done) = done.take() {
            let info = match &outcome {
                Ok(response) => DoneInfo {
                    err: None,
                    reply_md: Some(HeaderCarrier::from_map(
                        response.metadata().clone().into_headers(),
                    )),
                    bytes_sent: true,
                    bytes_received: true,
                },
                Err(err) => DoneInfo {
                    err: Some(err.clone()),
                    reply_md: None,
                    bytes_sent: true,
                    bytes_received: false,
                },
            };
            done(&ctx, info);
        }

        outcome.map(|response| response.into_inner())
    }

    /// 关闭客户端，停止服务发现监视
    pub async fn close(&self) -> Result<()> {
        if let Some(resolver) = &self.inner.resolver {
            resolver.close().await?;
        }
        Ok(())
    }

    /// 按地址取缓存的 Channel，未命中时建立连接
    async fn channel_for(&self, authority: &str) -> Result<Channel> {
        let mut channels = self.inner.channels.lock().await;
        if let Some(channel) = channels.get(authority) {
            return Ok(channel.clone());
        }
        let scheme = if self.inner.tls.is_some() { "https" } else { "http" };
        let uri = format!("{}://{}", scheme, authority);
        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| Error::internal_server("INVALID_URI", e.to_string()))?
            .connect_timeout(self.inner.dial_timeout)
            .timeout(self.inner.timeout);
        if let Some(tls) = &self.inner.tls {
            endpoint = endpoint
                .tls_config(tls.clone())
                .map_err(|e| Error::internal_server("TLS_CONFIG", e.to_string()))?;
        }
        // 懒连接：调用时真正建链，失败走统一的错误路径
        let channel = endpoint.connect_lazy();
        channels.insert(authority.to_string(), channel.clone());
        Ok(channel)
    }
}
