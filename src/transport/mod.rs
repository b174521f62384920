//! 传输层抽象
//!
//! 定义传输服务器契约、请求级传输记录与调用上下文。
//! 中间件、选择器与具体传输（HTTP / gRPC）都围绕这里的类型协作。

pub mod grpc;
pub mod http;
pub mod resolver;

use crate::error::Result;
use crate::selector::{Node, NodeFilter};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Http,
    Grpc,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Http => "http",
            Kind::Grpc => "grpc",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传输服务器契约
///
/// `start` 绑定监听器并阻塞服务直到 `stop` 或致命错误；
/// `stop` 拒绝新请求并在调用方给定的时限内排空在途请求（由上层用超时包裹）；
/// `endpoint` 在监听器绑定后返回注册用的稳定 URL，绑定前挂起等待。
#[async_trait]
pub trait Server: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn endpoint(&self) -> Result<String>;
}

/// 头部载体
///
/// 请求头与响应头的统一视图，中间件与处理器通过它读写头部。
/// 内部可变，响应头在最终写出前冲刷。
#[derive(Clone, Default)]
pub struct HeaderCarrier {
    inner: Arc<Mutex<::http::HeaderMap>>,
}

impl HeaderCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: ::http::HeaderMap) -> Self {
        Self { inner: Arc::new(Mutex::new(map)) }
    }

    /// 获取指定键的首个值
    pub fn get(&self, key: &str) -> Option<String> {
        let map = self.inner.lock().unwrap();
        map.get(key).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
    }

    /// 设置指定键的值，覆盖已有值
    pub fn set(&self, key: &str, value: &str) {
        let mut map = self.inner.lock().unwrap();
        if let (Ok(name), Ok(value)) = (
            ::http::header::HeaderName::try_from(key),
            ::http::header::HeaderValue::try_from(value),
        ) {
            map.insert(name, value);
        }
    }

    /// 追加指定键的值
    pub fn add(&self, key: &str, value: &str) {
        let mut map = self.inner.lock().unwrap();
        if let (Ok(name), Ok(value)) = (
            ::http::header::HeaderName::try_from(key),
            ::http::header::HeaderValue::try_from(value),
        ) {
            map.append(name, value);
        }
    }

    /// 返回所有键名
    pub fn keys(&self) -> Vec<String> {
        let map = self.inner.lock().unwrap();
        map.keys().map(|k| k.as_str().to_string()).collect()
    }

    /// 返回指定键的所有值
    pub fn values(&self, key: &str) -> Vec<String> {
        let map = self.inner.lock().unwrap();
        map.get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .collect()
    }

    /// 导出头部快照
    pub fn to_map(&self) -> ::http::HeaderMap {
        self.inner.lock().unwrap().clone()
    }
}

/// 请求级传输记录
///
/// 由传输适配器在请求进入时构建并挂到调用上下文，生存期为一次调用。
#[derive(Clone)]
pub struct TransportInfo {
    kind: Kind,
    endpoint: String,
    operation: String,
    request_header: HeaderCarrier,
    reply_header: HeaderCarrier,
    node_filters: Vec<NodeFilter>,
}

impl TransportInfo {
    pub fn new(kind: Kind, endpoint: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            operation: operation.into(),
            request_header: HeaderCarrier::new(),
            reply_header: HeaderCarrier::new(),
            node_filters: Vec::new(),
        }
    }

    pub fn with_request_header(mut self, header: HeaderCarrier) -> Self {
        self.request_header = header;
        self
    }

    pub fn with_reply_header(mut self, header: HeaderCarrier) -> Self {
        self.reply_header = header;
        self
    }

    /// 设置客户端侧节点过滤器，随上下文传递到均衡器
    pub fn with_node_filters(mut self, filters: Vec<NodeFilter>) -> Self {
        self.node_filters = filters;
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// 服务端为本端监听地址，客户端为目标端点（如 `discovery:///provider`）
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 被路由的操作标识：gRPC 方法选择器或 HTTP 路径模板
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn request_header(&self) -> &HeaderCarrier {
        &self.request_header
    }

    pub fn reply_header(&self) -> &HeaderCarrier {
        &self.reply_header
    }

    pub fn node_filters(&self) -> &[NodeFilter] {
        &self.node_filters
    }
}

/// 调用上下文
///
/// 请求作用域的载体：截止时间、传输记录与对端节点槽。
/// 中间件运行前由适配器挂好传输记录。克隆共享同一份内部状态。
#[derive(Clone, Default)]
pub struct CallContext {
    inner: Arc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    deadline: Option<Instant>,
    server_transport: Option<TransportInfo>,
    client_transport: Option<TransportInfo>,
    peer: Mutex<Option<Node>>,
}

impl CallContext {
    /// 创建空白上下文
    pub fn background() -> Self {
        Self::default()
    }

    pub fn builder() -> CallContextBuilder {
        CallContextBuilder::default()
    }

    /// 截止时间
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// 距截止时间的剩余时长；已超时返回零
    pub fn remaining(&self) -> Option<Duration> {
        self.inner.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// 服务端传输记录
    pub fn server_transport(&self) -> Option<&TransportInfo> {
        self.inner.server_transport.as_ref()
    }

    /// 客户端传输记录
    pub fn client_transport(&self) -> Option<&TransportInfo> {
        self.inner.client_transport.as_ref()
    }

    /// 选中节点写入对端槽
    pub fn set_peer(&self, node: Node) {
        *self.inner.peer.lock().unwrap() = Some(node);
    }

    /// 读取对端节点
    pub fn peer(&self) -> Option<Node> {
        self.inner.peer.lock().unwrap().clone()
    }
}

/// 调用上下文构建器
#[derive(Default)]
pub struct CallContextBuilder {
    deadline: Option<Instant>,
    server_transport: Option<TransportInfo>,
    client_transport: Option<TransportInfo>,
}

impl CallContextBuilder {
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn server_transport(mut self, info: TransportInfo) -> Self {
        self.server_transport = Some(info);
        self
    }

    pub fn client_transport(mut self, info: TransportInfo) -> Self {
        self.client_transport = Some(info);
        self
    }

    pub fn build(self) -> CallContext {
        CallContext {
            inner: Arc::new(ContextInner {
                deadline: self.deadline,
                server_transport: self.server_transport,
                client_transport: self.client_transport,
                peer: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_carrier_set_get_add() {
        let header = HeaderCarrier::new();
        header.set("x-md-trace", "abc");
        header.add("x-md-tag", "a");
        header.add("x-md-tag", "b");
        assert_eq!(header.get("x-md-trace").unwrap(), "abc");
        assert_eq!(header.values("x-md-tag"), vec!["a", "b"]);
        assert_eq!(header.keys().len(), 2);
    }

    #[test]
    fn test_context_peer_slot_shared_across_clones() {
        let ctx = CallContext::background();
        let cloned = ctx.clone();
        assert!(cloned.peer().is_none());
        ctx.set_peer(Node::direct("http", "127.0.0.1:9000"));
        assert_eq!(cloned.peer().unwrap().address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_deadline_remaining() {
        let ctx = CallContext::builder().timeout(Duration::from_secs(5)).build();
        let remaining = ctx.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining > Duration::from_secs(4));
        assert!(CallContext::background().remaining().is_none());
    }
}
