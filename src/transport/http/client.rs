//! HTTP 客户端
//!
//! 出站调用链：编码请求、解析目标、选择节点、执行往返、解码响应。
//! `discovery://` 端点通过解析器接入服务发现与负载均衡；
//! 真正的网络往返通过 RoundTripper 抽象，可整体替换。

use super::codec::codec_for_header;
use super::tls::{load_client_config, ClientTlsConfig};
use crate::error::{Error, Result};
use crate::middleware::{chain, handler_fn, BoxMessage, Middleware};
use crate::registry::Discovery;
use crate::retry::RetryPolicy;
use crate::selector::{
    global_selector, DoneFunc, DoneInfo, NodeFilter, SelectOptions, Selector, SelectorBuilder,
};
use crate::transport::resolver::{parse_target, Resolver, ResolverOptions, Target};
use crate::transport::{CallContext, HeaderCarrier, Kind, TransportInfo};
use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::ServerName;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// 错误解码器：从响应状态与响应体还原框架错误
pub type ErrorDecoder = Arc<dyn Fn(StatusCode, &Bytes) -> Error + Send + Sync>;

/// 传输往返抽象
#[async_trait]
pub trait RoundTripper: Send + Sync {
    async fn round_trip(&self, req: http::Request<Full<Bytes>>) -> Result<http::Response<Incoming>>;
}

/// 明文 HTTP 往返器
pub struct PlainRoundTripper {
    client: hyper_util::client::legacy::Client<HttpConnector, Full<Bytes>>,
}

impl PlainRoundTripper {
    pub fn new() -> Self {
        Self {
            client: hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for PlainRoundTripper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoundTripper for PlainRoundTripper {
    async fn round_trip(&self, req: http::Request<Full<Bytes>>) -> Result<http::Response<Incoming>> {
        self.client
            .request(req)
            .await
            .map_err(|e| Error::service_unavailable("TRANSPORT_ERROR", e.to_string()).with_cause(e))
    }
}

/// TLS 往返器，逐请求建立连接
pub struct TlsRoundTripper {
    connector: TlsConnector,
    server_name: Option<String>,
}

impl TlsRoundTripper {
    pub fn new(tls: &ClientTlsConfig) -> Result<Self> {
        Ok(Self {
            connector: TlsConnector::from(load_client_config(tls)?),
            server_name: tls.server_name.clone(),
        })
    }
}

#[async_trait]
impl RoundTripper for TlsRoundTripper {
    async fn round_trip(&self, req: http::Request<Full<Bytes>>) -> Result<http::Response<Incoming>> {
        let uri = req.uri().clone();
        let host = uri
            .host()
            .ok_or_else(|| Error::internal_server("INVALID_URI", format!("no host in {}", uri)))?
            .to_string();
        let port = uri.port_u16().unwrap_or(443);

        let tcp = TcpStream::connect((host.as_str(), port)).await.map_err(Error::from)?;
        let sni = self.server_name.clone().unwrap_or_else(|| host.clone());
        let server_name = ServerName::try_from(sni)
            .map_err(|e| Error::internal_server("INVALID_SERVER_NAME", e.to_string()))?;
        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::service_unavailable("TLS_HANDSHAKE", e.to_string()).with_cause(e))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
            .await
            .map_err(|e| Error::service_unavailable("TRANSPORT_ERROR", e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "client connection ended");
            }
        });
        sender
            .send_request(req)
            .await
            .map_err(|e| Error::service_unavailable("TRANSPORT_ERROR", e.to_string()))
    }
}

/// 默认错误解码器：按 JSON 错误体还原，失败时退化为状态码
fn default_error_decoder(status: StatusCode, body: &Bytes) -> Error {
    if let Ok(err) = serde_json::from_slice::<Error>(body) {
        return err;
    }
    Error::new(
        status.as_u16() as i32,
        crate::error::UNKNOWN_REASON,
        String::from_utf8_lossy(body).to_string(),
    )
}

/// 单次调用的选项
#[derive(Clone, Default)]
pub struct CallOptions {
    /// 操作标识，缺省取路径
    pub operation: Option<String>,
    /// 请求内容类型，缺省 JSON
    pub content_type: Option<String>,
    /// 附加请求头
    pub headers: Option<http::HeaderMap>,
    /// 本次调用追加的节点过滤器
    pub node_filters: Vec<NodeFilter>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_node_filters(mut self, filters: Vec<NodeFilter>) -> Self {
        self.node_filters = filters;
        self
    }
}

/// 客户端构建器
pub struct ClientBuilder {
    endpoint: String,
    timeout: Duration,
    dial_timeout: Duration,
    user_agent: Option<String>,
    tls: Option<ClientTlsConfig>,
    discovery: Option<Arc<dyn Discovery>>,
    selector_builder: Option<Arc<dyn SelectorBuilder>>,
    middleware: Vec<Middleware>,
    node_filters: Vec<NodeFilter>,
    subset_size: usize,
    block: bool,
    round_tripper: Option<Arc<dyn RoundTripper>>,
    error_decoder: Option<ErrorDecoder>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl ClientBuilder {
    /// 目标端点：`discovery:///service-name` 或直连 `host:port`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(2),
            dial_timeout: Duration::from_secs(5),
            user_agent: None,
            tls: None,
            discovery: None,
            selector_builder: None,
            middleware: Vec::new(),
            node_filters: Vec::new(),
            subset_size: 25,
            block: false,
            round_tripper: None,
            error_decoder: None,
            retry_policy: None,
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

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_tls(mut self, tls: ClientTlsConfig) -> Self {
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

    pub fn with_middleware(mut self, middleware: Vec<Middleware>) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_node_filters(mut self, filters: Vec<NodeFilter>) -> Self {
        self.node_filters = filters;
        self
    }

    /// 确定性子集大小，0 关闭
    pub fn with_subset_size(mut self, size: usize) -> Self {
        self.subset_size = size;
        self
    }

    /// 构建时阻塞等待首个非空节点集
    pub fn with_block(mut self) -> Self {
        self.block = true;
        self
    }

    pub fn with_round_tripper(mut self, round_tripper: Arc<dyn RoundTripper>) -> Self {
        self.round_tripper = Some(round_tripper);
        self
    }

    pub fn with_error_decoder(mut self, decoder: ErrorDecoder) -> Self {
        self.error_decoder = Some(decoder);
        self
    }

    /// 瞬态错误的重试策略；每次重试重新选择节点
    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// 构建客户端
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
            let selector = self
                .selector_builder
                .unwrap_or_else(global_selector)
                .build();
            let resolver = Resolver::new(
                discovery,
                target.clone(),
                selector.clone(),
                ResolverOptions {
                    base_scheme: "http",
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

        let round_tripper = match self.round_tripper {
            Some(rt) => rt,
            None => match &self.tls {
                Some(tls) => Arc::new(TlsRoundTripper::new(tls)?) as Arc<dyn RoundTripper>,
                None => Arc::new(PlainRoundTripper::new()),
            },
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                endpoint: self.endpoint,
                target,
                timeout: self.timeout,
                user_agent: self.user_agent,
                secure: !insecure,
                middleware: self.middleware,
                node_filters: self.node_filters,
                selector,
                resolver,
                round_tripper,
                error_decoder: self
                    .error_decoder
                    .unwrap_or_else(|| Arc::new(default_error_decoder)),
                retry_policy: self.retry_policy,
            }),
        })
    }
}

struct ClientInner {
    endpoint: String,
    target: Target,
    timeout: Duration,
    user_agent: Option<String>,
    secure: bool,
    middleware: Vec<Middleware>,
    node_filters: Vec<NodeFilter>,
    selector: Option<Arc<dyn Selector>>,
    resolver: Option<Resolver>,
    round_tripper: Arc<dyn RoundTripper>,
    error_decoder: ErrorDecoder,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

/// HTTP 客户端
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// 发起一次调用
    ///
    /// 编码 args、构造传输记录并挂到上下文、把中间件链套在终端往返上，
    /// 最后把响应体解码进 `Reply`。
    pub async fn invoke<Req, Reply>(
        &self,
        method: Method,
        path: &str,
        args: Option<&Req>,
        opts: CallOptions,
    ) -> Result<Reply>
    where
        Req: Serialize,
        Reply: DeserializeOwned + Send + 'static,
    {
        let content_type = opts
            .content_type
            .clone()
            .unwrap_or_else(|| "application/json".to_string());
        let codec = codec_for_header(Some(&content_type));
        let body = match args {
            Some(args) => Bytes::from(codec.marshal(args)?),
            None => Bytes::new(),
        };

        let mut headers = opts.headers.clone().unwrap_or_default();
        if let Ok(value) = content_type.parse() {
            headers.insert(header::CONTENT_TYPE, value);
        }
        if let Ok(value) = codec.content_type().parse() {
            headers.insert(header::ACCEPT, value);
        }
        if let Some(user_agent) = &self.inner.user_agent {
            if let Ok(value) = user_agent.parse() {
                headers.insert(header::USER_AGENT, value);
            }
        }

        let operation = opts.operation.clone().unwrap_or_else(|| path.to_string());
        let mut filters = self.inner.node_filters.clone();
        filters.extend(opts.node_filters.iter().cloned());
        let info = TransportInfo::new(Kind::Http, self.inner.endpoint.clone(), operation)
            .with_request_header(HeaderCarrier::from_map(headers.clone()))
            .with_node_filters(filters);
        let ctx = CallContext::builder()
            .timeout(self.inner.timeout)
            .client_transport(info)
            .build();

        let inner = self.inner.clone();
        let method = method.clone();
        let path = path.to_string();
        let terminal = handler_fn(move |ctx: CallContext, _req: BoxMessage| {
            let inner = inner.clone();
            let method = method.clone();
            let path = path.clone();
            let headers = headers.clone();
            let body = body.clone();
            let codec = codec;
            async move {
                // 瞬态错误按策略退避重试，每次重试重新走节点选择
                let mut attempt = 0usize;
                let data = loop {
                    match inner
                        .round_trip(&ctx, method.clone(), &path, headers.clone(), body.clone())
                        .await
                    {
                        Ok(data) => break data,
                        Err(err) => match &inner.retry_policy {
                            Some(policy) if policy.should_retry(attempt, &err) => {
                                tokio::time::sleep(policy.backoff_duration(attempt)).await;
                                attempt += 1;
                            }
                            _ => return Err(err),
                        },
                    }
                };
                let reply: Reply = if data.is_empty() {
                    codec.unmarshal(b"null")?
                } else {
                    codec.unmarshal(&data)?
                };
                Ok(Box::new(reply) as BoxMessage)
            }
        });

        let handler = chain(&self.inner.middleware)(terminal);
        let reply = handler(ctx, Box::new(())).await?;
        reply
            .downcast::<Reply>()
            .map(|boxed| *boxed)
            .map_err(|_| Error::internal_server("BAD_MESSAGE", "unexpected reply message"))
    }

    /// 关闭客户端，停止服务发现监视
    pub async fn close(&self) -> Result<()> {
        if let Some(resolver) = &self.inner.resolver {
            resolver.close().await?;
        }
        Ok(())
    }
}

impl ClientInner {
    /// 终端往返：选节点、重写 URL、发送请求、解码错误并回调 Done
    async fn round_trip(
        &self,
        ctx: &CallContext,
        method: Method,
        path: &str,
        headers: http::HeaderMap,
        body: Bytes,
    ) -> Result<Bytes> {
        let mut done: Option<DoneFunc> = None;
        let authority = match &self.selector {
            Some(selector) => {
                let (node, d) = selector.select(ctx, SelectOptions::new())?;
                done = Some(d);
                node.address().to_string()
            }
            None => self.target.authority.clone(),
        };

        let scheme = if self.secure { "https" } else { "http" };
        let uri = format!("{}://{}{}", scheme, authority, path);
        let mut builder = http::Request::builder().method(method).uri(uri.as_str());
        if let Some(slot) = builder.headers_mut() {
            *slot = headers;
        }
        let request = builder.body(Full::new(body)).map_err(Error::from)?;

        let deadline = ctx.remaining().unwrap_or(self.timeout);
        let outcome = async {
            let response = tokio::time::timeout(deadline, self.round_tripper.round_trip(request))
                .await
                .map_err(|_| {
                    Error::gateway_timeout("REQUEST_TIMEOUT", format!("request {} timed out", uri))
                })??;
            let (parts, incoming) = response.into_parts();
            let data = incoming
                .collect()
                .await
                .map_err(|e| Error::service_unavailable("READ_BODY_FAILED", e.to_string()))?
                .to_bytes();
            if parts.status.as_u16() >= 300 {
                return Err((self.error_decoder)(parts.status, &data));
            }
            Ok((parts.headers, data))
        }
        .await;

        if let Some(done) = done.take() {
            let info = match &outcome {
                Ok((headers, _)) => DoneInfo {
                    err: None,
                    reply_md: Some(HeaderCarrier::from_map(headers.clone())),
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
            done(ctx, info);
        }

        outcome.map(|(_, data)| data)
    }
}
