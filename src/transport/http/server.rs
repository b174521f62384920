//! HTTP 服务端
//!
//! 绑定监听器、按路径模板路由请求、套用中间件链与请求超时，
//! 并把处理器错误序列化为 `{code, reason, message, metadata}` JSON 响应。

use super::codec::{codec_for_header, Codec};
use super::context::Context;
use super::router::Router;
use super::tls::{load_server_config, ServerTlsConfig};
use crate::error::{Error, Result};
use crate::health::HealthService;
use crate::middleware::{chain, handler_fn, BoxMessage, Matcher, Middleware};
use crate::transport::{CallContext, HeaderCarrier, Kind, TransportInfo};
use crate::utils::{endpoint, host};
use bytes::Bytes;
use http::{header, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// 请求体上限，超出直接拒绝
const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// 每请求共享的分发状态
struct RequestState {
    router: Router,
    matcher: Matcher,
    timeout: Duration,
    endpoint: String,
}

/// 运行期共享状态
struct ServerState {
    endpoint_tx: watch::Sender<Option<String>>,
    shutdown_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
    health: HealthService,
}

/// HTTP 服务器
///
/// 路由与中间件在 `start` 之前注册，启动后不再变更。
pub struct Server {
    address: String,
    timeout: Duration,
    tls: Option<ServerTlsConfig>,
    router: Router,
    matcher: Matcher,
    state: Arc<ServerState>,
}

impl Server {
    /// 创建 HTTP 服务器，`address` 形如 `0.0.0.0:8000`
    pub fn new(address: impl Into<String>) -> Self {
        let (endpoint_tx, _) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);
        Self {
            address: address.into(),
            timeout: Duration::from_secs(1),
            tls: None,
            router: Router::new(),
            matcher: Matcher::new(),
            state: Arc::new(ServerState {
                endpoint_tx,
                shutdown_tx,
                done_tx,
                health: HealthService::new(),
            }),
        }
    }

    /// 设置请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 启用 TLS
    pub fn with_tls(mut self, tls: ServerTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// 设置默认中间件
    pub fn middleware(&mut self, middlewares: Vec<Middleware>) {
        self.matcher.use_default(middlewares);
    }

    /// 为指定操作选择器挂载中间件
    pub fn middleware_match(&mut self, selector: impl Into<String>, middlewares: Vec<Middleware>) {
        self.matcher.add(selector, middlewares);
    }

    /// 路由注册入口
    pub fn router(&mut self) -> &mut Router {
        &mut self.router
    }

    /// 健康检查服务
    pub fn health(&self) -> &HealthService {
        &self.state.health
    }
}

#[async_trait::async_trait]
impl crate::transport::Server for Server {
    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address).await.map_err(|e| {
            Error::internal_server("LISTEN_FAILED", format!("bind {}: {}", self.address, e))
                .with_cause(e)
        })?;
        let actual = listener.local_addr().map_err(Error::from)?;
        let secure = self.tls.is_some();
        let advertised = host::extract(&self.address, actual);
        let url = endpoint::new_endpoint(&endpoint::scheme("http", secure), &advertised, secure);
        self.state.endpoint_tx.send_replace(Some(url.clone()));
        self.state.health.set_serving().await;
        info!(address = %actual, endpoint = %url, "🚀 HTTP server listening");

        let tls_acceptor = match &self.tls {
            Some(cfg) => Some(TlsAcceptor::from(load_server_config(cfg)?)),
            None => None,
        };
        let shared = Arc::new(RequestState {
            router: self.router.clone(),
            matcher: self.matcher.clone(),
            timeout: self.timeout,
            endpoint: url,
        });

        let mut shutdown = self.state.shutdown_tx.subscribe();
        let mut conns: JoinSet<()> = JoinSet::new();
        // 与 stop 并发竞争时可能在绑定前就收到停机信号
        while !*shutdown.borrow() {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let shared = shared.clone();
                    let tls_acceptor = tls_acceptor.clone();
                    let conn_shutdown = self.state.shutdown_tx.subscribe();
                    conns.spawn(async move {
                        let service = service_fn(move |req| handle_request(shared.clone(), req));
                        match tls_acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => {
                                    serve_connection(TokioIo::new(stream), service, conn_shutdown).await
                                }
                                Err(e) => debug!(remote = %remote, error = %e, "tls handshake failed"),
                            },
                            None => serve_connection(TokioIo::new(stream), service, conn_shutdown).await,
                        }
                    });
                }
                _ = shutdown.changed() => break,
            }
        }

        // 停止接受新连接，排空在途请求
        self.state.health.set_not_serving().await;
        drop(listener);
        while conns.join_next().await.is_some() {}
        self.state.done_tx.send_replace(true);
        info!(address = %actual, "HTTP server stopped");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let started = self.state.endpoint_tx.subscribe().borrow().is_some();
        self.state.shutdown_tx.send_replace(true);
        if !started {
            return Ok(());
        }
        let mut done = self.state.done_tx.subscribe();
        loop {
            if *done.borrow() {
                return Ok(());
            }
            if done.changed().await.is_err() {
                return Ok(());
            }
        }
    }

    async fn endpoint(&self) -> Result<String> {
        let mut rx = self.state.endpoint_tx.subscribe();
        loop {
            let current = rx.borrow().clone();
            if let Some(url) = current {
                return Ok(url);
            }
            rx.changed().await.map_err(|_| {
                Error::internal_server("SERVER_CLOSED", "server dropped before binding")
            })?;
        }
    }
}

/// 单连接服务循环，收到停机信号后进入优雅关闭
async fn serve_connection<I, S>(io: I, service: S, mut shutdown: watch::Receiver<bool>)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    S: hyper::service::Service<
            http::Request<Incoming>,
            Response = Response<Full<Bytes>>,
            Error = Infallible,
        > + Send
        + 'static,
    S::Future: Send,
{
    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);
    let mut shutting = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(error = %e, "connection closed with error");
                }
                return;
            }
            _ = shutdown.changed(), if !shutting => {
                shutting = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// 请求入口：分发并把错误编码为响应，处理器错误不中断连接
async fn handle_request(
    state: Arc<RequestState>,
    req: http::Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let accept_codec = codec_for_header(
        req.headers().get(header::ACCEPT).and_then(|v| v.to_str().ok()),
    );
    match dispatch(state, req).await {
        Ok(response) => Ok(response),
        Err(err) => Ok(encode_error(accept_codec, &err)),
    }
}

async fn dispatch(
    state: Arc<RequestState>,
    req: http::Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let (parts, body) = req.into_parts();
    let (route, vars) = state
        .router
        .match_route(&parts.method, parts.uri.path())
        .ok_or_else(|| {
            Error::not_found(
                "ROUTE_NOT_FOUND",
                format!("no route for {} {}", parts.method, parts.uri.path()),
            )
        })?;
    let operation = route.template.raw().to_string();

    let body = Limited::new(body, MAX_BODY_SIZE)
        .collect()
        .await
        .map_err(|e| Error::bad_request("READ_BODY_FAILED", e.to_string()))?
        .to_bytes();

    let request_codec = codec_for_header(
        parts.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
    );
    let accept_codec = codec_for_header(
        parts.headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()),
    );

    let reply_header = HeaderCarrier::new();
    let info = TransportInfo::new(Kind::Http, state.endpoint.clone(), operation.clone())
        .with_request_header(HeaderCarrier::from_map(parts.headers.clone()))
        .with_reply_header(reply_header.clone());
    let call_ctx = CallContext::builder()
        .timeout(state.timeout)
        .server_transport(info)
        .build();

    let http_ctx = Context::new(
        call_ctx.clone(),
        parts.method,
        parts.uri,
        parts.headers,
        body,
        vars,
        operation.clone(),
        request_codec,
        accept_codec,
    );

    let middlewares = state.matcher.match_operation(&operation);
    let route_handler = route.handler.clone();
    let terminal = handler_fn(move |_ctx, req_any: BoxMessage| {
        let handler = route_handler.clone();
        async move {
            let http_ctx = req_any
                .downcast::<Context>()
                .map_err(|_| Error::internal_server("BAD_MESSAGE", "unexpected request message"))?;
            let response = handler(*http_ctx).await?;
            Ok(Box::new(response) as BoxMessage)
        }
    });
    let handler = chain(&middlewares)(terminal);

    let reply = match tokio::time::timeout(state.timeout, handler(call_ctx, Box::new(http_ctx))).await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::gateway_timeout(
                "REQUEST_TIMEOUT",
                format!("operation {} exceeded {:?}", operation, state.timeout),
            ))
        }
    };

    let mut response = *reply
        .downcast::<Response<Full<Bytes>>>()
        .map_err(|_| Error::internal_server("BAD_MESSAGE", "unexpected reply message"))?;

    // 处理器写入的响应头在最终写出前冲刷
    for (name, value) in reply_header.to_map().iter() {
        response.headers_mut().append(name, value.clone());
    }
    Ok(response)
}

/// 把处理器错误编码为状态码加 JSON 错误体
fn encode_error(codec: Codec, err: &Error) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(err.code.clamp(100, 599) as u16)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = codec
        .marshal(err)
        .unwrap_or_else(|_| b"{\"code\":500,\"reason\":\"ENCODE_ERROR\"}".to_vec());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, codec.content_type())
        .body(Full::new(Bytes::from(body)))
        .expect("static error response must build")
}
