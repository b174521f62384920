//! gRPC 服务端
//!
//! 包装 tonic Server：中间件桥接层、健康检查与服务反射预注册、
//! 监听器绑定与注册用端点计算。

use super::interceptor::{LayerState, MiddlewareLayer};
use crate::error::{Error, Result};
use crate::health::HealthService;
use crate::middleware::{Matcher, Middleware};
use crate::utils::{endpoint, host};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::body::BoxBody;
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;
use tower::Service;
use tracing::info;

/// 运行期共享状态
struct ServerState {
    endpoint_tx: watch::Sender<Option<String>>,
    shutdown_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
    health: HealthService,
}

/// gRPC 服务器
///
/// 服务与中间件在 `start` 之前注册，启动后不再变更。
pub struct Server {
    address: String,
    timeout: Duration,
    matcher: Matcher,
    routes: Mutex<Option<RoutesBuilder>>,
    tls: Option<tonic::transport::ServerTlsConfig>,
    health_enabled: bool,
    reflection_descriptors: Vec<&'static [u8]>,
    state: Arc<ServerState>,
}

impl Server {
    /// 创建 gRPC 服务器，`address` 形如 `0.0.0.0:9000`
    pub fn new(address: impl Into<String>) -> Self {
        let (endpoint_tx, _) = watch::channel(None);
        let (shutdown_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);
        Self {
            address: address.into(),
            timeout: Duration::from_secs(1),
            matcher: Matcher::new(),
            routes: Mutex::new(Some(RoutesBuilder::default())),
            tls: None,
            health_enabled: true,
            reflection_descriptors: Vec::new(),
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
    pub fn with_tls(mut self, tls: tonic::transport::ServerTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// 关闭健康检查预注册
    pub fn without_health(mut self) -> Self {
        self.health_enabled = false;
        self
    }

    /// 注册服务反射的文件描述符集
    pub fn with_reflection(mut self, descriptor_set: &'static [u8]) -> Self {
        self.reflection_descriptors.push(descriptor_set);
        self
    }

    /// 设置默认中间件
    pub fn middleware(&mut self, middlewares: Vec<Middleware>) {
        self.matcher.use_default(middlewares);
    }

    /// 为指定方法选择器挂载中间件
    pub fn middleware_match(&mut self, selector: impl Into<String>, middlewares: Vec<Middleware>) {
        self.matcher.add(selector, middlewares);
    }

    /// 注册 gRPC 服务
    pub fn add_service<S>(&mut self, svc: S)
    where
        S: Service<
                http::Request<BoxBody>,
                Response = http::Response<BoxBody>,
                Error = Infallible,
            > + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let mut routes = self.routes.lock().unwrap();
        if let Some(builder) = routes.as_mut() {
            builder.add_service(svc);
        }
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
        let url = endpoint::new_endpoint(&endpoint::scheme("grpc", secure), &advertised, secure);
        self.state.endpoint_tx.send_replace(Some(url.clone()));
        self.state.health.set_serving().await;
        info!(address = %actual, endpoint = %url, "🚀 gRPC server listening");

        let mut builder = tonic::transport::Server::builder();
        if let Some(tls) = &self.tls {
            builder = builder
                .tls_config(tls.clone())
                .map_err(|e| Error::internal_server("TLS_CONFIG", e.to_string()))?;
        }

        let layer = MiddlewareLayer::new(Arc::new(LayerState {
            matcher: self.matcher.clone(),
            endpoint: url,
            timeout: self.timeout,
        }));
        let mut builder = builder.layer(layer);

        let routes = self
            .routes
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::internal_server("ALREADY_STARTED", "server already started"))?
            .routes();
        let mut router = builder.add_routes(routes);

        if self.health_enabled {
            let (mut reporter, health_service) = tonic_health::server::health_reporter();
            reporter
                .set_service_status("", tonic_health::ServingStatus::Serving)
                .await;
            router = router.add_service(health_service);
        }
        for descriptor_set in &self.reflection_descriptors {
            let reflection = tonic_reflection::server::Builder::configure()
                .register_encoded_file_descriptor_set(descriptor_set)
                .build_v1()
                .map_err(|e| Error::internal_server("REFLECTION_CONFIG", e.to_string()))?;
            router = router.add_service(reflection);
        }

        let mut shutdown = self.state.shutdown_tx.subscribe();
        let signal = async move {
            if !*shutdown.borrow() {
                let _ = shutdown.changed().await;
            }
        };
        let result = router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .map_err(|e| Error::internal_server("SERVE_FAILED", e.to_string()));

        self.state.health.set_not_serving().await;
        self.state.done_tx.send_replace(true);
        info!(address = %actual, "gRPC server stopped");
        result
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
