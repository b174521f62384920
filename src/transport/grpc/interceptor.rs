//! gRPC 中间件桥接层
//!
//! tower 层：按方法选择器（`/pkg.Svc/Method`）查找中间件，
//! 把中间件链套在内层 gRPC 路由之上。一元与流式调用走同一条链。

use crate::error::Error;
use crate::middleware::{chain, handler_fn, BoxFuture, BoxMessage, Matcher};
use crate::transport::{CallContext, HeaderCarrier, Kind, TransportInfo};
use http::HeaderValue;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tonic::body::BoxBody;
use tower::{Layer, Service};

/// 层级共享状态
pub(crate) struct LayerState {
    pub matcher: Matcher,
    pub endpoint: String,
    pub timeout: Duration,
}

/// 中间件桥接层
#[derive(Clone)]
pub struct MiddlewareLayer {
    state: Arc<LayerState>,
}

impl MiddlewareLayer {
    pub(crate) fn new(state: Arc<LayerState>) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for MiddlewareLayer {
    type Service = MiddlewareService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MiddlewareService { inner, state: self.state.clone() }
    }
}

/// 桥接服务
#[derive(Clone)]
pub struct MiddlewareService<S> {
    inner: S,
    state: Arc<LayerState>,
}

impl<S> Service<http::Request<BoxBody>> for MiddlewareService<S>
where
    S: Service<
            http::Request<BoxBody>,
            Response = http::Response<BoxBody>,
            Error = Box<dyn std::error::Error + Send + Sync>,
        > + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = http::Response<BoxBody>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<BoxBody>) -> Self::Future {
        let state = self.state.clone();
        // 取出已就绪的服务实例，留下克隆体等待下次 poll_ready
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let operation = req.uri().path().to_string();
            let middlewares = state.matcher.match_operation(&operation);
            if middlewares.is_empty() {
                let mut inner = inner;
                return inner.call(req).await;
            }

            let reply_header = HeaderCarrier::new();
            let info = TransportInfo::new(Kind::Grpc, state.endpoint.clone(), operation.clone())
                .with_request_header(HeaderCarrier::from_map(req.headers().clone()))
                .with_reply_header(reply_header.clone());
            let ctx = CallContext::builder()
                .timeout(state.timeout)
                .server_transport(info)
                .build();

            // 终端处理函数要求 Sync，内层服务只要求 Send，用互斥量垫一层
            let inner = Arc::new(std::sync::Mutex::new(inner));
            let terminal = handler_fn(move |_ctx, req_any: BoxMessage| {
                let mut inner = inner.lock().unwrap().clone();
                async move {
                    let req = req_any.downcast::<http::Request<BoxBody>>().map_err(|_| {
                        Error::internal_server("BAD_MESSAGE", "unexpected request message")
                    })?;
                    match inner.call(*req).await {
                        Ok(response) => Ok(Box::new(response) as BoxMessage),
                        Err(err) => Err(Error::internal_server("ROUTE_FAILED", err.to_string())),
                    }
                }
            });
            let handler = chain(&middlewares)(terminal);

            let outcome =
                match tokio::time::timeout(state.timeout, handler(ctx, Box::new(req))).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::gateway_timeout(
                        "REQUEST_TIMEOUT",
                        format!("operation {} exceeded {:?}", operation, state.timeout),
                    )),
                };

            match outcome {
                Ok(reply) => match reply.downcast::<http::Response<BoxBody>>() {
                    Ok(response) => Ok(*response),
                    Err(_) => Ok(status_response(&tonic::Status::internal(
                        "unexpected reply message",
                    ))),
                },
                // 处理器错误序列化为 grpc 状态，连接保持
                Err(err) => Ok(status_response(&err.into())),
            }
        })
    }
}

/// Trailers-Only 形式的 grpc 错误响应
fn status_response(status: &tonic::Status) -> http::Response<BoxBody> {
    let mut response = http::Response::new(tonic::body::empty_body());
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/grpc"),
    );
    headers.insert("grpc-status", HeaderValue::from(status.code() as i32));
    if !status.message().is_empty() {
        if let Ok(message) = HeaderValue::try_from(status.message()) {
            headers.insert("grpc-message", message);
        }
    }
    for kv in status.metadata().iter() {
        if let tonic::metadata::KeyAndValueRef::Ascii(key, value) = kv {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::try_from(key.as_str()),
                HeaderValue::try_from(value.to_str().unwrap_or_default()),
            ) {
                headers.insert(name, value);
            }
        }
    }
    response
}
