//! HTTP 请求上下文
//!
//! 传给路由处理函数的请求视图：路径变量、查询参数、请求体绑定
//! 与按内容协商的响应编码。

use super::codec::Codec;
use crate::error::{Error, Result};
use crate::transport::{CallContext, HeaderCarrier};
use bytes::Bytes;
use http::{header, Method, Response, StatusCode, Uri};
use http_body_util::Full;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// HTTP 请求上下文
pub struct Context {
    call: CallContext,
    method: Method,
    uri: Uri,
    headers: http::HeaderMap,
    body: Bytes,
    vars: HashMap<String, String>,
    operation: String,
    request_codec: Codec,
    accept_codec: Codec,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        call: CallContext,
        method: Method,
        uri: Uri,
        headers: http::HeaderMap,
        body: Bytes,
        vars: HashMap<String, String>,
        operation: String,
        request_codec: Codec,
        accept_codec: Codec,
    ) -> Self {
        Self { call, method, uri, headers, body, vars, operation, request_codec, accept_codec }
    }

    /// 调用上下文
    pub fn call(&self) -> &CallContext {
        &self.call
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// 操作标识（路径模板）
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// 请求头
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// 路径变量
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    /// 查询参数的首个值
    pub fn query(&self, key: &str) -> Option<String> {
        let query = self.uri.query()?;
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            if k == key {
                return Some(v.to_string());
            }
        }
        None
    }

    /// 原始请求体
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 按 Content-Type 把请求体绑定到目标类型
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        self.request_codec.unmarshal(&self.body)
    }

    /// 响应头载体，处理器写入的头部在最终写出前冲刷
    pub fn reply_header(&self) -> HeaderCarrier {
        self.call
            .server_transport()
            .map(|tr| tr.reply_header().clone())
            .unwrap_or_default()
    }

    /// 按 Accept 编码响应
    pub fn result<T: Serialize>(&self, status: StatusCode, value: &T) -> Result<Response<Full<Bytes>>> {
        let body = self.accept_codec.marshal(value)?;
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, self.accept_codec.content_type())
            .body(Full::new(Bytes::from(body)))
            .map_err(Error::from)
    }

    /// 3xx 重定向响应
    pub fn redirect(&self, status: StatusCode, location: &str) -> Result<Response<Full<Bytes>>> {
        if !status.is_redirection() {
            return Err(Error::internal_server(
                "INVALID_REDIRECT",
                format!("status {} is not a redirection", status),
            ));
        }
        Response::builder()
            .status(status)
            .header(header::LOCATION, location)
            .body(Full::new(Bytes::new()))
            .map_err(Error::from)
    }

    /// 空响应
    pub fn no_content(&self) -> Result<Response<Full<Bytes>>> {
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(Bytes::new()))
            .map_err(Error::from)
    }
}
