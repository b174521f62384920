//! 路径模板路由
//!
//! 按方法加路径模板分发请求，模板支持 `{var}` 占位符。
//! 模板本身兼作操作标识，用于中间件匹配。

use super::context::Context;
use crate::error::Result;
use crate::middleware::BoxFuture;
use bytes::Bytes;
use http::Method;
use http_body_util::Full;
use std::collections::HashMap;
use std::sync::Arc;

/// 路由处理函数
pub type RouteHandler =
    Arc<dyn Fn(Context) -> BoxFuture<Result<http::Response<Full<Bytes>>>> + Send + Sync>;

/// 模板片段
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// 路径模板
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if let Some(name) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Self { raw: raw.to_string(), segments }
    }

    /// 原始模板串，即操作标识
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// 匹配路径并抽取变量
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut vars = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    vars.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(vars)
    }
}

/// 一条注册好的路由
#[derive(Clone)]
pub(crate) struct Route {
    pub method: Method,
    pub template: PathTemplate,
    pub handler: RouteHandler,
}

/// 路由器
///
/// 服务启动后不再变更，匹配按注册顺序取首个命中。
#[derive(Default, Clone)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册路由
    pub fn handle<F, Fut>(&mut self, method: Method, template: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<http::Response<Full<Bytes>>>> + Send + 'static,
    {
        let handler: RouteHandler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.routes.push(Route {
            method,
            template: PathTemplate::parse(template),
            handler,
        });
    }

    pub fn get<F, Fut>(&mut self, template: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<http::Response<Full<Bytes>>>> + Send + 'static,
    {
        self.handle(Method::GET, template, handler);
    }

    pub fn post<F, Fut>(&mut self, template: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<http::Response<Full<Bytes>>>> + Send + 'static,
    {
        self.handle(Method::POST, template, handler);
    }

    pub fn put<F, Fut>(&mut self, template: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<http::Response<Full<Bytes>>>> + Send + 'static,
    {
        self.handle(Method::PUT, template, handler);
    }

    pub fn delete<F, Fut>(&mut self, template: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<http::Response<Full<Bytes>>>> + Send + 'static,
    {
        self.handle(Method::DELETE, template, handler);
    }

    /// 匹配请求，返回路由、路径变量与操作标识
    pub(crate) fn match_route(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(Route, HashMap<String, String>)> {
        for route in &self.routes {
            if &route.method != method {
                continue;
            }
            if let Some(vars) = route.template.matches(path) {
                return Some((route.clone(), vars));
            }
        }
        None
    }
}
