//! 中间件
//!
//! 中间件是 `Handler -> Handler` 的变换；Handler 是 `(ctx, req) -> (resp, err)`
//! 的类型擦除处理函数。`chain` 把中间件列表折叠成一个中间件，
//! 列表中第一个是最外层包装。

mod logging;
mod matcher;
mod recovery;
mod validate;

pub use logging::logging;
pub use matcher::Matcher;
pub use recovery::recovery;
pub use validate::{validate, ValidateFn};

use crate::error::Result;
use crate::transport::CallContext;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// 装箱 Future
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// 类型擦除的请求 / 响应消息
pub type BoxMessage = Box<dyn Any + Send>;

/// 中间件调用的处理函数
pub type Handler = Arc<dyn Fn(CallContext, BoxMessage) -> BoxFuture<Result<BoxMessage>> + Send + Sync>;

/// HTTP / gRPC 传输中间件
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// 从闭包构建处理函数
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(CallContext, BoxMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxMessage>> + Send + 'static,
{
    Arc::new(move |ctx, req| Box::pin(f(ctx, req)))
}

/// 将中间件列表折叠为单个中间件
///
/// `chain([m1, m2, m3])(h)` 得到 `m1(m2(m3(h)))`：m1 在最外层。
pub fn chain(middlewares: &[Middleware]) -> Middleware {
    let middlewares = middlewares.to_vec();
    Arc::new(move |next: Handler| {
        let mut handler = next;
        for m in middlewares.iter().rev() {
            handler = m(handler);
        }
        handler
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 记录执行顺序的测试中间件
    fn tracer(name: &'static str, log: Arc<std::sync::Mutex<Vec<String>>>) -> Middleware {
        Arc::new(move |next: Handler| {
            let log = log.clone();
            Arc::new(move |ctx, req| {
                let log = log.clone();
                let next = next.clone();
                Box::pin(async move {
                    log.lock().unwrap().push(format!("{}:pre", name));
                    let reply = next(ctx, req).await;
                    log.lock().unwrap().push(format!("{}:post", name));
                    reply
                })
            })
        })
    }

    #[tokio::test]
    async fn test_chain_mirror_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let a = tracer("a", log.clone());
        let b = tracer("b", log.clone());
        let c = tracer("c", log.clone());

        let terminal_log = log.clone();
        let terminal = handler_fn(move |_ctx, req| {
            let log = terminal_log.clone();
            async move {
                log.lock().unwrap().push("handler".to_string());
                Ok(req)
            }
        });

        let handler = chain(&[a, b, c])(terminal);
        handler(CallContext::background(), Box::new(())).await.unwrap();

        let order = log.lock().unwrap().clone();
        assert_eq!(
            order,
            vec!["a:pre", "b:pre", "c:pre", "handler", "c:post", "b:post", "a:post"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let terminal = handler_fn(|_ctx, _req| async { Ok(Box::new(42i32) as BoxMessage) });
        let handler = chain(&[])(terminal);
        let reply = handler(CallContext::background(), Box::new(())).await.unwrap();
        assert_eq!(*reply.downcast::<i32>().unwrap(), 42);
    }
}
