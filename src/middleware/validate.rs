//! 校验中间件
//!
//! 在处理器之前运行调用方提供的校验函数，失败时以 BadRequest
//! 短路返回，不再进入内层处理器。

use super::{BoxMessage, Handler, Middleware};
use crate::error::Result;
use crate::transport::CallContext;
use std::sync::Arc;

/// 校验函数
pub type ValidateFn = Arc<dyn Fn(&CallContext, &BoxMessage) -> Result<()> + Send + Sync>;

/// 创建校验中间件
pub fn validate(check: ValidateFn) -> Middleware {
    Arc::new(move |next: Handler| {
        let check = check.clone();
        Arc::new(move |ctx, req| {
            let check = check.clone();
            let next = next.clone();
            Box::pin(async move {
                check(&ctx, &req)?;
                next(ctx, req).await
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::middleware::handler_fn;

    #[tokio::test]
    async fn test_validate_short_circuits() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_in_handler = called.clone();
        let terminal = handler_fn(move |_ctx, req| {
            let called = called_in_handler.clone();
            async move {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(req)
            }
        });

        let reject: ValidateFn =
            Arc::new(|_ctx, _req| Err(Error::bad_request("INVALID_ARGUMENT", "rejected")));
        let handler = validate(reject)(terminal);
        let err = handler(CallContext::background(), Box::new(())).await.unwrap_err();
        assert!(err.is_bad_request());
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_validate_passes_through() {
        let terminal = handler_fn(|_ctx, req| async move { Ok(req) });
        let accept: ValidateFn = Arc::new(|_ctx, _req| Ok(()));
        let handler = validate(accept)(terminal);
        assert!(handler(CallContext::background(), Box::new(())).await.is_ok());
    }
}
