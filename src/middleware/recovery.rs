//! 恢复中间件
//!
//! 捕获处理器 panic 并转换为 InternalServer 错误，避免拖垮服务进程。

use super::{Handler, Middleware};
use crate::error::Error;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// 创建恢复中间件
pub fn recovery() -> Middleware {
    Arc::new(|next: Handler| {
        Arc::new(move |ctx, req| {
            let next = next.clone();
            Box::pin(async move {
                match AssertUnwindSafe(next(ctx, req)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let detail = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        error!(panic = %detail, "handler panicked");
                        Err(Error::internal_server("HANDLER_PANIC", detail))
                    }
                }
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{handler_fn, BoxMessage};
    use crate::transport::CallContext;

    #[tokio::test]
    async fn test_recovery_converts_panic() {
        let terminal = handler_fn(|_ctx, _req| async { panic!("boom") });
        let handler = recovery()(terminal);
        let err = handler(CallContext::background(), Box::new(())).await.unwrap_err();
        assert!(err.is_internal_server());
        assert_eq!(err.reason, "HANDLER_PANIC");
    }

    #[tokio::test]
    async fn test_recovery_passes_through() {
        let terminal = handler_fn(|_ctx, req| async { Ok::<BoxMessage, _>(req) });
        let handler = recovery()(terminal);
        assert!(handler(CallContext::background(), Box::new(())).await.is_ok());
    }
}
