//! 日志中间件
//!
//! 记录每次调用的传输类型、操作、耗时与结果。

use super::{Handler, Middleware};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// 创建日志中间件
pub fn logging() -> Middleware {
    Arc::new(|next: Handler| {
        Arc::new(move |ctx, req| {
            let next = next.clone();
            Box::pin(async move {
                let (kind, operation) = ctx
                    .server_transport()
                    .or_else(|| ctx.client_transport())
                    .map(|tr| (tr.kind().as_str(), tr.operation().to_string()))
                    .unwrap_or(("unknown", String::new()));
                let start = Instant::now();
                let result = next(ctx, req).await;
                let latency = start.elapsed();
                match &result {
                    Ok(_) => {
                        info!(kind = kind, operation = %operation, latency_ms = latency.as_millis() as u64, "request done");
                    }
                    Err(e) => {
                        error!(
                            kind = kind,
                            operation = %operation,
                            latency_ms = latency.as_millis() as u64,
                            code = e.code,
                            reason = %e.reason,
                            "request failed"
                        );
                    }
                }
                result
            })
        })
    })
}
