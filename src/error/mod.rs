//! Comet 统一错误类型
//!
//! 框架内所有组件共享同一个错误模型：`{code, reason, message, metadata, cause}`。
//! 错误相等性只由 `(code, reason)` 决定，metadata 与 cause 不参与比较。

mod code;
mod conversions;

pub use code::*;
pub use conversions::{from_grpc_code, to_grpc_code};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// 未知错误的默认错误码
pub const UNKNOWN_CODE: i32 = 500;
/// 未知错误的默认原因
pub const UNKNOWN_REASON: &str = "";

/// Comet 统一错误类型
///
/// code 与 HTTP 状态码同域；gRPC 传输在边界处做码值映射。
#[derive(ThisError, Debug, Clone, Serialize, Deserialize)]
#[error("error: code = {code} reason = {reason} message = {message} metadata = {metadata:?}")]
pub struct Error {
    /// 错误码（HTTP 状态码域）
    pub code: i32,
    /// 错误原因，面向程序的稳定标识
    pub reason: String,
    /// 错误描述，面向人的可读信息
    pub message: String,
    /// 附加元数据
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// 根因，不参与序列化与比较
    #[serde(skip)]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.reason == other.reason
    }
}

impl Eq for Error {}

impl Error {
    /// 创建新的错误
    pub fn new(code: i32, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            message: message.into(),
            metadata: HashMap::new(),
            cause: None,
        }
    }

    /// 设置根因
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 设置元数据
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// 获取根因
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        self.cause.as_deref()
    }

    /// 根因是否为操作系统网络错误（`std::io::Error`）
    pub fn has_io_cause(&self) -> bool {
        self.cause
            .as_deref()
            .map(|c| c.is::<std::io::Error>())
            .unwrap_or(false)
    }

    /// 将任意错误转换为框架错误
    ///
    /// 已经是框架错误的原样返回，否则归入未知错误。
    pub fn from_std(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = err.to_string();
        Self::new(UNKNOWN_CODE, UNKNOWN_REASON, message).with_cause(err)
    }

    /// 判断是否为可重试的错误
    ///
    /// 只有 ServiceUnavailable 与 GatewayTimeout 被视为可重试。
    pub fn is_retryable(&self) -> bool {
        self.code == CODE_SERVICE_UNAVAILABLE || self.code == CODE_GATEWAY_TIMEOUT
    }

    // ============================================================
    // 便捷构造：按错误类别
    // ============================================================

    /// 400：调用方参数错误，修正后可以重试
    pub fn bad_request(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_BAD_REQUEST, reason, message)
    }

    /// 401：未认证
    pub fn unauthorized(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_UNAUTHORIZED, reason, message)
    }

    /// 403：无权限
    pub fn forbidden(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_FORBIDDEN, reason, message)
    }

    /// 404：资源不存在
    pub fn not_found(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_NOT_FOUND, reason, message)
    }

    /// 409：状态冲突
    pub fn conflict(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_CONFLICT, reason, message)
    }

    /// 429：请求过多
    pub fn too_many_requests(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_TOO_MANY_REQUESTS, reason, message)
    }

    /// 499：调用方主动放弃
    pub fn client_closed(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_CLIENT_CLOSED, reason, message)
    }

    /// 500：服务端内部错误，不可重试
    pub fn internal_server(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL_SERVER, reason, message)
    }

    /// 503：服务不可用，可重试
    pub fn service_unavailable(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_SERVICE_UNAVAILABLE, reason, message)
    }

    /// 504：上游超时，可重试
    pub fn gateway_timeout(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CODE_GATEWAY_TIMEOUT, reason, message)
    }

    /// 500：未知错误
    pub fn unknown(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(UNKNOWN_CODE, reason, message)
    }

    // ============================================================
    // 类别判断
    // ============================================================

    pub fn is_bad_request(&self) -> bool {
        self.code == CODE_BAD_REQUEST
    }

    pub fn is_unauthorized(&self) -> bool {
        self.code == CODE_UNAUTHORIZED
    }

    pub fn is_forbidden(&self) -> bool {
        self.code == CODE_FORBIDDEN
    }

    pub fn is_not_found(&self) -> bool {
        self.code == CODE_NOT_FOUND
    }

    pub fn is_conflict(&self) -> bool {
        self.code == CODE_CONFLICT
    }

    pub fn is_too_many_requests(&self) -> bool {
        self.code == CODE_TOO_MANY_REQUESTS
    }

    pub fn is_client_closed(&self) -> bool {
        self.code == CODE_CLIENT_CLOSED
    }

    pub fn is_internal_server(&self) -> bool {
        self.code == CODE_INTERNAL_SERVER
    }

    pub fn is_service_unavailable(&self) -> bool {
        self.code == CODE_SERVICE_UNAVAILABLE
    }

    pub fn is_gateway_timeout(&self) -> bool {
        self.code == CODE_GATEWAY_TIMEOUT
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_code_and_reason() {
        let a = Error::not_found("USER_NOT_FOUND", "user 1 not found");
        let b = Error::not_found("USER_NOT_FOUND", "user 2 not found")
            .with_metadata([("id".to_string(), "2".to_string())].into());
        let c = Error::not_found("ORDER_NOT_FOUND", "order not found");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::service_unavailable("no_available_node", "").is_retryable());
        assert!(Error::gateway_timeout("UPSTREAM_TIMEOUT", "").is_retryable());
        assert!(!Error::internal_server("PANIC", "").is_retryable());
        assert!(!Error::bad_request("INVALID", "").is_retryable());
    }

    #[test]
    fn test_io_cause() {
        let err = Error::service_unavailable("CONN_REFUSED", "connect failed")
            .with_cause(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        assert!(err.has_io_cause());
        assert!(!Error::internal_server("X", "").has_io_cause());
    }

    #[test]
    fn test_wire_round_trip() {
        let err = Error::conflict("VERSION_MISMATCH", "stale version")
            .with_metadata([("expected".to_string(), "v2".to_string())].into());
        let body = serde_json::to_string(&err).unwrap();
        let decoded: Error = serde_json::from_str(&body).unwrap();
        assert_eq!(err, decoded);
        assert_eq!(decoded.metadata.get("expected").unwrap(), "v2");
    }
}
