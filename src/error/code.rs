//! 错误码常量
//!
//! 错误码与 HTTP 状态码同域，gRPC 边界通过 `conversions` 做映射。

/// 400：请求参数错误
pub const CODE_BAD_REQUEST: i32 = 400;
/// 401：未认证
pub const CODE_UNAUTHORIZED: i32 = 401;
/// 403：无权限
pub const CODE_FORBIDDEN: i32 = 403;
/// 404：资源不存在
pub const CODE_NOT_FOUND: i32 = 404;
/// 409：状态冲突
pub const CODE_CONFLICT: i32 = 409;
/// 429：请求过多
pub const CODE_TOO_MANY_REQUESTS: i32 = 429;
/// 499：客户端主动断开
pub const CODE_CLIENT_CLOSED: i32 = 499;
/// 500：服务内部错误
pub const CODE_INTERNAL_SERVER: i32 = 500;
/// 503：服务不可用
pub const CODE_SERVICE_UNAVAILABLE: i32 = 503;
/// 504：网关超时
pub const CODE_GATEWAY_TIMEOUT: i32 = 504;
