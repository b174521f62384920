//! gRPC 传输
//!
//! 服务端：tonic Server 包装，中间件桥接层与健康检查、服务反射预注册；
//! 客户端：选择器驱动的 Channel 缓存与 Done 统计回填。

mod client;
mod interceptor;
mod server;

pub use client::{Client, ClientBuilder};
pub use interceptor::{MiddlewareLayer, MiddlewareService};
pub use server::Server;
