//! HTTP 传输
//!
//! 服务端：路径模板路由 + 中间件链 + 编解码协商 + 超时与 TLS；
//! 客户端：编码、服务发现、节点选择、往返与错误解码。

pub mod codec;
mod client;
mod context;
mod router;
mod server;
mod tls;

pub use client::{
    CallOptions, Client, ClientBuilder, ErrorDecoder, PlainRoundTripper, RoundTripper,
    TlsRoundTripper,
};
pub use codec::{codec_for_header, content_subtype, Codec};
pub use context::Context;
pub use router::{PathTemplate, RouteHandler, Router};
pub use server::Server;
pub use tls::{ClientTlsConfig, ServerTlsConfig};
