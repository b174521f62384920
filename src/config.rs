//! 框架配置
//!
//! 应用、服务器与客户端的可反序列化配置记录。
//! 配置来源（文件、环境变量、远端）由外部装载，这里只定义结构。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 实例 ID，缺省运行时生成
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// 注册 / 注销时限（秒）
    #[serde(default = "default_registrar_timeout")]
    pub registrar_timeout_secs: u64,
    /// 停机总时限（秒）
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl AppConfig {
    pub fn registrar_timeout(&self) -> Duration {
        Duration::from_secs(self.registrar_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

fn default_registrar_timeout() -> u64 {
    10
}

fn default_stop_timeout() -> u64 {
    10
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，形如 `0.0.0.0:8000`
    pub addr: String,
    /// 请求超时（毫秒）
    #[serde(default = "default_request_timeout")]
    pub timeout_ms: u64,
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_request_timeout() -> u64 {
    1000
}

/// 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 目标端点：`discovery:///service-name` 或 `host:port`
    pub endpoint: String,
    /// 调用超时（毫秒）
    #[serde(default = "default_call_timeout")]
    pub timeout_ms: u64,
    /// 建链超时（毫秒）
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_ms: u64,
    /// 确定性子集大小，0 关闭
    #[serde(default = "default_subset_size")]
    pub subset_size: usize,
    /// 构建时阻塞等待首个非空节点集
    #[serde(default)]
    pub block: bool,
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

fn default_call_timeout() -> u64 {
    2000
}

fn default_dial_timeout() -> u64 {
    5000
}

fn default_subset_size() -> usize {
    25
}
