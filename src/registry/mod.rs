//! 服务注册发现
//!
//! 定义注册器（Registrar）、发现器（Discovery）与监视器（Watcher）的能力集，
//! 以及注册中心里的服务实例记录。具体驱动（etcd、consul 等）由外部适配，
//! 本模块只提供内存实现作为参考与测试用途。

mod memory;

pub use memory::MemoryRegistry;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 服务实例
///
/// 注册时创建，在一次注册周期内不可变。Endpoints 为绝对 URI，
/// 形如 `http://127.0.0.1:8000?isSecure=false`、`grpc://127.0.0.1:9000?isSecure=false`。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// 实例唯一 ID，进程内稳定
    pub id: String,
    /// 服务名称
    pub name: String,
    /// 服务版本
    pub version: String,
    /// 元数据；保留键 "weight" 携带十进制有符号整数权重
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// 实例端点地址列表
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl ServiceInstance {
    /// 创建新的服务实例
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            metadata: HashMap::new(),
            endpoints: Vec::new(),
        }
    }

    /// 设置元数据
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// 设置端点列表
    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }
}

impl std::fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.id)
    }
}

impl PartialEq for ServiceInstance {
    /// 两个实例相等当且仅当 ID、名称、版本、排序后的端点与元数据全部相等
    fn eq(&self, other: &Self) -> bool {
        if self.id != other.id || self.name != other.name || self.version != other.version {
            return false;
        }
        if self.metadata != other.metadata {
            return false;
        }
        let mut a = self.endpoints.clone();
        let mut b = other.endpoints.clone();
        a.sort();
        b.sort();
        a == b
    }
}

impl Eq for ServiceInstance {}

/// 服务注册器
///
/// Register 与 Deregister 对同一实例 ID 必须幂等。
#[async_trait]
pub trait Registrar: Send + Sync {
    /// 注册服务实例
    async fn register(&self, instance: &ServiceInstance) -> Result<()>;

    /// 注销服务实例
    async fn deregister(&self, instance: &ServiceInstance) -> Result<()>;
}

/// 服务发现器
#[async_trait]
pub trait Discovery: Send + Sync {
    /// 返回指定服务的当前实例列表
    async fn get_service(&self, service_name: &str) -> Result<Vec<ServiceInstance>>;

    /// 为指定服务创建监视器
    async fn watch(&self, service_name: &str) -> Result<Box<dyn Watcher>>;
}

/// 服务监视器
///
/// `next` 在以下两种情况下返回实例列表：
/// 1. 第一次监视且实例列表非空；
/// 2. 检测到实例发生变更。
/// 否则阻塞，直到变更发生或监视器被关闭。
#[async_trait]
pub trait Watcher: Send {
    /// 等待下一次实例列表
    async fn next(&mut self) -> Result<Vec<ServiceInstance>>;

    /// 关闭监视器，未决的 `next` 以 ClientClosed 错误返回
    async fn stop(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_equal_ignores_endpoint_order() {
        let a = ServiceInstance::new("1", "helloworld", "v1").with_endpoints(vec![
            "http://127.0.0.1:8000?isSecure=false".to_string(),
            "grpc://127.0.0.1:9000?isSecure=false".to_string(),
        ]);
        let b = ServiceInstance::new("1", "helloworld", "v1").with_endpoints(vec![
            "grpc://127.0.0.1:9000?isSecure=false".to_string(),
            "http://127.0.0.1:8000?isSecure=false".to_string(),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_instance_not_equal_on_metadata() {
        let a = ServiceInstance::new("1", "helloworld", "v1");
        let b = ServiceInstance::new("1", "helloworld", "v1")
            .with_metadata([("weight".to_string(), "20".to_string())].into());
        assert_ne!(a, b);
    }
}
