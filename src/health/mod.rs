//! 健康检查模块
//!
//! 维护服务的健康状态；传输服务器启动时恢复为 Serving，
//! 停止时翻转为 NotServing。

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Serving,
    NotServing,
}

/// 健康检查服务
#[derive(Clone, Default)]
pub struct HealthService {
    statuses: Arc<RwLock<HashMap<String, HealthStatus>>>,
    overall: Arc<RwLock<HealthStatus>>,
}

impl HealthService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置单个服务的状态
    pub async fn set_status(&self, service: impl Into<String>, status: HealthStatus) {
        let mut statuses = self.statuses.write().await;
        statuses.insert(service.into(), status);
    }

    /// 查询单个服务的状态；空服务名返回整体状态
    pub async fn get_status(&self, service: &str) -> HealthStatus {
        if service.is_empty() {
            return *self.overall.read().await;
        }
        let statuses = self.statuses.read().await;
        statuses.get(service).copied().unwrap_or_default()
    }

    /// 整体置为 Serving
    pub async fn set_serving(&self) {
        *self.overall.write().await = HealthStatus::Serving;
        let mut statuses = self.statuses.write().await;
        for status in statuses.values_mut() {
            *status = HealthStatus::Serving;
        }
    }

    /// 整体置为 NotServing
    pub async fn set_not_serving(&self) {
        *self.overall.write().await = HealthStatus::NotServing;
        let mut statuses = self.statuses.write().await;
        for status in statuses.values_mut() {
            *status = HealthStatus::NotServing;
        }
    }
}
