//! 内存注册中心
//!
//! 注册与发现的内存实现，进程内共享。用于本地开发与测试，
//! 同时作为注册驱动的参考实现。

use super::{Discovery, Registrar, ServiceInstance, Watcher};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::debug;

/// 单个服务名下的注册状态
struct ServiceState {
    instances: Vec<ServiceInstance>,
    tx: broadcast::Sender<Vec<ServiceInstance>>,
}

impl ServiceState {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(16);
        Self { instances: Vec::new(), tx }
    }

    fn publish(&self) {
        // 没有监视器时发送失败是正常情况
        let _ = self.tx.send(self.instances.clone());
    }
}

/// 内存注册中心
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    services: Arc<RwLock<HashMap<String, ServiceState>>>,
}

impl MemoryRegistry {
    /// 创建新的内存注册中心
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registrar for MemoryRegistry {
    async fn register(&self, instance: &ServiceInstance) -> Result<()> {
        let mut services = self.services.write().await;
        let state = services.entry(instance.name.clone()).or_insert_with(ServiceState::new);
        // 同一实例 ID 重复注册视为更新，保证幂等
        state.instances.retain(|i| i.id != instance.id);
        state.instances.push(instance.clone());
        state.publish();
        debug!(service = %instance.name, id = %instance.id, "service registered");
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        let mut services = self.services.write().await;
        if let Some(state) = services.get_mut(&instance.name) {
            state.instances.retain(|i| i.id != instance.id);
            state.publish();
        }
        debug!(service = %instance.name, id = %instance.id, "service deregistered");
        Ok(())
    }
}

#[async_trait]
impl Discovery for MemoryRegistry {
    async fn get_service(&self, service_name: &str) -> Result<Vec<ServiceInstance>> {
        let services = self.services.read().await;
        Ok(services.get(service_name).map(|s| s.instances.clone()).unwrap_or_default())
    }

    async fn watch(&self, service_name: &str) -> Result<Box<dyn Watcher>> {
        let mut services = self.services.write().await;
        let state = services.entry(service_name.to_string()).or_insert_with(ServiceState::new);
        Ok(Box::new(MemoryWatcher {
            initial: Some(state.instances.clone()),
            rx: state.tx.subscribe(),
            closed: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }))
    }
}

/// 内存监视器
struct MemoryWatcher {
    initial: Option<Vec<ServiceInstance>>,
    rx: broadcast::Receiver<Vec<ServiceInstance>>,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

#[async_trait]
impl Watcher for MemoryWatcher {
    async fn next(&mut self) -> Result<Vec<ServiceInstance>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::client_closed("WATCHER_STOPPED", "watcher has been stopped"));
        }
        // 首次监视且实例列表非空时立即返回
        if let Some(initial) = self.initial.take() {
            if !initial.is_empty() {
                return Ok(initial);
            }
        }
        loop {
            tokio::select! {
                changed = self.rx.recv() => match changed {
                    Ok(instances) => return Ok(instances),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::client_closed("WATCHER_STOPPED", "registry dropped"))
                    }
                },
                _ = self.notify.notified() => {
                    return Err(Error::client_closed("WATCHER_STOPPED", "watcher has been stopped"))
                }
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        Ok(())
    }
}
