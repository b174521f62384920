//! 应用生命周期
//!
//! 统一管理进程内的传输服务器与注册中心交互：
//! 钩子回调、并发启动、端点收集、注册与注销、信号处理、优雅停机。
//! 状态机 Created → Starting → Running → Stopping → Stopped 单向推进。

use crate::error::Result as CoreResult;
use crate::registry::{Registrar, ServiceInstance};
use crate::transport::Server;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 生命周期钩子
pub type Hook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// 从异步闭包构建钩子
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// 应用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AppState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl AppState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AppState::Created,
            1 => AppState::Starting,
            2 => AppState::Running,
            3 => AppState::Stopping,
            _ => AppState::Stopped,
        }
    }
}

/// 应用构建器
pub struct AppBuilder {
    id: String,
    name: String,
    version: String,
    metadata: HashMap<String, String>,
    endpoints: Vec<String>,
    registrar: Option<Arc<dyn Registrar>>,
    registrar_timeout: Duration,
    stop_timeout: Duration,
    servers: Vec<Arc<dyn Server>>,
    handle_signals: bool,
    before_start: Vec<Hook>,
    after_start: Vec<Hook>,
    before_stop: Vec<Hook>,
    after_stop: Vec<Hook>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: String::new(),
            version: String::new(),
            metadata: HashMap::new(),
            endpoints: Vec::new(),
            registrar: None,
            registrar_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
            servers: Vec::new(),
            handle_signals: true,
            before_start: Vec::new(),
            after_start: Vec::new(),
            before_stop: Vec::new(),
            after_stop: Vec::new(),
        }
    }
}

impl AppBuilder {
    /// 服务实例 ID，缺省为随机 UUID
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 服务名称
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 服务版本
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 服务元数据
    pub fn metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// 追加静态端点（服务器上报的端点之外）
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// 服务注册器
    pub fn registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    /// 注册 / 注销操作的时限
    pub fn registrar_timeout(mut self, timeout: Duration) -> Self {
        self.registrar_timeout = timeout;
        self
    }

    /// 停机总时限
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// 追加传输服务器
    pub fn server(mut self, server: Arc<dyn Server>) -> Self {
        self.servers.push(server);
        self
    }

    /// 是否安装信号处理（SIGINT / SIGTERM / SIGQUIT）
    pub fn handle_signals(mut self, enable: bool) -> Self {
        self.handle_signals = enable;
        self
    }

    pub fn before_start(mut self, hook: Hook) -> Self {
        self.before_start.push(hook);
        self
    }

    pub fn after_start(mut self, hook: Hook) -> Self {
        self.after_start.push(hook);
        self
    }

    pub fn before_stop(mut self, hook: Hook) -> Self {
        self.before_stop.push(hook);
        self
    }

    pub fn after_stop(mut self, hook: Hook) -> Self {
        self.after_stop.push(hook);
        self
    }

    pub fn build(self) -> App {
        let (shutdown_tx, _) = watch::channel(false);
        App {
            opts: self,
            state: AtomicU8::new(AppState::Created as u8),
            shutdown_tx,
            instance: Mutex::new(None),
        }
    }
}

/// 应用
pub struct App {
    opts: AppBuilder,
    state: AtomicU8,
    shutdown_tx: watch::Sender<bool>,
    instance: Mutex<Option<ServiceInstance>>,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.opts.id
    }

    pub fn name(&self) -> &str {
        &self.opts.name
    }

    pub fn version(&self) -> &str {
        &self.opts.version
    }

    /// 当前状态
    pub fn state(&self) -> AppState {
        AppState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: AppState, to: AppState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 启动应用并阻塞直到停止
    pub async fn run(&self) -> Result<()> {
        if !self.transition(AppState::Created, AppState::Starting) {
            return Err(anyhow!("app already started"));
        }
        info!(
            service_id = %self.opts.id,
            service_name = %self.opts.name,
            version = %self.opts.version,
            "🚀 starting application"
        );

        // 启动前钩子按注册顺序串行执行，任一失败即中止
        for hook in &self.opts.before_start {
            hook().await.context("before_start hook failed")?;
        }

        // 并发启动所有服务器
        let mut servers: JoinSet<CoreResult<()>> = JoinSet::new();
        for server in &self.opts.servers {
            let server = server.clone();
            servers.spawn(async move { server.start().await });
        }

        // 收集端点；服务器在绑定监听器后同步上报
        let mut endpoints = self.opts.endpoints.clone();
        for server in &self.opts.servers {
            tokio::select! {
                bound = tokio::time::timeout(Duration::from_secs(10), server.endpoint()) => {
                    match bound {
                        Ok(Ok(url)) => endpoints.push(url),
                        Ok(Err(e)) => {
                            self.halt_servers(&mut servers).await;
                            return Err(anyhow!(e).context("failed to get server endpoint"));
                        }
                        Err(_) => {
                            self.halt_servers(&mut servers).await;
                            return Err(anyhow!("server did not bind within 10s"));
                        }
                    }
                }
                exited = servers.join_next() => {
                    let detail = match exited {
                        Some(Ok(Err(e))) => format!("server start failed: {}", e),
                        Some(Err(e)) => format!("server task panicked: {}", e),
                        _ => "server exited prematurely".to_string(),
                    };
                    self.halt_servers(&mut servers).await;
                    return Err(anyhow!(detail));
                }
            }
        }

        // 构建服务实例并注册
        let instance = ServiceInstance::new(&self.opts.id, &self.opts.name, &self.opts.version)
            .with_metadata(self.opts.metadata.clone())
            .with_endpoints(endpoints);
        if let Some(registrar) = &self.opts.registrar {
            let registered = tokio::time::timeout(
                self.opts.registrar_timeout,
                registrar.register(&instance),
            )
            .await;
            match registered {
                Ok(Ok(())) => {
                    info!(instance = %instance, "✅ service registered");
                    *self.instance.lock().unwrap() = Some(instance);
                }
                Ok(Err(e)) => {
                    error!(error = %e, "❌ service registration failed, shutting down");
                    self.halt_servers(&mut servers).await;
                    return Err(anyhow!(e).context("service registration failed"));
                }
                Err(_) => {
                    error!("❌ service registration timed out, shutting down");
                    self.halt_servers(&mut servers).await;
                    return Err(anyhow!(
                        "service registration timed out after {:?}",
                        self.opts.registrar_timeout
                    ));
                }
            }
        }

        // 启动后钩子
        for hook in &self.opts.after_start {
            if let Err(e) = hook().await {
                error!(error = %e, "after_start hook failed, shutting down");
                self.shutdown(&mut servers).await;
                return Err(e.context("after_start hook failed"));
            }
        }

        self.state.store(AppState::Running as u8, Ordering::Release);
        info!(service_name = %self.opts.name, "application running");

        // 阻塞等待：信号 / 外部停止 / 任一服务器退出
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle_signals = self.opts.handle_signals;
        let wait_signal = async move {
            if !handle_signals {
                std::future::pending::<()>().await;
                return;
            }
            use tokio::signal::unix::{signal, SignalKind};
            let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");
            let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            let mut quit = signal(SignalKind::quit()).expect("install SIGQUIT handler");
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
                _ = quit.recv() => {}
            }
        };
        let has_servers = !self.opts.servers.is_empty();
        tokio::select! {
            _ = wait_signal => {
                info!("shutdown signal received");
            }
            _ = shutdown.changed() => {
                info!("stop requested");
            }
            exited = servers.join_next(), if has_servers => {
                match exited {
                    Some(Ok(Err(e))) => warn!(error = %e, "server exited with error"),
                    Some(Err(e)) => warn!(error = %e, "server task panicked"),
                    _ => warn!("server exited"),
                }
            }
        }

        self.shutdown(&mut servers).await;
        Ok(())
    }

    /// 请求停止；可多次调用，可与 run 并发
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// 注册失败等早期错误时只停服务器，不走完整停机序列
    async fn halt_servers(&self, servers: &mut JoinSet<CoreResult<()>>) {
        for server in &self.opts.servers {
            if let Err(e) = server.stop().await {
                warn!(error = %e, "failed to stop server");
            }
        }
        while servers.join_next().await.is_some() {}
        self.state.store(AppState::Stopped as u8, Ordering::Release);
    }

    /// 完整停机序列
    async fn shutdown(&self, servers: &mut JoinSet<CoreResult<()>>) {
        if !self.transition(AppState::Running, AppState::Stopping)
            && !self.transition(AppState::Starting, AppState::Stopping)
        {
            return;
        }
        info!(service_name = %self.opts.name, "stopping application");

        // 停止前钩子，错误只记录
        for hook in &self.opts.before_stop {
            if let Err(e) = hook().await {
                warn!(error = %e, "⚠️ before_stop hook failed");
            }
        }

        // 注销服务，错误只记录
        let instance = self.instance.lock().unwrap().take();
        if let (Some(registrar), Some(instance)) = (&self.opts.registrar, instance) {
            let deregistered = tokio::time::timeout(
                self.opts.registrar_timeout,
                registrar.deregister(&instance),
            )
            .await;
            match deregistered {
                Ok(Ok(())) => info!(instance = %instance, "service deregistered"),
                Ok(Err(e)) => warn!(error = %e, "⚠️ failed to deregister service"),
                Err(_) => warn!("⚠️ deregister timed out"),
            }
        }

        // 并发停止服务器并在时限内排空
        let mut stops: JoinSet<CoreResult<()>> = JoinSet::new();
        for server in &self.opts.servers {
            let server = server.clone();
            stops.spawn(async move { server.stop().await });
        }
        let drain = async {
            while let Some(result) = stops.join_next().await {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "server stop failed"),
                    Err(e) => warn!(error = %e, "server stop task panicked"),
                }
            }
            while servers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.opts.stop_timeout, drain).await.is_err() {
            warn!(timeout = ?self.opts.stop_timeout, "⚠️ shutdown timed out, aborting servers");
            stops.abort_all();
            servers.abort_all();
        }

        // 取消根上下文，释放 run 的等待方
        self.shutdown_tx.send_replace(true);

        // 停止后钩子
        for hook in &self.opts.after_stop {
            if let Err(e) = hook().await {
                warn!(error = %e, "⚠️ after_stop hook failed");
            }
        }

        self.state.store(AppState::Stopped as u8, Ordering::Release);
        info!(service_name = %self.opts.name, "application stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_one_way() {
        let app = App::builder().name("echo").version("v1").build();
        assert_eq!(app.state(), AppState::Created);
        assert!(app.transition(AppState::Created, AppState::Starting));
        assert!(!app.transition(AppState::Created, AppState::Starting));
        assert!(app.transition(AppState::Starting, AppState::Stopping));
        assert!(!app.transition(AppState::Running, AppState::Stopping));
    }

    #[tokio::test]
    async fn test_hook_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |tag: &'static str, order: Arc<Mutex<Vec<&'static str>>>| {
            hook(move || {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(tag);
                    Ok(())
                }
            })
        };
        let app = App::builder()
            .name("echo")
            .version("v1")
            .handle_signals(false)
            .before_start(make("before_start:1", order.clone()))
            .before_start(make("before_start:2", order.clone()))
            .after_start(make("after_start", order.clone()))
            .before_stop(make("before_stop", order.clone()))
            .after_stop(make("after_stop", order.clone()))
            .build();
        let app = Arc::new(app);

        let runner = {
            let app = app.clone();
            tokio::spawn(async move { app.run().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        app.stop();
        runner.await.unwrap().unwrap();

        assert_eq!(
            order.lock().unwrap().clone(),
            vec!["before_start:1", "before_start:2", "after_start", "before_stop", "after_stop"]
        );
        assert_eq!(app.state(), AppState::Stopped);
    }

    #[tokio::test]
    async fn test_before_start_error_aborts() {
        let app = App::builder()
            .name("echo")
            .version("v1")
            .handle_signals(false)
            .before_start(hook(|| async { Err(anyhow!("boom")) }))
            .build();
        assert!(app.run().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let app = Arc::new(
            App::builder().name("echo").version("v1").handle_signals(false).build(),
        );
        let runner = {
            let app = app.clone();
            tokio::spawn(async move { app.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        app.stop();
        app.stop();
        runner.await.unwrap().unwrap();
        app.stop();
        assert_eq!(app.state(), AppState::Stopped);
    }
}
