//! 应用生命周期集成测试
//!
//! 覆盖注册往返：应用启动后恰好注册一次，停止前恰好注销一次，
//! 注册的端点与实际绑定的监听器一致。

use async_trait::async_trait;
use comet_server_core::app::App;
use comet_server_core::error::Result;
use comet_server_core::registry::{Registrar, ServiceInstance};
use comet_server_core::transport::{grpc, http};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 记录每次注册 / 注销调用的注册器
#[derive(Default)]
struct RecordingRegistrar {
    registered: Mutex<Vec<ServiceInstance>>,
    deregistered: Mutex<Vec<ServiceInstance>>,
}

#[async_trait]
impl Registrar for RecordingRegistrar {
    async fn register(&self, instance: &ServiceInstance) -> Result<()> {
        self.registered.lock().unwrap().push(instance.clone());
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        self.deregistered.lock().unwrap().push(instance.clone());
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registration_round_trip() {
    let registrar = Arc::new(RecordingRegistrar::default());

    let http_server = Arc::new(http::Server::new("127.0.0.1:0"));
    let grpc_server = Arc::new(grpc::Server::new("127.0.0.1:0"));

    let app = Arc::new(
        App::builder()
            .id("svc-1")
            .name("helloworld")
            .version("v1")
            .registrar(registrar.clone())
            .server(http_server)
            .server(grpc_server)
            .handle_signals(false)
            .stop_timeout(Duration::from_secs(5))
            .build(),
    );

    let runner = {
        let app = app.clone();
        tokio::spawn(async move { app.run().await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    app.stop();
    runner.await.unwrap().unwrap();

    // 恰好一次注册与一次注销，实例一致
    let registered = registrar.registered.lock().unwrap().clone();
    let deregistered = registrar.deregistered.lock().unwrap().clone();
    assert_eq!(registered.len(), 1);
    assert_eq!(deregistered.len(), 1);
    assert_eq!(registered[0], deregistered[0]);

    let instance = &registered[0];
    assert_eq!(instance.id, "svc-1");
    assert_eq!(instance.name, "helloworld");
    assert_eq!(instance.version, "v1");

    // 端点与绑定的监听器一致：http 与 grpc 各一个，明文
    assert_eq!(instance.endpoints.len(), 2);
    let http_endpoint = instance
        .endpoints
        .iter()
        .find(|e| e.starts_with("http://"))
        .expect("http endpoint registered");
    let grpc_endpoint = instance
        .endpoints
        .iter()
        .find(|e| e.starts_with("grpc://"))
        .expect("grpc endpoint registered");
    for endpoint in [http_endpoint, grpc_endpoint] {
        assert!(endpoint.ends_with("?isSecure=false"), "endpoint = {}", endpoint);
        let uri: ::http::Uri = endpoint.parse().unwrap();
        assert_ne!(uri.port_u16().unwrap(), 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registration_failure_stops_servers() {
    /// 注册永远失败的注册器
    struct FailingRegistrar;

    #[async_trait]
    impl Registrar for FailingRegistrar {
        async fn register(&self, _instance: &ServiceInstance) -> Result<()> {
            Err(comet_server_core::error::Error::service_unavailable(
                "REGISTRY_DOWN",
                "registry unreachable",
            ))
        }

        async fn deregister(&self, _instance: &ServiceInstance) -> Result<()> {
            Ok(())
        }
    }

    let http_server = Arc::new(http::Server::new("127.0.0.1:0"));
    let app = App::builder()
        .name("helloworld")
        .version("v1")
        .registrar(Arc::new(FailingRegistrar))
        .server(http_server)
        .handle_signals(false)
        .build();

    let err = app.run().await.unwrap_err();
    assert!(err.to_string().contains("registration"));
    assert_eq!(app.state(), comet_server_core::AppState::Stopped);
}
