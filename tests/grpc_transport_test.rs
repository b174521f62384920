//! gRPC 传输集成测试
//!
//! 服务器预注册的健康检查服务走完整调用链：
//! 中间件桥接层、客户端 Channel 缓存与服务发现选路。

use comet_server_core::middleware::logging;
use comet_server_core::registry::{MemoryRegistry, Registrar, ServiceInstance};
use comet_server_core::transport::grpc::{ClientBuilder, Server as GrpcServer};
use comet_server_core::transport::Server as _;
use std::sync::Arc;
use std::time::Duration;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

async fn start_test_server() -> (Arc<GrpcServer>, tokio::task::JoinHandle<()>, String) {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let mut server = GrpcServer::new("127.0.0.1:0").with_timeout(Duration::from_secs(1));
    server.middleware(vec![logging()]);

    let server = Arc::new(server);
    let runner = {
        let server = server.clone();
        tokio::spawn(async move { server.start().await.unwrap() })
    };
    let endpoint = server.endpoint().await.unwrap();
    let uri: http::Uri = endpoint.parse().unwrap();
    let authority = uri.authority().unwrap().to_string();
    (server, runner, authority)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_check_through_middleware_chain() {
    let (server, runner, authority) = start_test_server().await;

    let client = ClientBuilder::new(authority).connect().await.unwrap();
    let reply = client
        .invoke("/grpc.health.v1.Health/Check", |channel| async move {
            HealthClient::new(channel)
                .check(HealthCheckRequest { service: String::new() })
                .await
        })
        .await
        .unwrap();
    // 1 == SERVING
    assert_eq!(reply.status, 1);

    server.stop().await.unwrap();
    runner.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_service_maps_to_framework_error() {
    let (server, runner, authority) = start_test_server().await;

    let client = ClientBuilder::new(authority).connect().await.unwrap();
    let err = client
        .invoke("/grpc.health.v1.Health/Check", |channel| async move {
            HealthClient::new(channel)
                .check(HealthCheckRequest { service: "no.such.Service".to_string() })
                .await
        })
        .await
        .unwrap_err();
    // tonic-health 对未知服务返回 NotFound
    assert!(err.is_not_found(), "err = {:?}", err);

    server.stop().await.unwrap();
    runner.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discovery_driven_channel() {
    let (server, runner, _authority) = start_test_server().await;
    let endpoint = server.endpoint().await.unwrap();

    let registry = Arc::new(MemoryRegistry::new());
    let instance = ServiceInstance::new("1", "helloworld", "v1").with_endpoints(vec![endpoint]);
    registry.register(&instance).await.unwrap();

    let client = ClientBuilder::new("discovery:///helloworld")
        .with_discovery(registry.clone())
        .with_block()
        .connect()
        .await
        .unwrap();

    for _ in 0..4 {
        let reply = client
            .invoke("/grpc.health.v1.Health/Check", |channel| async move {
                HealthClient::new(channel)
                    .check(HealthCheckRequest { service: String::new() })
                    .await
            })
            .await
            .unwrap();
        assert_eq!(reply.status, 1);
    }

    client.close().await.unwrap();
    server.stop().await.unwrap();
    runner.await.unwrap();
}
