//! End-to-end test of the metrics exporter over a real socket.
//!
//! Run with: cargo test -p skopeo-watch-core --test exporter_tests

use std::sync::Arc;

use skopeo_watch_core::config::TrackerConfig;
use skopeo_watch_core::{MetricsServer, OperationKind, OperationTracker, TransferMetrics};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_exporter_serves_live_operation() {
    let metrics = Arc::new(TransferMetrics::new().unwrap());
    let server = MetricsServer::bind("127.0.0.1:0".parse().unwrap(), metrics.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let handle = server.spawn(shutdown.clone());

    let tracker = OperationTracker::start(
        metrics.clone(),
        OperationKind::Copy,
        Some("docker://alpine"),
        Some("dir:/tmp/alpine"),
        &TrackerConfig::default(),
    );
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let response = http_get(addr, "/metrics").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#"skopeo_active_operations{operation="copy"} 1"#));
    assert!(response.contains("skopeo_active_operation_duration_seconds{"));

    let _: Result<(), std::convert::Infallible> = tracker.run(async { Ok(()) }).await;

    let response = http_get(addr, "/metrics").await;
    assert!(response.contains(r#"skopeo_active_operations{operation="copy"} 0"#));
    assert!(response.contains(r#"skopeo_operations_total{operation="copy",status="success"} 1"#));
    assert!(!response.contains("skopeo_active_operation_duration_seconds{"));

    let health = http_get(addr, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.ends_with("OK"));

    let missing = http_get(addr, "/other").await;
    assert!(missing.starts_with("HTTP/1.1 404"));

    shutdown.cancel();
    handle.await.unwrap();
}
