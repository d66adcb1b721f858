use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use nfldap::config::{Config, StorageChoice, StorageConfig};
use nfldap::storage::memory::MemoryBackend;
use nfldap::Server;

fn test_config(port: u16) -> Config {
    Config {
        bind_address: "127.0.0.1".to_string(),
        port,
        acl_refresh_period: -1,
        no_authentication: true,
        storage: StorageConfig {
            backend: StorageChoice::Memory,
            ..StorageConfig::default()
        },
        log_level: tracing::Level::INFO,
    }
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::with_backend(test_config(0), Arc::new(MemoryBackend::new()));
    let server_task = tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let connect_result = timeout(Duration::from_secs(1), TcpStream::connect(addr)).await;
    assert!(connect_result.is_ok());
    drop(connect_result.unwrap().unwrap());

    server_task.abort();
}

#[tokio::test]
async fn test_server_handles_many_concurrent_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::with_backend(test_config(0), Arc::new(MemoryBackend::new()));
    let server_task = tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let mut handles = Vec::new();
    for i in 0..10 {
        handles.push(tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(stream);
            i
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap() < 10);
    }

    server_task.abort();
}

#[tokio::test]
async fn test_server_bind_error_on_occupied_port() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let server = Server::with_backend(test_config(port), Arc::new(MemoryBackend::new()));
    let result = server.run().await;
    assert!(result.is_err());
}
