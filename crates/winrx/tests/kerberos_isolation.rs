//! Kerberos cache isolation across concurrent sessions

mod common;

use common::{FakeTicketProvider, RecordingTransport};
use secrecy::Secret;
use tokio::net::TcpListener;
use winrx::kerberos::KRB5_CACHE_ENV;
use winrx::{AuthScheme, RemoteSession, SessionConfig, WinrxError};

async fn local_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn kerberos_config(port: u16, execution_id: &str) -> SessionConfig {
    SessionConfig::builder("127.0.0.1")
        .with_port(port)
        .with_credentials("jdoe", Secret::new("hunter2".to_string()))
        .with_domain("corp.local")
        .with_auth_scheme(AuthScheme::Kerberos)
        .with_kerberos_unique_cache_file(true)
        .with_execution_id(execution_id)
        .build()
        .unwrap()
}

#[tokio::test]
async fn concurrent_sessions_use_distinct_cache_files() {
    let (_listener, port) = local_listener().await;
    let id_a = format!("exec-{}", uuid::Uuid::new_v4());
    let id_b = format!("exec-{}", uuid::Uuid::new_v4());

    let config_a = kerberos_config(port, &id_a);
    let config_b = kerberos_config(port, &id_b);
    let path_a = config_a.cache_file_path.clone().unwrap();
    let path_b = config_b.cache_file_path.clone().unwrap();
    assert_ne!(path_a, path_b);

    let mut session_a = RemoteSession::new(config_a, Box::new(RecordingTransport::new()));
    let mut session_b = RemoteSession::new(config_b, Box::new(RecordingTransport::new()));
    let provider = FakeTicketProvider::new();
    session_a.open(&provider, None).await.unwrap();
    session_b.open(&provider, None).await.unwrap();

    // Both caches exist while both sessions are open
    assert!(path_a.exists());
    assert!(path_b.exists());

    // Each close deletes only its own cache file
    session_a.close().await;
    assert!(!path_a.exists());
    assert!(path_b.exists());

    session_b.close().await;
    assert!(!path_b.exists());
}

#[tokio::test]
async fn cache_selector_is_exported_to_the_remote_shell() {
    let (_listener, port) = local_listener().await;
    let id = format!("exec-{}", uuid::Uuid::new_v4());
    let config = kerberos_config(port, &id);
    let cache_path = config.cache_file_path.clone().unwrap();

    let transport = RecordingTransport::new();
    let created = transport.created_options.clone();
    let mut session = RemoteSession::new(config, Box::new(transport));
    session.open(&FakeTicketProvider::new(), None).await.unwrap();

    let options = created.lock().unwrap()[0].clone();
    let selector = options.environment.get(KRB5_CACHE_ENV).unwrap();
    assert_eq!(selector, &format!("FILE:{}", cache_path.display()));

    session.close().await;
}

#[tokio::test]
async fn double_close_deletes_cache_at_most_once() {
    let (_listener, port) = local_listener().await;
    let id = format!("exec-{}", uuid::Uuid::new_v4());
    let config = kerberos_config(port, &id);
    let cache_path = config.cache_file_path.clone().unwrap();

    let mut session = RemoteSession::new(config, Box::new(RecordingTransport::new()));
    session.open(&FakeTicketProvider::new(), None).await.unwrap();
    assert!(cache_path.exists());

    session.close().await;
    assert!(!cache_path.exists());

    // Recreate the path; a second close must not touch it again
    std::fs::write(&cache_path, b"other-session").unwrap();
    session.close().await;
    assert!(cache_path.exists());
    std::fs::remove_file(&cache_path).unwrap();
}

#[tokio::test]
async fn unreachable_host_is_a_connectivity_error_before_ticketing() {
    // A bound-then-dropped listener leaves the port closed
    let port = {
        let (listener, port) = local_listener().await;
        drop(listener);
        port
    };
    let id = format!("exec-{}", uuid::Uuid::new_v4());
    let config = kerberos_config(port, &id);

    let provider = FakeTicketProvider::new();
    let mut session = RemoteSession::new(config, Box::new(RecordingTransport::new()));
    let result = session.open(&provider, None).await;

    assert!(matches!(result, Err(WinrxError::Connectivity(_))));
    // The ticket helper was never invoked
    assert!(provider.acquired.lock().unwrap().is_empty());
}
