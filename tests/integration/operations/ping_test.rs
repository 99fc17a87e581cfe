//! Integration tests for GET /cainfo

use std::time::Duration;

use crate::integration::{fixtures, MockCaServer};
use fabric_enroller::{CaClient, CaClientConfig, EnrollError};

fn client(url: &str, home: &std::path::Path) -> CaClient {
    let chain = fixtures::root_only_chain("admin");
    let config = CaClientConfig::builder()
        .url(url)
        .expect("Valid URL")
        .home_dir(home)
        .ca_name("ca")
        .build()
        .expect("Valid config");
    CaClient::new(config, chain.root_pem.into_bytes(), "admin", "adminpw")
        .expect("Client creation failed")
}

#[tokio::test]
async fn test_ping_healthy_ca() {
    let mock = MockCaServer::start().await;
    mock.mock_cainfo().await;
    let home = tempfile::tempdir().unwrap();

    let result = client(&mock.url(), home.path())
        .ping_ca(Duration::from_secs(5))
        .await;

    assert!(result.is_ok(), "ping failed: {:?}", result.err());
}

#[tokio::test]
async fn test_ping_non_200_fails() {
    let mock = MockCaServer::start().await;
    mock.mock_cainfo_status(503).await;
    let home = tempfile::tempdir().unwrap();

    let err = client(&mock.url(), home.path())
        .ping_ca(Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::Ping { .. }));
    let message = err.to_string();
    assert!(message.starts_with("pinging '"), "{}", message);
    assert!(message.contains("/cainfo"), "{}", message);
    assert!(message.contains("503"), "{}", message);
}

#[tokio::test]
async fn test_ping_tolerates_trailing_slash() {
    let mock = MockCaServer::start().await;
    mock.mock_cainfo().await;
    let home = tempfile::tempdir().unwrap();

    // The mock only serves /cainfo, so a double slash would 404.
    let result = client(&format!("{}/", mock.url()), home.path())
        .ping_ca(Duration::from_secs(5))
        .await;
    assert!(result.is_ok(), "ping failed: {:?}", result.err());
}
