//! Integration tests for network error handling

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::{fixtures, MockCaServer, PATH_CAINFO};
use fabric_enroller::{CaClient, CaClientConfig, EnrollError};

fn client(url: &str, home: &std::path::Path) -> CaClient {
    let chain = fixtures::root_only_chain("admin");
    let config = CaClientConfig::builder()
        .url(url)
        .expect("Valid URL")
        .home_dir(home)
        .build()
        .expect("Valid config");
    CaClient::new(config, chain.root_pem.into_bytes(), "admin", "adminpw")
        .expect("Client creation failed")
}

#[tokio::test]
async fn test_ping_connection_refused() {
    let home = tempfile::tempdir().unwrap();

    // Nothing listens on the discard port.
    let err = client("http://127.0.0.1:9", home.path())
        .ping_ca(Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::Ping { .. }), "got: {:?}", err);
    assert!(err.to_string().contains("http://127.0.0.1:9/cainfo"));
}

#[tokio::test]
async fn test_ping_times_out_on_slow_ca() {
    let mock = MockCaServer::start().await;
    Mock::given(method("GET"))
        .and(path(PATH_CAINFO))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(mock.inner())
        .await;
    let home = tempfile::tempdir().unwrap();

    let started = std::time::Instant::now();
    let err = client(&mock.url(), home.path())
        .ping_ca(Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::Ping { .. }), "got: {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_enroll_against_missing_endpoint() {
    // A bare server with no mocks answers 404 to everything.
    let mock = MockCaServer::start().await;
    let home = tempfile::tempdir().unwrap();
    let client = client(&mock.url(), home.path());
    client.init().await.unwrap();

    let err = client.enroll().await.unwrap_err();
    assert!(matches!(err, EnrollError::Enroll(_)), "got: {:?}", err);
}
