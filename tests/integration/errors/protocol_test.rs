//! Integration tests for malformed CA responses

use base64::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::{fixtures, MockCaServer, PATH_ENROLL};
use fabric_enroller::enroller::enroll_with_client;
use fabric_enroller::{CaClient, CaClientConfig, EnrollError};

fn client(url: &str, home: &std::path::Path) -> CaClient {
    let chain = fixtures::root_only_chain("admin");
    let config = CaClientConfig::builder()
        .url(url)
        .expect("Valid URL")
        .home_dir(home)
        .csr_cn("admin")
        .build()
        .expect("Valid config");
    CaClient::new(config, chain.root_pem.into_bytes(), "admin", "adminpw")
        .expect("Client creation failed")
}

async fn mount_enroll(mock: &MockCaServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(PATH_ENROLL))
        .respond_with(ResponseTemplate::new(201).set_body_json(body))
        .mount(mock.inner())
        .await;
}

#[tokio::test]
async fn test_leaf_in_chain_is_rejected() {
    let mock = MockCaServer::start().await;
    let chain = fixtures::root_only_chain("admin");
    // The returned chain carries the end-entity certificate.
    let bogus_chain = format!("{}{}", chain.root_pem, chain.leaf_pem);
    mock.mock_enroll_success(&chain.leaf_pem, &bogus_chain).await;

    let home = tempfile::tempdir().unwrap();
    let err = enroll_with_client(&client(&mock.url(), home.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::NotCaCertificate), "got: {:?}", err);
    assert_eq!(err.to_string(), "a certificate in the CA chain is not a CA certificate");
}

#[tokio::test]
async fn test_certificate_not_base64() {
    let mock = MockCaServer::start().await;
    let chain = fixtures::root_only_chain("admin");
    mount_enroll(
        &mock,
        json!({
            "success": true,
            "result": {
                "Cert": "%%% not base64 %%%",
                "ServerInfo": {
                    "CAName": "ca",
                    "CAChain": BASE64_STANDARD.encode(&chain.root_pem),
                    "Version": "1.5.7"
                }
            },
            "errors": [],
            "messages": []
        }),
    )
    .await;

    let home = tempfile::tempdir().unwrap();
    let client = client(&mock.url(), home.path());
    client.init().await.unwrap();

    let err = client.enroll().await.unwrap_err();
    assert!(matches!(err, EnrollError::Enroll(_)), "got: {:?}", err);
}

#[tokio::test]
async fn test_envelope_without_result() {
    let mock = MockCaServer::start().await;
    mount_enroll(
        &mock,
        json!({
            "success": true,
            "result": null,
            "errors": [],
            "messages": []
        }),
    )
    .await;

    let home = tempfile::tempdir().unwrap();
    let client = client(&mock.url(), home.path());
    client.init().await.unwrap();

    let err = client.enroll().await.unwrap_err();
    assert!(err.to_string().starts_with("failed to enroll with CA"));
}

#[tokio::test]
async fn test_non_json_response() {
    let mock = MockCaServer::start().await;
    Mock::given(method("POST"))
        .and(path(PATH_ENROLL))
        .respond_with(ResponseTemplate::new(201).set_body_string("<html>proxy error</html>"))
        .mount(mock.inner())
        .await;

    let home = tempfile::tempdir().unwrap();
    let client = client(&mock.url(), home.path());
    client.init().await.unwrap();

    assert!(matches!(
        client.enroll().await.unwrap_err(),
        EnrollError::Enroll(_)
    ));
}
