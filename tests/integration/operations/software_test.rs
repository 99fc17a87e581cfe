//! End-to-end tests for software enrollment

use base64::prelude::*;
use tracing::Span;

use crate::integration::{fixtures, MockCaServer};
use fabric_enroller::enroller::SoftwareEnroller;
use fabric_enroller::{CaClient, CaClientConfig, EnrollError, Enroller, EnrollmentRequest, Strategy};

fn enroller(url: &str, home: &std::path::Path, req: EnrollmentRequest) -> Enroller {
    let ca_tls = req.ca_tls_cert_pem().expect("CA TLS certificate");
    let config = CaClientConfig::builder()
        .url(url)
        .expect("Valid URL")
        .home_dir(home)
        .csr_cn(req.enroll_id.clone())
        .build()
        .expect("Valid config");
    let client = CaClient::new(config, ca_tls, req.enroll_id.clone(), req.enroll_secret.clone())
        .expect("Client creation failed");
    Enroller::new(
        Strategy::Software(SoftwareEnroller::new(req, client, Span::none())),
        Span::none(),
    )
}

#[tokio::test]
async fn test_software_enrollment_end_to_end() {
    let mock = MockCaServer::start().await;
    let chain = fixtures::test_chain("admin");
    mock.mock_enroll_success(&chain.leaf_pem, &chain.chain_pem())
        .await;

    let req = EnrollmentRequest::new("ca.example.com", "7054", "admin", "adminpw", chain.root_b64());
    let home = tempfile::tempdir().unwrap();
    let mut enroller = enroller(&mock.url(), home.path(), req);

    let result = enroller.get_crypto().await;
    assert!(result.is_ok(), "enrollment failed: {:?}", result.err());
    let resp = result.unwrap();

    assert!(!resp.sign_cert.is_empty());
    assert_eq!(resp.ca_certs.len(), 1);
    assert_eq!(
        String::from_utf8_lossy(&resp.ca_certs[0]).trim(),
        chain.root_pem.trim()
    );
    assert_eq!(resp.intermediate_certs, vec![chain.chain_pem().into_bytes()]);
    assert!(!resp.keystore.is_empty());
    assert!(!resp.is_hsm_backed());
    assert!(String::from_utf8_lossy(&resp.keystore).contains("BEGIN PRIVATE KEY"));

    // The CA TLS certificate is written for the CA client.
    assert_eq!(
        std::fs::read(home.path().join("tls-cert.pem")).unwrap(),
        chain.root_pem.as_bytes()
    );
}

#[tokio::test]
async fn test_root_only_chain_has_no_intermediates() {
    let mock = MockCaServer::start().await;
    let chain = fixtures::root_only_chain("admin");
    mock.mock_enroll_success(&chain.leaf_pem, &chain.root_pem)
        .await;

    let req = EnrollmentRequest::new("ca.example.com", "7054", "admin", "adminpw", chain.root_b64());
    let home = tempfile::tempdir().unwrap();
    let resp = enroller(&mock.url(), home.path(), req)
        .get_crypto()
        .await
        .expect("enrollment failed");

    assert_eq!(resp.ca_certs.len(), 1);
    assert!(resp.intermediate_certs.is_empty());
}

#[tokio::test]
async fn test_admin_certs_are_decoded() {
    let mock = MockCaServer::start().await;
    let chain = fixtures::root_only_chain("admin");
    mock.mock_enroll_success(&chain.leaf_pem, &chain.root_pem)
        .await;

    let admin = fixtures::root_only_chain("org1-admin").leaf_pem;
    let req = EnrollmentRequest::new("ca.example.com", "7054", "admin", "adminpw", chain.root_b64())
        .with_admin_certs(vec![BASE64_STANDARD.encode(&admin)]);
    let home = tempfile::tempdir().unwrap();
    let resp = enroller(&mock.url(), home.path(), req)
        .get_crypto()
        .await
        .expect("enrollment failed");

    assert_eq!(resp.admin_certs, vec![admin.into_bytes()]);
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_contacting_ca() {
    let mock = MockCaServer::start().await;
    let chain = fixtures::root_only_chain("admin");

    let req = EnrollmentRequest::new("ca.example.com", "7054", "admin", "", chain.root_b64());
    let home = tempfile::tempdir().unwrap();
    let err = enroller(&mock.url(), home.path(), req)
        .get_crypto()
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(matches!(err, EnrollError::MissingField(_)));
    assert!(mock.inner().received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_keystore_is_rejected() {
    let mock = MockCaServer::start().await;
    let chain = fixtures::root_only_chain("admin");
    mock.mock_enroll_success(&chain.leaf_pem, &chain.root_pem)
        .await;

    let home = tempfile::tempdir().unwrap();
    let keystore = home.path().join("msp/keystore");
    std::fs::create_dir_all(&keystore).unwrap();
    std::fs::write(keystore.join("stale_sk"), "stale").unwrap();

    let req = EnrollmentRequest::new("ca.example.com", "7054", "admin", "adminpw", chain.root_b64());
    let err = enroller(&mock.url(), home.path(), req)
        .get_crypto()
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::MultipleKeyFiles(_)));
    assert!(err
        .to_string()
        .contains("but found multiple"));
}
