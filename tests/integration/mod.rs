//! Integration test utilities and helpers
//!
//! This module provides common test infrastructure for CA client integration
//! tests: a mock CA speaking the enrollment REST API and a throwaway PKI.

use base64::prelude::*;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub mod errors;

/// CA operation paths
pub const PATH_CAINFO: &str = "/cainfo";
pub const PATH_ENROLL: &str = "/api/v1/enroll";

/// Mock CA server builder for integration tests
pub struct MockCaServer {
    server: MockServer,
}

impl MockCaServer {
    /// Create a new mock CA server
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Get the base URL of the mock server
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Mock a healthy info endpoint
    pub async fn mock_cainfo(&self) {
        Mock::given(method("GET"))
            .and(path(PATH_CAINFO))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": {"CAName": "ca", "Version": "1.5.7"},
                "errors": [],
                "messages": []
            })))
            .mount(&self.server)
            .await;
    }

    /// Mock an info endpoint answering with `status`
    pub async fn mock_cainfo_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(PATH_CAINFO))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Mock a successful enrollment returning `cert_pem` and `chain_pem`
    pub async fn mock_enroll_success(&self, cert_pem: &str, chain_pem: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_ENROLL))
            .respond_with(ResponseTemplate::new(201).set_body_json(enroll_body(cert_pem, chain_pem)))
            .mount(&self.server)
            .await;
    }

    /// Mock an enrollment rejected by the CA
    pub async fn mock_enroll_failure(&self, status: u16, code: i64, message: &str) {
        Mock::given(method("POST"))
            .and(path(PATH_ENROLL))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "success": false,
                "result": null,
                "errors": [{"code": code, "message": message}],
                "messages": []
            })))
            .mount(&self.server)
            .await;
    }
}

/// Enrollment response envelope as the CA sends it.
pub fn enroll_body(cert_pem: &str, chain_pem: &str) -> serde_json::Value {
    json!({
        "success": true,
        "result": {
            "Cert": BASE64_STANDARD.encode(cert_pem),
            "ServerInfo": {
                "CAName": "ca",
                "CAChain": BASE64_STANDARD.encode(chain_pem),
                "Version": "1.5.7"
            }
        },
        "errors": [],
        "messages": []
    })
}

/// Test fixture helpers
pub mod fixtures {
    use super::*;

    /// A root CA, an intermediate CA and an issued leaf.
    pub struct TestChain {
        pub root_pem: String,
        pub intermediate_pem: String,
        pub leaf_pem: String,
    }

    impl TestChain {
        /// Root followed by intermediate, as the CA returns it.
        pub fn chain_pem(&self) -> String {
            format!("{}{}", self.root_pem, self.intermediate_pem)
        }

        /// Root certificate, base64 encoded as an enrollment request carries it.
        pub fn root_b64(&self) -> String {
            BASE64_STANDARD.encode(&self.root_pem)
        }
    }

    fn params(cn: &str, ca: bool) -> CertificateParams {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        }
        params
    }

    fn issue(cn: &str, ca: bool, issuer: &Certificate, issuer_key: &KeyPair) -> (Certificate, KeyPair) {
        let key = KeyPair::generate().expect("key generation");
        let mut params = params(cn, ca);
        params.use_authority_key_identifier_extension = true;
        let cert = params
            .signed_by(&key, issuer, issuer_key)
            .expect("certificate signing");
        (cert, key)
    }

    /// Generate a fresh chain with the leaf issued by the intermediate.
    pub fn test_chain(leaf_cn: &str) -> TestChain {
        let root_key = KeyPair::generate().expect("key generation");
        let root = params("Test Root CA", true)
            .self_signed(&root_key)
            .expect("self signing");
        let (intermediate, intermediate_key) = issue("Test Intermediate CA", true, &root, &root_key);
        let (leaf, _) = issue(leaf_cn, false, &intermediate, &intermediate_key);

        TestChain {
            root_pem: root.pem(),
            intermediate_pem: intermediate.pem(),
            leaf_pem: leaf.pem(),
        }
    }

    /// Generate a self-signed root and a leaf issued directly by it.
    pub fn root_only_chain(leaf_cn: &str) -> TestChain {
        let root_key = KeyPair::generate().expect("key generation");
        let root = params("Test Root CA", true)
            .self_signed(&root_key)
            .expect("self signing");
        let (leaf, _) = issue(leaf_cn, false, &root, &root_key);

        TestChain {
            root_pem: root.pem(),
            intermediate_pem: String::new(),
            leaf_pem: leaf.pem(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mock_server = MockCaServer::start().await;
        assert!(!mock_server.url().is_empty());
        assert!(mock_server.url().starts_with("http://"));
    }

    #[test]
    fn test_fixture_chain_is_pem() {
        let chain = fixtures::test_chain("peer0");
        assert!(chain.chain_pem().matches("BEGIN CERTIFICATE").count() == 2);
        assert!(BASE64_STANDARD.decode(chain.root_b64()).is_ok());
    }
}
