//! Test PKI fixtures shared by unit tests.

use der::Decode;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};

/// A root CA and an intermediate CA signed by it.
pub(crate) struct TestPki {
    pub root_pem: String,
    pub intermediate_pem: String,
    root_cert: Certificate,
    intermediate_cert: Certificate,
    intermediate_key: KeyPair,
}

impl TestPki {
    pub fn new() -> Self {
        let root_key = KeyPair::generate().unwrap();
        let root_cert = ca_params("Test Root CA", false)
            .self_signed(&root_key)
            .unwrap();

        let intermediate_key = KeyPair::generate().unwrap();
        let intermediate_cert = ca_params("Test Intermediate CA", true)
            .signed_by(&intermediate_key, &root_cert, &root_key)
            .unwrap();

        Self {
            root_pem: root_cert.pem(),
            intermediate_pem: intermediate_cert.pem(),
            root_cert,
            intermediate_cert,
            intermediate_key,
        }
    }

    /// Root followed by intermediate, as a CA returns it.
    pub fn chain_pem(&self) -> String {
        format!("{}{}", self.root_pem, self.intermediate_pem)
    }

    /// Issue a non-CA leaf certificate from the intermediate.
    pub fn issue_leaf(&self, cn: &str) -> (String, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params.use_authority_key_identifier_extension = true;
        let cert = params
            .signed_by(&key, &self.intermediate_cert, &self.intermediate_key)
            .unwrap();
        (cert.pem(), key)
    }

    pub fn root_certificate(&self) -> x509_cert::Certificate {
        x509_cert::Certificate::from_der(self.root_cert.der().as_ref()).unwrap()
    }

    pub fn intermediate_certificate(&self) -> x509_cert::Certificate {
        x509_cert::Certificate::from_der(self.intermediate_cert.der().as_ref()).unwrap()
    }
}

fn ca_params(cn: &str, with_aki: bool) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationName, "Test Org");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];
    params.use_authority_key_identifier_extension = with_aki;
    params
}
