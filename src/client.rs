//! CA client implementation.
//!
//! This module provides [`CaClient`], bound to one CA endpoint, for the two
//! exchanges enrollment needs: the `cainfo` health check and the enrollment
//! request itself.

use std::path::Path;
use std::time::Duration;

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CaClientConfig, Pkcs11Config};
use crate::csr::CsrBuilder;
use crate::error::{EnrollError, Result};
use crate::hsm::EnrollmentKey;
use crate::tls::{build_http_client, ClientTimeouts};
use crate::types::EnrollmentRequest;

/// File name of the issued certificate under `msp/signcerts`.
pub const SIGNCERT_FILE_NAME: &str = "cert.pem";

/// File name of the CA chain under `msp/cacerts`.
pub const CA_CHAIN_FILE_NAME: &str = "ca-chain.pem";

/// Identity material returned by the CA for one enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrolledIdentity {
    /// Issued certificate (PEM).
    pub cert: Vec<u8>,
    /// CA chain as returned by the CA (concatenated PEM).
    pub ca_chain: Vec<u8>,
    /// Name of the CA that issued the certificate.
    pub ca_name: String,
    /// CA server version.
    pub version: String,
}

/// Client for a Fabric-style CA.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use fabric_enroller::{CaClient, EnrollmentRequest};
///
/// # async fn example(req: EnrollmentRequest) -> fabric_enroller::Result<()> {
/// let client = CaClient::from_request(&req, "/crypto/peer0")?;
/// client.ping_ca(Duration::from_secs(10)).await?;
/// client.init().await?;
/// let identity = client.enroll().await?;
/// # Ok(())
/// # }
/// ```
pub struct CaClient {
    config: CaClientConfig,
    tls_cert: Vec<u8>,
    enroll_id: String,
    enroll_secret: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for CaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaClient")
            .field("config", &self.config)
            .field("enroll_id", &self.enroll_id)
            .finish_non_exhaustive()
    }
}

impl CaClient {
    /// Create a client for `config`, trusting only `tls_cert` (PEM).
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS certificate cannot be parsed.
    pub fn new(
        config: CaClientConfig,
        tls_cert: Vec<u8>,
        enroll_id: impl Into<String>,
        enroll_secret: impl Into<String>,
    ) -> Result<Self> {
        let http = build_http_client(&tls_cert, ClientTimeouts::default())?;

        Ok(Self {
            config,
            tls_cert,
            enroll_id: enroll_id.into(),
            enroll_secret: enroll_secret.into(),
            http,
        })
    }

    /// Create a client for the CA named in `req`, storing material under `home_dir`.
    pub fn from_request(req: &EnrollmentRequest, home_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        let config = CaClientConfig::from_request(req, home_dir)?;
        Self::new(
            config,
            req.ca_tls_cert_pem()?,
            req.enroll_id.clone(),
            req.enroll_secret.clone(),
        )
    }

    /// The client configuration.
    pub fn config(&self) -> &CaClientConfig {
        &self.config
    }

    /// The client home directory.
    pub fn home_dir(&self) -> &Path {
        &self.config.home_dir
    }

    /// The CA's TLS certificate (PEM).
    pub fn tls_cert(&self) -> &[u8] {
        &self.tls_cert
    }

    /// The enrollment ID this client authenticates as.
    pub fn enroll_id(&self) -> &str {
        &self.enroll_id
    }

    /// Use PKCS#11 for key generation with the given token settings.
    pub fn set_pkcs11(&mut self, pkcs11: Pkcs11Config) {
        self.config.pkcs11 = Some(pkcs11);
    }

    /// Point subsequent key operations at the PKCS#11 library at `path`.
    ///
    /// Token label and PIN configured earlier are kept.
    pub fn set_hsm_library(&mut self, path: impl Into<String>) {
        let path = path.into();
        debug!("Using PKCS#11 library {}", path);
        self.config.pkcs11.get_or_insert_with(Pkcs11Config::default).library = path;
    }

    /// Create the MSP directory layout and write the CA's TLS certificate.
    pub async fn init(&self) -> Result<()> {
        for dir in [
            self.config.keystore_dir(),
            self.config.signcerts_dir(),
            self.config.cacerts_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }

        if let Some(parent) = self.config.tls_cert_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.config.tls_cert_file, &self.tls_cert).await?;

        debug!("Initialized client home {}", self.config.home_dir.display());
        Ok(())
    }

    /// Check that the CA answers on its info endpoint within `timeout`.
    ///
    /// A dedicated HTTP client is built for the check so that every connection
    /// timeout derives from `timeout`; the whole exchange is bounded by it too.
    pub async fn ping_ca(&self, timeout: Duration) -> Result<()> {
        let url = self.config.cainfo_url();
        let http = build_http_client(&self.tls_cert, ClientTimeouts::from_ping_timeout(timeout))?;

        debug!("GET {}", url);
        let response = tokio::time::timeout(timeout, http.get(url.clone()).send())
            .await
            .map_err(|_| EnrollError::ping(url.as_str(), format!("timed out after {:?}", timeout)))?
            .map_err(|e| EnrollError::ping(url.as_str(), e))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(EnrollError::ping(
                url.as_str(),
                format!("unexpected status {}", response.status()),
            ));
        }

        Ok(())
    }

    /// Enroll with the CA.
    ///
    /// Generates a key (in the token when PKCS#11 is configured), submits a
    /// CSR for the enrollment ID and the configured hosts, and stores the
    /// issued certificate, the CA chain and, for software keys, the private
    /// key under the MSP directory.
    pub async fn enroll(&self) -> Result<EnrolledIdentity> {
        self.enroll_inner().await.map_err(|e| match e {
            EnrollError::Enroll(_) => e,
            other => EnrollError::enroll(other),
        })
    }

    async fn enroll_inner(&self) -> Result<EnrolledIdentity> {
        let key = EnrollmentKey::generate(self.config.pkcs11.as_ref())?;
        let csr = CsrBuilder::new(&self.enroll_id)
            .hosts(self.config.csr.hosts.iter().cloned())
            .build_pem(key.key_pair())?;

        let body = EnrollBody {
            certificate_request: csr,
            hosts: self.config.csr.hosts.clone(),
            profile: String::new(),
            label: String::new(),
            caname: self.config.ca_name.clone(),
        };

        let url = self.config.enroll_url();
        debug!("POST {}", url);

        let response = self
            .http
            .post(url)
            .basic_auth(&self.enroll_id, Some(&self.enroll_secret))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let envelope: CaResponse<EnrollResult> = serde_json::from_str(&text).map_err(|e| {
            EnrollError::enroll(format!("invalid response (status {}): {}", status, e))
        })?;

        if !status.is_success() || !envelope.success {
            return Err(EnrollError::enroll(format!(
                "status {}: {}",
                status,
                envelope.error_summary()
            )));
        }
        let result = envelope
            .result
            .ok_or_else(|| EnrollError::enroll("response carries no result"))?;

        let identity = EnrolledIdentity {
            cert: BASE64_STANDARD.decode(result.cert.trim())?,
            ca_chain: BASE64_STANDARD.decode(result.server_info.ca_chain.trim())?,
            ca_name: result.server_info.ca_name,
            version: result.server_info.version,
        };

        self.store(&key, &identity).await?;
        info!(
            "Enrolled '{}' with CA '{}'",
            self.enroll_id, identity.ca_name
        );
        Ok(identity)
    }

    async fn store(&self, key: &EnrollmentKey, identity: &EnrolledIdentity) -> Result<()> {
        tokio::fs::create_dir_all(self.config.signcerts_dir()).await?;
        tokio::fs::write(
            self.config.signcerts_dir().join(SIGNCERT_FILE_NAME),
            &identity.cert,
        )
        .await?;

        tokio::fs::create_dir_all(self.config.cacerts_dir()).await?;
        tokio::fs::write(
            self.config.cacerts_dir().join(CA_CHAIN_FILE_NAME),
            &identity.ca_chain,
        )
        .await?;

        key.persist(&self.config.keystore_dir())?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EnrollBody {
    certificate_request: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    hosts: Vec<String>,
    profile: String,
    label: String,
    caname: String,
}

#[derive(Debug, Deserialize)]
struct CaResponse<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CaMessage>,
}

impl<T> CaResponse<T> {
    fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return "no error details".to_string();
        }
        self.errors
            .iter()
            .map(|e| format!("code {}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Deserialize)]
struct CaMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnrollResult {
    cert: String,
    server_info: ServerInfo,
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(rename = "CAName", default)]
    ca_name: String,
    #[serde(rename = "CAChain")]
    ca_chain: String,
    #[serde(rename = "Version", default)]
    version: String,
}
