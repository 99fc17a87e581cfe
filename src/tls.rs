//! TLS configuration helpers for the CA client.
//!
//! The CA is trusted through the certificate handed to us in the enrollment
//! request only; the system and webpki root stores are never consulted.

use std::time::Duration;

use rustls_pemfile::Item;
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};

use crate::error::{EnrollError, Result};

/// Timeouts applied to an HTTP client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// Overall request timeout.
    pub request: Option<Duration>,
    /// TCP connect plus TLS handshake budget.
    pub connect: Option<Duration>,
    /// How long an idle pooled connection is kept.
    pub idle: Option<Duration>,
    /// TCP keep-alive interval.
    pub keep_alive: Option<Duration>,
}

impl ClientTimeouts {
    /// Derive every timeout from a single ping budget.
    ///
    /// The connect budget, which covers the TLS handshake, is half the total.
    pub fn from_ping_timeout(timeout: Duration) -> Self {
        Self {
            request: Some(timeout),
            connect: Some(timeout / 2),
            idle: Some(timeout),
            keep_alive: Some(timeout),
        }
    }
}

/// Build a reqwest Client that trusts only `ca_tls_pem` and speaks TLS 1.2+.
pub fn build_http_client(ca_tls_pem: &[u8], timeouts: ClientTimeouts) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .user_agent(crate::USER_AGENT);

    for cert in parse_pem_certificates(ca_tls_pem)? {
        let cert = reqwest::Certificate::from_der(cert.as_ref())
            .map_err(|e| EnrollError::tls(format!("Failed to parse CA TLS certificate: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }

    if let Some(timeout) = timeouts.request {
        builder = builder.timeout(timeout);
    }
    if let Some(connect) = timeouts.connect {
        builder = builder.connect_timeout(connect);
    }
    if let Some(idle) = timeouts.idle {
        builder = builder.pool_idle_timeout(idle);
    }
    if let Some(keep_alive) = timeouts.keep_alive {
        builder = builder.tcp_keepalive(keep_alive);
    }

    builder
        .build()
        .map_err(|e| EnrollError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Parse PEM-encoded certificates.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem_data);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| result.ok())
        .collect();

    if certs.is_empty() {
        return Err(EnrollError::invalid_pem("No certificates found in PEM data"));
    }

    Ok(certs)
}

/// Read the first PKCS#8 private key from PEM data.
///
/// Returns `None` if the data holds no PKCS#8 key.
pub fn read_pkcs8_key(pem_data: &[u8]) -> Option<PrivatePkcs8KeyDer<'static>> {
    let mut reader = pem_data;
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::Pkcs8Key(key))) => return Some(key),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}
