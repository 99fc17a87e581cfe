// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Enrollment request and response types.
//!
//! An [`EnrollmentRequest`] carries everything needed to reach a CA and
//! authenticate with it. An [`EnrollmentResponse`] carries the identity
//! material produced by one enrollment attempt.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EnrollError, Result};

/// TLS material of the CA being enrolled against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaTls {
    /// Base64 encoded PEM certificate the CA serves TLS with.
    #[serde(rename = "cacert", default)]
    pub ca_cert: String,
}

/// CSR overrides applied to the certificate request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrInfo {
    /// Host names and IP addresses placed in the subject alternative names.
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Everything needed to enroll one identity with a CA.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    /// CA host name.
    #[serde(rename = "cahost", default)]
    pub ca_host: String,

    /// CA port.
    #[serde(rename = "caport", default)]
    pub ca_port: String,

    /// Name of the CA within the CA server.
    #[serde(rename = "caname", default)]
    pub ca_name: String,

    /// TLS certificate of the CA.
    #[serde(rename = "catls", default)]
    pub ca_tls: CaTls,

    /// Enrollment ID registered with the CA.
    #[serde(rename = "enrollid", default)]
    pub enroll_id: String,

    /// Enrollment secret registered with the CA.
    #[serde(rename = "enrollsecret", default)]
    pub enroll_secret: String,

    /// Base64 encoded admin certificates to hand back with the response.
    #[serde(rename = "admincerts", default, skip_serializing_if = "Vec::is_empty")]
    pub admin_certs: Vec<String>,

    /// Optional CSR overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csr: Option<CsrInfo>,
}

impl std::fmt::Debug for EnrollmentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentRequest")
            .field("ca_host", &self.ca_host)
            .field("ca_port", &self.ca_port)
            .field("ca_name", &self.ca_name)
            .field("enroll_id", &self.enroll_id)
            .field("enroll_secret", &!self.enroll_secret.is_empty())
            .field("admin_certs", &self.admin_certs.len())
            .field("csr", &self.csr)
            .finish()
    }
}

impl EnrollmentRequest {
    /// Create a request with the mandatory fields.
    pub fn new(
        ca_host: impl Into<String>,
        ca_port: impl Into<String>,
        enroll_id: impl Into<String>,
        enroll_secret: impl Into<String>,
        ca_tls_cert: impl Into<String>,
    ) -> Self {
        Self {
            ca_host: ca_host.into(),
            ca_port: ca_port.into(),
            enroll_id: enroll_id.into(),
            enroll_secret: enroll_secret.into(),
            ca_tls: CaTls {
                ca_cert: ca_tls_cert.into(),
            },
            ..Default::default()
        }
    }

    /// Set the CA name.
    pub fn with_ca_name(mut self, ca_name: impl Into<String>) -> Self {
        self.ca_name = ca_name.into();
        self
    }

    /// Set the base64 encoded admin certificates.
    pub fn with_admin_certs(mut self, certs: Vec<String>) -> Self {
        self.admin_certs = certs;
        self
    }

    /// Set the CSR host overrides.
    pub fn with_csr_hosts(mut self, hosts: Vec<String>) -> Self {
        self.csr = Some(CsrInfo { hosts });
        self
    }

    /// Check that every field needed for an enrollment attempt is present.
    pub fn validate(&self) -> Result<()> {
        if self.ca_host.is_empty() {
            return Err(EnrollError::MissingField("CA host"));
        }
        if self.ca_port.is_empty() {
            return Err(EnrollError::MissingField("CA port"));
        }
        if self.enroll_id.is_empty() {
            return Err(EnrollError::MissingField("enrollment ID"));
        }
        if self.enroll_secret.is_empty() {
            return Err(EnrollError::MissingField("enrollment secret"));
        }
        if self.ca_tls.ca_cert.is_empty() {
            return Err(EnrollError::MissingField("CA TLS certificate"));
        }
        Ok(())
    }

    /// The HTTPS base URL of the CA.
    pub fn ca_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("https://{}:{}", self.ca_host, self.ca_port))?)
    }

    /// Decode the CA TLS certificate into PEM bytes.
    pub fn ca_tls_cert_pem(&self) -> Result<Vec<u8>> {
        Ok(BASE64_STANDARD.decode(self.ca_tls.ca_cert.trim())?)
    }

    /// Host overrides for the CSR, empty if none were given.
    pub fn csr_hosts(&self) -> &[String] {
        self.csr.as_ref().map(|c| c.hosts.as_slice()).unwrap_or(&[])
    }

    /// Decode the admin certificates.
    pub fn decoded_admin_certs(&self) -> Result<Vec<Vec<u8>>> {
        self.admin_certs
            .iter()
            .map(|cert| Ok(BASE64_STANDARD.decode(cert.trim())?))
            .collect()
    }
}

/// Identity material produced by one enrollment attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollmentResponse {
    /// Issued leaf certificate (PEM).
    pub sign_cert: Vec<u8>,

    /// Root CA certificates, one PEM block each.
    pub ca_certs: Vec<Vec<u8>>,

    /// Either empty, or exactly one entry holding the full chain returned by the CA.
    pub intermediate_certs: Vec<Vec<u8>>,

    /// Admin certificates decoded from the request.
    pub admin_certs: Vec<Vec<u8>>,

    /// PKCS#8 PEM private key; empty when the key lives in an HSM.
    pub keystore: Vec<u8>,
}

impl EnrollmentResponse {
    /// Returns true if the private key is held outside this process.
    pub fn is_hsm_backed(&self) -> bool {
        self.keystore.is_empty()
    }

    /// Returns true if the CA chain contained intermediate certificates.
    pub fn has_intermediates(&self) -> bool {
        !self.intermediate_certs.is_empty()
    }
}
