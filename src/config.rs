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

//! Configuration types for the CA client and enrollment jobs.
//!
//! [`CaClientConfig`] is also the document handed to an enrollment job: it is
//! serialized to YAML, stored in a transient config map and read back by the
//! `enroller` binary inside the job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;
use crate::types::EnrollmentRequest;

/// Name of the TLS certificate file written into the client home directory.
pub const TLS_CERT_FILE_NAME: &str = "tls-cert.pem";

/// Configuration for a [`CaClient`](crate::CaClient).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaClientConfig {
    /// CA base URL (e.g., "https://ca.example.com:7054").
    pub url: Url,

    /// Directory holding the client's MSP material.
    pub home_dir: PathBuf,

    /// Name of the CA within the CA server; empty selects the default CA.
    #[serde(default)]
    pub ca_name: String,

    /// File the CA's TLS certificate is written to and read from.
    pub tls_cert_file: PathBuf,

    /// Certificate request settings.
    #[serde(default)]
    pub csr: CsrConfig,

    /// PKCS#11 settings; when present keys are generated inside the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkcs11: Option<Pkcs11Config>,
}

impl std::fmt::Debug for CaClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaClientConfig")
            .field("url", &self.url.as_str())
            .field("home_dir", &self.home_dir)
            .field("ca_name", &self.ca_name)
            .field("tls_cert_file", &self.tls_cert_file)
            .field("csr", &self.csr)
            .field("pkcs11", &self.pkcs11)
            .finish()
    }
}

impl CaClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> CaClientConfigBuilder {
        CaClientConfigBuilder::new()
    }

    /// Build a configuration for `req` rooted at `home_dir`.
    pub fn from_request(req: &EnrollmentRequest, home_dir: impl Into<PathBuf>) -> Result<Self> {
        let home_dir = home_dir.into();
        Ok(Self {
            url: req.ca_url()?,
            tls_cert_file: home_dir.join(TLS_CERT_FILE_NAME),
            home_dir,
            ca_name: req.ca_name.clone(),
            csr: CsrConfig {
                cn: req.enroll_id.clone(),
                hosts: req.csr_hosts().to_vec(),
            },
            pkcs11: None,
        })
    }

    /// URL of the CA info endpoint used for health checks.
    pub fn cainfo_url(&self) -> Url {
        self.build_url("/cainfo")
    }

    /// URL of the enrollment endpoint.
    pub fn enroll_url(&self) -> Url {
        self.build_url("/api/v1/enroll")
    }

    fn build_url(&self, path: &str) -> Url {
        let mut url = self.url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base, path));
        url
    }

    /// `<home>/msp`
    pub fn msp_dir(&self) -> PathBuf {
        self.home_dir.join("msp")
    }

    /// `<home>/msp/keystore`
    pub fn keystore_dir(&self) -> PathBuf {
        self.msp_dir().join("keystore")
    }

    /// `<home>/msp/signcerts`
    pub fn signcerts_dir(&self) -> PathBuf {
        self.msp_dir().join("signcerts")
    }

    /// `<home>/msp/cacerts`
    pub fn cacerts_dir(&self) -> PathBuf {
        self.msp_dir().join("cacerts")
    }

    /// Serialize to the YAML document handed to enrollment jobs.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse a YAML document produced by [`to_yaml`](Self::to_yaml).
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load the configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }
}

/// Certificate request settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrConfig {
    /// Subject common name; the enrollment ID.
    #[serde(default)]
    pub cn: String,

    /// DNS names or IP addresses for the subject alternative names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
}

/// PKCS#11 token settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pkcs11Config {
    /// Path of the PKCS#11 library to load.
    #[serde(default)]
    pub library: String,

    /// Label of the token to use.
    #[serde(default)]
    pub label: String,

    /// User PIN for the token.
    #[serde(default)]
    pub pin: String,

    /// Key strength in bits: 256 selects P-256, 384 selects P-384.
    #[serde(default = "default_security_level")]
    pub security_level: u32,

    /// Hash family used for signing.
    #[serde(default = "default_hash_family")]
    pub hash_family: String,
}

fn default_security_level() -> u32 {
    256
}

fn default_hash_family() -> String {
    "SHA2".to_string()
}

impl Default for Pkcs11Config {
    fn default() -> Self {
        Self {
            library: String::new(),
            label: String::new(),
            pin: String::new(),
            security_level: default_security_level(),
            hash_family: default_hash_family(),
        }
    }
}

impl std::fmt::Debug for Pkcs11Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs11Config")
            .field("library", &self.library)
            .field("label", &self.label)
            .field("pin", &!self.pin.is_empty())
            .field("security_level", &self.security_level)
            .field("hash_family", &self.hash_family)
            .finish()
    }
}

/// Bounds on an enrollment job's lifecycle.
///
/// There are no defaults; callers choose both values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTimeouts {
    /// Time allowed for the job to report an active replica.
    pub job_start: Duration,

    /// Time allowed from active to a terminal state.
    pub job_completion: Duration,
}

impl JobTimeouts {
    /// Create job timeouts.
    pub fn new(job_start: Duration, job_completion: Duration) -> Self {
        Self {
            job_start,
            job_completion,
        }
    }
}

/// Builder for [`CaClientConfig`].
#[derive(Default)]
pub struct CaClientConfigBuilder {
    url: Option<Url>,
    home_dir: Option<PathBuf>,
    ca_name: String,
    tls_cert_file: Option<PathBuf>,
    csr: CsrConfig,
    pkcs11: Option<Pkcs11Config>,
}

impl CaClientConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CA URL.
    pub fn url(mut self, url: impl AsRef<str>) -> std::result::Result<Self, url::ParseError> {
        self.url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Set the CA URL from a pre-parsed URL.
    pub fn url_parsed(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Set the client home directory.
    pub fn home_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(dir.into());
        self
    }

    /// Set the CA name.
    pub fn ca_name(mut self, name: impl Into<String>) -> Self {
        self.ca_name = name.into();
        self
    }

    /// Override the TLS certificate file location.
    pub fn tls_cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_cert_file = Some(path.into());
        self
    }

    /// Set the CSR common name.
    pub fn csr_cn(mut self, cn: impl Into<String>) -> Self {
        self.csr.cn = cn.into();
        self
    }

    /// Set the CSR hosts.
    pub fn csr_hosts(mut self, hosts: Vec<String>) -> Self {
        self.csr.hosts = hosts;
        self
    }

    /// Generate keys inside a PKCS#11 token.
    pub fn pkcs11(mut self, pkcs11: Pkcs11Config) -> Self {
        self.pkcs11 = Some(pkcs11);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or home directory is not set.
    pub fn build(self) -> std::result::Result<CaClientConfig, &'static str> {
        let url = self.url.ok_or("url is required")?;
        let home_dir = self.home_dir.ok_or("home_dir is required")?;
        let tls_cert_file = self
            .tls_cert_file
            .unwrap_or_else(|| home_dir.join(TLS_CERT_FILE_NAME));

        Ok(CaClientConfig {
            url,
            home_dir,
            ca_name: self.ca_name,
            tls_cert_file,
            csr: self.csr,
            pkcs11: self.pkcs11,
        })
    }
}
