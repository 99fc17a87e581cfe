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

//! Certificate request generation.
//!
//! The CA fills in everything but the subject common name and the subject
//! alternative names, so the request only carries those.

use std::net::IpAddr;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};

use crate::error::{EnrollError, Result};

/// Builder for PKCS#10 certificate requests.
///
/// # Example
///
/// ```no_run
/// use fabric_enroller::csr::CsrBuilder;
/// use fabric_enroller::hsm::software::generate_key_pair;
///
/// # fn example() -> fabric_enroller::Result<()> {
/// let key = generate_key_pair()?;
/// let csr_pem = CsrBuilder::new("peer0")
///     .host("peer0.org1.example.com")
///     .host("10.0.0.7")
///     .build_pem(&key)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CsrBuilder {
    common_name: String,
    hosts: Vec<String>,
}

impl CsrBuilder {
    /// Create a builder for the given subject common name.
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            hosts: Vec::new(),
        }
    }

    /// Add a subject alternative name; IP addresses become IP SANs, anything else a DNS SAN.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }

    /// Add several subject alternative names.
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    fn params(&self) -> Result<CertificateParams> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.common_name.as_str());
        params.distinguished_name = dn;

        for host in self.hosts.iter().filter(|h| !h.is_empty()) {
            let san = match host.parse::<IpAddr>() {
                Ok(ip) => SanType::IpAddress(ip),
                Err(_) => SanType::DnsName(host.clone().try_into().map_err(|e| {
                    EnrollError::csr(format!("Invalid host name '{}': {}", host, e))
                })?),
            };
            params.subject_alt_names.push(san);
        }

        Ok(params)
    }

    /// Sign the request with `key_pair` and return it PEM encoded.
    pub fn build_pem(&self, key_pair: &KeyPair) -> Result<String> {
        let csr = self
            .params()?
            .serialize_request(key_pair)
            .map_err(|e| EnrollError::csr(format!("Failed to serialize CSR: {}", e)))?;

        csr.pem()
            .map_err(|e| EnrollError::csr(format!("Failed to encode CSR: {}", e)))
    }
}
