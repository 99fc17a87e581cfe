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

//! CA chain classification.
//!
//! The CA returns its chain as concatenated PEM blocks. Each block must be a
//! CA certificate. A certificate is a root when it carries no Authority Key
//! Identifier or when that identifier equals its own Subject Key Identifier;
//! every other certificate is an intermediate.
//!
//! Roots are stored one PEM block per entry. When any intermediate is present
//! the intermediate list becomes a single entry holding the whole chain as the
//! CA returned it, so consumers always get a bundle they can verify on its own.

use const_oid::db::rfc5280::{
    ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_BASIC_CONSTRAINTS, ID_CE_SUBJECT_KEY_IDENTIFIER,
};
use der::pem::LineEnding;
use der::{Decode, EncodePem};
use rustls_pemfile::Item;
use tracing::debug;
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, BasicConstraints, SubjectKeyIdentifier};
use x509_cert::Certificate;

use crate::error::{EnrollError, Result};
use crate::types::EnrollmentResponse;

/// Position of a CA certificate within its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRole {
    /// Self-signed trust anchor.
    Root,
    /// Certificate issued by another CA.
    Intermediate,
}

/// Split `chain` into roots and intermediates and record them on `resp`.
///
/// Decoding stops quietly at the first block that is not valid PEM.
pub fn parse_chain(chain: &[u8], resp: &mut EnrollmentResponse) -> Result<()> {
    let mut reader = chain;
    let mut found_intermediate = false;

    loop {
        let der = match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(der))) => der,
            Ok(Some(_)) => {
                return Err(EnrollError::certificate_parsing(
                    "failed to parse certificate in the CA chain: unexpected PEM block",
                ))
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopping CA chain decoding: {}", e);
                break;
            }
        };

        let cert = Certificate::from_der(der.as_ref()).map_err(|e| {
            EnrollError::certificate_parsing(format!(
                "failed to parse certificate in the CA chain: {}",
                e
            ))
        })?;

        if !is_ca_certificate(&cert)? {
            return Err(EnrollError::NotCaCertificate);
        }

        match classify(&cert)? {
            ChainRole::Root => {
                let pem = cert
                    .to_pem(LineEnding::LF)
                    .map_err(|e| EnrollError::certificate_parsing(e.to_string()))?;
                resp.ca_certs.push(pem.into_bytes());
            }
            ChainRole::Intermediate => found_intermediate = true,
        }
    }

    if found_intermediate {
        resp.intermediate_certs = vec![chain.to_vec()];
    }

    Ok(())
}

/// Classify a CA certificate as root or intermediate.
pub fn classify(cert: &Certificate) -> Result<ChainRole> {
    let aki = authority_key_id(cert)?;
    let ski = subject_key_id(cert)?;

    match aki {
        None => Ok(ChainRole::Root),
        Some(aki) if Some(&aki) == ski.as_ref() => Ok(ChainRole::Root),
        Some(_) => Ok(ChainRole::Intermediate),
    }
}

/// Returns true if the certificate asserts `cA` in its basic constraints.
pub fn is_ca_certificate(cert: &Certificate) -> Result<bool> {
    if let Some(extensions) = &cert.tbs_certificate.extensions {
        for ext in extensions.iter() {
            if ext.extn_id == ID_CE_BASIC_CONSTRAINTS {
                let bc = BasicConstraints::from_der(ext.extn_value.as_bytes())?;
                return Ok(bc.ca);
            }
        }
    }
    Ok(false)
}

fn authority_key_id(cert: &Certificate) -> Result<Option<Vec<u8>>> {
    if let Some(extensions) = &cert.tbs_certificate.extensions {
        for ext in extensions.iter() {
            if ext.extn_id == ID_CE_AUTHORITY_KEY_IDENTIFIER {
                let aki = AuthorityKeyIdentifier::from_der(ext.extn_value.as_bytes())?;
                return Ok(aki
                    .key_identifier
                    .map(|id| id.as_bytes().to_vec())
                    .filter(|id| !id.is_empty()));
            }
        }
    }
    Ok(None)
}

fn subject_key_id(cert: &Certificate) -> Result<Option<Vec<u8>>> {
    if let Some(extensions) = &cert.tbs_certificate.extensions {
        for ext in extensions.iter() {
            if ext.extn_id == ID_CE_SUBJECT_KEY_IDENTIFIER {
                let ski = SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes())?;
                return Ok(Some(ski.0.as_bytes().to_vec()));
            }
        }
    }
    Ok(None)
}
