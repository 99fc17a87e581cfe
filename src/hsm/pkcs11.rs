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

//! PKCS#11 key generation and signing.
//!
//! The enrollment key pair is generated inside the token selected by
//! [`Pkcs11Config`]. The private key is created sensitive and non-extractable;
//! both halves are tagged with the subject key identifier (SHA-256 of the
//! public point) as `CKA_ID` and its hex form as `CKA_LABEL`, so that the
//! peer or orderer using the identity can find the key again.
//!
//! The CSR is signed through the token: [`Pkcs11Signer`] implements
//! [`rcgen::RemoteKeyPair`], hashing locally and asking the token for a raw
//! ECDSA signature which is then DER encoded.

use std::sync::Mutex;

use const_oid::db::rfc5912::{SECP_256_R_1, SECP_384_R_1};
use const_oid::ObjectIdentifier;
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use der::asn1::{OctetString, UintRef};
use der::{Decode, Encode, Sequence};
use rcgen::{KeyPair, RemoteKeyPair, SignatureAlgorithm};
use sha2::{Digest, Sha256, Sha384};
use tracing::{debug, warn};

use super::software::subject_key_identifier;
use crate::config::Pkcs11Config;
use crate::error::{EnrollError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    P256,
    P384,
}

impl Curve {
    fn from_security_level(level: u32) -> Result<Self> {
        match level {
            256 => Ok(Self::P256),
            384 => Ok(Self::P384),
            other => Err(EnrollError::hsm(format!(
                "unsupported security level {}, expected 256 or 384",
                other
            ))),
        }
    }

    fn oid(self) -> ObjectIdentifier {
        match self {
            Self::P256 => SECP_256_R_1,
            Self::P384 => SECP_384_R_1,
        }
    }

    fn algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            Self::P256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Self::P384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        }
    }

    fn digest(self, msg: &[u8]) -> Vec<u8> {
        match self {
            Self::P256 => Sha256::digest(msg).to_vec(),
            Self::P384 => Sha384::digest(msg).to_vec(),
        }
    }
}

/// ECDSA-Sig-Value ::= SEQUENCE { r INTEGER, s INTEGER }
#[derive(Sequence)]
struct EcdsaSigValue<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

/// A key pair living inside a PKCS#11 token.
pub struct Pkcs11Signer {
    // Keeps the library loaded for the lifetime of the session.
    _context: Pkcs11,
    session: Mutex<Session>,
    private_key: ObjectHandle,
    public_point: Vec<u8>,
    curve: Curve,
}

impl Pkcs11Signer {
    /// Load the library, log in to the configured token and generate a key pair.
    pub fn generate(config: &Pkcs11Config) -> Result<Self> {
        let curve = Curve::from_security_level(config.security_level)?;

        let context = Pkcs11::new(&config.library).map_err(|e| {
            EnrollError::hsm(format!(
                "Failed to load PKCS#11 library at {}: {}",
                config.library, e
            ))
        })?;
        context
            .initialize(CInitializeArgs::OsThreads)
            .map_err(|e| EnrollError::hsm(format!("Failed to initialize PKCS#11 library: {}", e)))?;

        let slot = find_slot(&context, &config.label)?;
        let session = context
            .open_rw_session(slot)
            .map_err(|e| EnrollError::hsm(format!("Failed to open session: {}", e)))?;
        session
            .login(UserType::User, Some(&AuthPin::new(config.pin.clone())))
            .map_err(|e| EnrollError::hsm(format!("Failed to login to token: {}", e)))?;

        let ec_params = curve.oid().to_der()?;
        let public_template = vec![
            Attribute::Token(true),
            Attribute::Private(false),
            Attribute::EcParams(ec_params),
            Attribute::Verify(true),
        ];
        let private_template = vec![
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Extractable(false),
            Attribute::Sign(true),
        ];

        let (public_key, private_key) = session
            .generate_key_pair(&Mechanism::EccKeyPairGen, &public_template, &private_template)
            .map_err(|e| EnrollError::hsm(format!("Failed to generate key pair: {}", e)))?;

        let public_point = read_ec_point(&session, public_key)?;
        let ski = subject_key_identifier(&public_point);
        let tags = [
            Attribute::Id(ski.clone()),
            Attribute::Label(hex::encode(&ski).into_bytes()),
        ];
        for handle in [public_key, private_key] {
            session
                .update_attributes(handle, &tags)
                .map_err(|e| EnrollError::hsm(format!("Failed to set key ID: {}", e)))?;
        }

        debug!(
            "Generated {:?} key pair in token '{}' with SKI {}",
            curve,
            config.label,
            hex::encode(&ski)
        );

        Ok(Self {
            _context: context,
            session: Mutex::new(session),
            private_key,
            public_point,
            curve,
        })
    }

    /// Wrap the signer in an rcgen key pair usable for CSR generation.
    pub fn into_key_pair(self) -> Result<KeyPair> {
        KeyPair::from_remote(Box::new(self))
            .map_err(|e| EnrollError::hsm(format!("Failed to use token key: {}", e)))
    }
}

impl RemoteKeyPair for Pkcs11Signer {
    fn public_key(&self) -> &[u8] {
        &self.public_point
    }

    fn sign(&self, msg: &[u8]) -> std::result::Result<Vec<u8>, rcgen::Error> {
        let digest = self.curve.digest(msg);
        let session = self
            .session
            .lock()
            .map_err(|_| rcgen::Error::RemoteKeyError)?;
        let raw = session
            .sign(&Mechanism::Ecdsa, self.private_key, &digest)
            .map_err(|e| {
                warn!("PKCS#11 sign failed: {}", e);
                rcgen::Error::RemoteKeyError
            })?;
        encode_signature(&raw).map_err(|_| rcgen::Error::RemoteKeyError)
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.curve.algorithm()
    }
}

/// Generate a key pair in the token described by `config`.
pub fn generate_key(config: &Pkcs11Config) -> Result<KeyPair> {
    Pkcs11Signer::generate(config)?.into_key_pair()
}

fn find_slot(context: &Pkcs11, label: &str) -> Result<Slot> {
    let slots = context
        .get_slots_with_token()
        .map_err(|e| EnrollError::hsm(format!("Failed to get slots: {}", e)))?;

    for slot in slots {
        if label.is_empty() {
            return Ok(slot);
        }
        let info = context
            .get_token_info(slot)
            .map_err(|e| EnrollError::hsm(format!("Failed to get token info: {}", e)))?;
        if info.label().trim() == label {
            return Ok(slot);
        }
    }

    Err(EnrollError::hsm(format!(
        "No PKCS#11 token found with label '{}'",
        label
    )))
}

fn read_ec_point(session: &Session, handle: ObjectHandle) -> Result<Vec<u8>> {
    let attrs = session
        .get_attributes(handle, &[AttributeType::EcPoint])
        .map_err(|e| EnrollError::hsm(format!("Failed to get EC_POINT: {}", e)))?;

    match attrs.first() {
        Some(Attribute::EcPoint(point)) => Ok(unwrap_ec_point(point)),
        _ => Err(EnrollError::hsm("Invalid EC_POINT attribute")),
    }
}

/// Tokens return CKA_EC_POINT either DER wrapped in an OCTET STRING or raw.
fn unwrap_ec_point(point: &[u8]) -> Vec<u8> {
    match OctetString::from_der(point) {
        Ok(octets) if octets.as_bytes().first() == Some(&0x04) => octets.as_bytes().to_vec(),
        _ => point.to_vec(),
    }
}

/// Convert a PKCS#11 `r || s` signature into DER.
fn encode_signature(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(EnrollError::hsm(format!(
            "unexpected ECDSA signature length {}",
            raw.len()
        )));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    let sig = EcdsaSigValue {
        r: UintRef::new(r)?,
        s: UintRef::new(s)?,
    };
    Ok(sig.to_der()?)
}
