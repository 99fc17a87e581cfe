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

//! Enrollment key material.
//!
//! An enrollment key is either a software key, written to the MSP keystore
//! once the CA has issued a certificate for it, or a key generated inside a
//! PKCS#11 token, which never leaves the token. Which one is used depends on
//! whether the client configuration carries a PKCS#11 section.
//!
//! The [`config`] module holds the cluster-level HSM configuration used to
//! build enrollment jobs.

pub mod config;
pub mod software;

#[cfg(feature = "pkcs11")]
pub mod pkcs11;

pub use config::{read_hsm_config, HsmConfig};

use std::path::{Path, PathBuf};

use rcgen::KeyPair;

use crate::config::Pkcs11Config;
use crate::error::Result;

/// A freshly generated key used to sign one certificate request.
pub struct EnrollmentKey {
    key_pair: KeyPair,
    in_token: bool,
}

impl std::fmt::Debug for EnrollmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentKey")
            .field("in_token", &self.in_token)
            .finish_non_exhaustive()
    }
}

impl EnrollmentKey {
    /// Generate a key, inside the token when `pkcs11` is set.
    pub fn generate(pkcs11: Option<&Pkcs11Config>) -> Result<Self> {
        match pkcs11 {
            Some(config) => Ok(Self {
                key_pair: generate_token_key(config)?,
                in_token: true,
            }),
            None => Ok(Self {
                key_pair: software::generate_key_pair()?,
                in_token: false,
            }),
        }
    }

    /// The key pair used to sign the certificate request.
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Returns true if the private key lives in a PKCS#11 token.
    pub fn is_in_token(&self) -> bool {
        self.in_token
    }

    /// Write a software key to `keystore_dir`; token keys are left in place.
    pub fn persist(&self, keystore_dir: &Path) -> Result<Option<PathBuf>> {
        if self.in_token {
            return Ok(None);
        }
        software::store_key(&self.key_pair, keystore_dir).map(Some)
    }
}

#[cfg(feature = "pkcs11")]
fn generate_token_key(config: &Pkcs11Config) -> Result<KeyPair> {
    pkcs11::generate_key(config)
}

#[cfg(not(feature = "pkcs11"))]
fn generate_token_key(config: &Pkcs11Config) -> Result<KeyPair> {
    Err(crate::error::EnrollError::hsm(format!(
        "PKCS#11 support not compiled in, cannot use library '{}'",
        config.library
    )))
}
