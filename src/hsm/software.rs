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

//! Software keys and the on-disk keystore.
//!
//! Software keys are ECDSA P-256 keys generated with [`rcgen`]. After a
//! successful enrollment the key is written as PKCS#8 PEM into the MSP
//! keystore, named after its subject key identifier (`<hex ski>_sk`), and
//! read back from there by the software enrollment strategy.

use std::path::{Path, PathBuf};

use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{EnrollError, Result};
use crate::tls::read_pkcs8_key;

/// Suffix of private key files in the keystore.
pub const KEY_FILE_SUFFIX: &str = "_sk";

/// Generate a fresh ECDSA P-256 key pair.
pub fn generate_key_pair() -> Result<KeyPair> {
    KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| EnrollError::csr(format!("Failed to generate key pair: {}", e)))
}

/// Subject key identifier: SHA-256 of the uncompressed public point.
pub fn subject_key_identifier(public_point: &[u8]) -> Vec<u8> {
    Sha256::digest(public_point).to_vec()
}

/// Write `key` into `keystore_dir` and return the file path.
pub fn store_key(key: &KeyPair, keystore_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(keystore_dir)?;

    let ski = subject_key_identifier(key.public_key_raw());
    let path = keystore_dir.join(format!("{}{}", hex::encode(ski), KEY_FILE_SUFFIX));
    std::fs::write(&path, key.serialize_pem())?;
    restrict_permissions(&path)?;

    debug!("Stored private key at {}", path.display());
    Ok(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Read the single private key held in `keystore_dir`.
///
/// The keystore must contain exactly one file and that file must hold a
/// PKCS#8 PEM key. The returned bytes are the file contents as stored.
pub fn read_keystore(keystore_dir: &Path) -> Result<Vec<u8>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(keystore_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }

    if files.len() > 1 {
        return Err(EnrollError::MultipleKeyFiles(keystore_dir.to_path_buf()));
    }
    let Some(path) = files.pop() else {
        return Err(EnrollError::PrivateKey);
    };

    let pem = std::fs::read(&path)?;
    if read_pkcs8_key(&pem).is_none() {
        return Err(EnrollError::PrivateKey);
    }
    Ok(pem)
}
