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

//! Output secrets holding an enrolled identity.
//!
//! Job-based enrollment stores its result in four secrets named
//! `ecert-<instance>-<suffix>`. The enrollment job creates them; the operator
//! side then re-parents them onto the instance so they are garbage collected
//! with it. `signcert` and `cacerts` always exist after a successful
//! enrollment, `admincerts` and `intercerts` only when there is something to
//! put in them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use tracing::{debug, info};

use crate::error::{EnrollError, Result};
use crate::orchestrator::{owner_reference, Instance, Orchestrator, OrchestratorError};
use crate::types::EnrollmentResponse;

/// One of the secrets an enrollment produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSecret {
    /// Issued certificate.
    SignCert,
    /// Root CA certificates.
    CaCerts,
    /// Admin certificates.
    AdminCerts,
    /// Intermediate CA chain.
    InterCerts,
}

/// Every output secret, in the order they are processed.
pub const ALL_OUTPUT_SECRETS: [OutputSecret; 4] = [
    OutputSecret::SignCert,
    OutputSecret::CaCerts,
    OutputSecret::AdminCerts,
    OutputSecret::InterCerts,
];

impl OutputSecret {
    fn suffix(self) -> &'static str {
        match self {
            Self::SignCert => "signcert",
            Self::CaCerts => "cacerts",
            Self::AdminCerts => "admincerts",
            Self::InterCerts => "intercerts",
        }
    }

    /// `ecert-<instance>-<suffix>`
    pub fn secret_name(self, instance: &str) -> String {
        format!("ecert-{}-{}", instance, self.suffix())
    }

    /// Whether a successful enrollment always produces this secret.
    pub fn is_required(self) -> bool {
        matches!(self, Self::SignCert | Self::CaCerts)
    }

    /// Data key for the `index`th certificate in the secret.
    pub fn data_key(self, index: usize) -> String {
        match self {
            Self::SignCert => "cert.pem".to_string(),
            Self::CaCerts => format!("cacert-{}.pem", index),
            Self::AdminCerts => format!("admincert-{}.pem", index),
            Self::InterCerts => format!("intercert-{}.pem", index),
        }
    }
}

fn secret(
    kind: OutputSecret,
    instance: &str,
    namespace: &str,
    certs: &[Vec<u8>],
    owner: Option<&OwnerReference>,
) -> Secret {
    let data: BTreeMap<String, ByteString> = certs
        .iter()
        .enumerate()
        .map(|(i, cert)| (kind.data_key(i), ByteString(cert.clone())))
        .collect();

    Secret {
        metadata: ObjectMeta {
            name: Some(kind.secret_name(instance)),
            namespace: Some(namespace.to_string()),
            owner_references: owner.map(|o| vec![o.clone()]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Build the output secrets for an enrollment response.
pub fn build_output_secrets(
    instance: &str,
    namespace: &str,
    resp: &EnrollmentResponse,
    owner: Option<&OwnerReference>,
) -> Vec<Secret> {
    let mut secrets = vec![
        secret(
            OutputSecret::SignCert,
            instance,
            namespace,
            std::slice::from_ref(&resp.sign_cert),
            owner,
        ),
        secret(OutputSecret::CaCerts, instance, namespace, &resp.ca_certs, owner),
    ];
    if !resp.admin_certs.is_empty() {
        secrets.push(secret(
            OutputSecret::AdminCerts,
            instance,
            namespace,
            &resp.admin_certs,
            owner,
        ));
    }
    if resp.has_intermediates() {
        secrets.push(secret(
            OutputSecret::InterCerts,
            instance,
            namespace,
            &resp.intermediate_certs,
            owner,
        ));
    }
    secrets
}

/// Create the output secrets, replacing any left over from an earlier run.
pub async fn create_output_secrets(
    orchestrator: &dyn Orchestrator,
    instance: &str,
    namespace: &str,
    resp: &EnrollmentResponse,
) -> Result<()> {
    for secret in build_output_secrets(instance, namespace, resp, None) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        match orchestrator.create_secret(namespace, &secret).await {
            Ok(_) => {}
            Err(OrchestratorError::AlreadyExists { .. }) => {
                debug!("Secret '{}' exists, replacing", name);
                orchestrator.update_secret(namespace, &secret).await.map_err(|e| {
                    EnrollError::orchestration(format!("failed to update secret '{}'", name), e)
                })?;
            }
            Err(e) => {
                return Err(EnrollError::orchestration(
                    format!("failed to create secret '{}'", name),
                    e,
                ))
            }
        }
        info!("Stored {}", name);
    }
    Ok(())
}

/// Make `instance` the controlling owner of its output secrets.
///
/// Missing optional secrets are skipped. Returns the updated secrets.
pub async fn adopt_output_secrets(
    orchestrator: &dyn Orchestrator,
    instance: &dyn Instance,
) -> Result<Vec<(OutputSecret, Secret)>> {
    let owner = owner_reference(instance);
    let namespace = instance.namespace();
    let mut adopted = Vec::new();

    for kind in ALL_OUTPUT_SECRETS {
        let name = kind.secret_name(instance.name());
        let mut secret = match orchestrator.get_secret(namespace, &name).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() && !kind.is_required() => {
                debug!("Optional secret '{}' not present, skipping", name);
                continue;
            }
            Err(e) => {
                return Err(EnrollError::orchestration(
                    format!("failed to get secret '{}'", name),
                    e,
                ))
            }
        };

        secret.metadata.owner_references = Some(vec![owner.clone()]);
        let secret = orchestrator
            .update_secret(namespace, &secret)
            .await
            .map_err(|e| {
                EnrollError::orchestration(format!("failed to update secret '{}'", name), e)
            })?;
        adopted.push((kind, secret));
    }

    Ok(adopted)
}

// Certificates in the order they were written, `cacert-2.pem` before `cacert-10.pem`.
fn certs_in(secret: &Secret) -> Vec<Vec<u8>> {
    let Some(data) = secret.data.as_ref() else {
        return Vec::new();
    };

    let mut entries: Vec<_> = data.iter().collect();
    entries.sort_by(|(a, _), (b, _)| (key_index(a), a).cmp(&(key_index(b), b)));
    entries.into_iter().map(|(_, v)| v.0.clone()).collect()
}

fn key_index(key: &str) -> Option<usize> {
    key.strip_suffix(".pem")?.rsplit_once('-')?.1.parse().ok()
}

/// Rebuild an enrollment response from output secrets.
///
/// The private key stays in the HSM, so the keystore is left empty.
pub fn response_from_output_secrets(secrets: &[(OutputSecret, Secret)]) -> EnrollmentResponse {
    let mut resp = EnrollmentResponse::default();
    for (kind, secret) in secrets {
        let certs = certs_in(secret);
        match kind {
            OutputSecret::SignCert => resp.sign_cert = certs.into_iter().next().unwrap_or_default(),
            OutputSecret::CaCerts => resp.ca_certs = certs,
            OutputSecret::AdminCerts => resp.admin_certs = certs,
            OutputSecret::InterCerts => resp.intermediate_certs = certs,
        }
    }
    resp
}
