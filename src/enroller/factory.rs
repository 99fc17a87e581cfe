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

//! Strategy selection.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, info_span};

use super::job::JobContext;
use super::{Enroller, HsmJobEnroller, HsmProxyEnroller, SoftwareEnroller, Strategy};
use crate::client::CaClient;
use crate::config::{CaClientConfig, JobTimeouts};
use crate::error::{EnrollError, Result};
use crate::hsm::read_hsm_config;
use crate::job::JobMode;
use crate::orchestrator::{Instance, Orchestrator};
use crate::types::EnrollmentRequest;

/// Strategy variants, without their state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// In-process software key.
    Software,
    /// HSM through a PKCS#11 proxy.
    HsmProxy,
    /// HSM through an enrollment job.
    HsmSidecarJob,
    /// HSM through an enrollment job with a PKCS#11 daemon.
    HsmDaemonSidecarJob,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Software => "software",
            Self::HsmProxy => "hsm-proxy",
            Self::HsmSidecarJob => "hsm-sidecar-job",
            Self::HsmDaemonSidecarJob => "hsm-daemon-sidecar-job",
        };
        f.write_str(name)
    }
}

/// Pick a strategy.
///
/// | HSM enabled | proxy | daemon configured | strategy |
/// |---|---|---|---|
/// | no | - | - | software |
/// | yes | yes | - | HSM proxy |
/// | yes | no | yes | HSM daemon sidecar job |
/// | yes | no | no | HSM sidecar job |
pub fn select_strategy(hsm_enabled: bool, proxy: bool, daemon_configured: bool) -> StrategyKind {
    match (hsm_enabled, proxy, daemon_configured) {
        (false, _, _) => StrategyKind::Software,
        (true, true, _) => StrategyKind::HsmProxy,
        (true, false, true) => StrategyKind::HsmDaemonSidecarJob,
        (true, false, false) => StrategyKind::HsmSidecarJob,
    }
}

/// Build the enroller for `instance`.
///
/// The request is validated first, so a missing field is reported before any
/// client is built. The HSM configuration is only read for job-based
/// strategies; failing to read it is an error and no enroller is returned. Key material is stored
/// under `storage_path`, and the CA is trusted through `ca_tls` (PEM).
pub async fn new_enroller(
    req: EnrollmentRequest,
    orchestrator: Arc<dyn Orchestrator>,
    instance: Arc<dyn Instance>,
    storage_path: impl Into<PathBuf>,
    ca_tls: Vec<u8>,
    timeouts: JobTimeouts,
) -> Result<Enroller> {
    req.validate()?;
    if ca_tls.is_empty() {
        return Err(EnrollError::MissingField("CA TLS certificate"));
    }

    let hsm = if instance.is_hsm_enabled() && !instance.using_hsm_proxy() {
        let hsm = read_hsm_config(orchestrator.as_ref(), instance.namespace())
            .await
            .map_err(|e| match e {
                EnrollError::HsmConfig(_) => e,
                other => EnrollError::HsmConfig(other.to_string()),
            })?;
        Some(hsm)
    } else {
        None
    };

    let kind = select_strategy(
        instance.is_hsm_enabled(),
        instance.using_hsm_proxy(),
        hsm.as_ref().is_some_and(|hsm| hsm.has_daemon()),
    );

    let span = info_span!(
        "enroller",
        instance = %instance.name(),
        namespace = %instance.namespace(),
        strategy = %kind,
    );

    let config = CaClientConfig::from_request(&req, storage_path)?;
    let mut client = CaClient::new(config, ca_tls, req.enroll_id.clone(), req.enroll_secret.clone())?;
    if instance.is_hsm_enabled() {
        if let Some(pkcs11) = instance.config_override()? {
            client.set_pkcs11(pkcs11);
        }
    }

    span.in_scope(|| info!("Selected {} enrollment", kind));

    let strategy = match (kind, hsm) {
        (StrategyKind::Software, _) => {
            Strategy::Software(SoftwareEnroller::new(req, client, span.clone()))
        }
        (StrategyKind::HsmProxy, _) => {
            Strategy::HsmProxy(HsmProxyEnroller::new(req, client, span.clone()))
        }
        (StrategyKind::HsmSidecarJob | StrategyKind::HsmDaemonSidecarJob, hsm) => {
            let ctx = JobContext {
                orchestrator,
                instance,
                hsm: hsm.unwrap_or_default(),
                timeouts,
            };
            if kind == StrategyKind::HsmDaemonSidecarJob {
                Strategy::HsmDaemonSidecarJob(HsmJobEnroller::new(
                    req,
                    client,
                    ctx,
                    JobMode::Daemon,
                    span.clone(),
                ))
            } else {
                Strategy::HsmSidecarJob(HsmJobEnroller::new(
                    req,
                    client,
                    ctx,
                    JobMode::Library,
                    span.clone(),
                ))
            }
        }
    };

    Ok(Enroller::new(strategy, span))
}
