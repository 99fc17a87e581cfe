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

//! Enrollment delegated to a job that has access to the HSM.
//!
//! The operator side never touches the key. It hands the CA TLS certificate,
//! the enrollment secret and the CA client configuration to a job through a
//! transient secret and config map, waits for the job, and adopts the output
//! secrets the job wrote. Side effects happen in this order:
//!
//! 1. delete a stale config map from an earlier attempt
//! 2. create the TLS secret, then the config map
//! 3. create the job, wait for it to become active, then to finish
//! 4. on success delete the job, the TLS secret and the config map
//! 5. wait for `ecert-<instance>-signcert`
//! 6. make the instance the owner of the output secrets
//!
//! A failed job is left in place, together with its pod and transient objects,
//! so its logs can be inspected.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use tracing::{debug, info, warn, Instrument, Span};

use super::EnrollStrategy;
use crate::client::CaClient;
use crate::config::JobTimeouts;
use crate::error::{EnrollError, Result};
use crate::hsm::HsmConfig;
use crate::job::{
    build_job, config_map_name, job_name, poll_until, tls_secret_name, EnrollJob, JobMode,
    JobSpecParams, JobState, CLIENT_CONFIG_KEY, ENROLL_SECRET_KEY, HSM_LIBRARY_DIR,
    OUTPUT_SECRET_TIMEOUT, POLL_INTERVAL, TLS_CERT_KEY,
};
use crate::orchestrator::{owner_reference, Instance, Orchestrator, OrchestratorError};
use crate::secrets::{adopt_output_secrets, response_from_output_secrets, OutputSecret};
use crate::types::{EnrollmentRequest, EnrollmentResponse};

/// What a job-based enrollment runs against.
#[derive(Clone)]
pub struct JobContext {
    /// Cluster API.
    pub orchestrator: Arc<dyn Orchestrator>,
    /// Instance being enrolled.
    pub instance: Arc<dyn Instance>,
    /// Cluster HSM configuration.
    pub hsm: HsmConfig,
    /// Job start and completion bounds.
    pub timeouts: JobTimeouts,
}

/// Enrolls through a job, optionally with a PKCS#11 daemon beside it.
pub struct HsmJobEnroller {
    req: EnrollmentRequest,
    client: CaClient,
    ctx: JobContext,
    mode: JobMode,
    span: Span,
}

impl HsmJobEnroller {
    /// Create a job enroller for `req`.
    pub fn new(
        req: EnrollmentRequest,
        client: CaClient,
        ctx: JobContext,
        mode: JobMode,
        span: Span,
    ) -> Self {
        Self {
            req,
            client,
            ctx,
            mode,
            span,
        }
    }

    /// Library or daemon mode.
    pub fn mode(&self) -> JobMode {
        self.mode
    }

    /// The CA client whose configuration is handed to the job.
    pub fn client(&self) -> &CaClient {
        &self.client
    }

    async fn enroll_inner(&mut self) -> Result<EnrollmentResponse> {
        let orchestrator = Arc::clone(&self.ctx.orchestrator);
        let orchestrator = orchestrator.as_ref();
        let instance = Arc::clone(&self.ctx.instance);
        let instance = instance.as_ref();
        let namespace = instance.namespace();
        let tls_secret = tls_secret_name(instance.name());
        let config_map = config_map_name(instance.name());

        delete_stale_config_map(orchestrator, namespace, &config_map).await?;

        let library = format!("{}/{}", HSM_LIBRARY_DIR, self.ctx.hsm.library_file_name()?);
        self.client.set_hsm_library(library);

        self.create_tls_secret(orchestrator, instance, &tls_secret)
            .await?;
        self.create_config_map(orchestrator, instance, &config_map)
            .await?;

        let name = job_name(instance.name());
        let spec = build_job(&JobSpecParams {
            instance,
            hsm: &self.ctx.hsm,
            job_name: &name,
            tls_secret_name: &tls_secret,
            config_map_name: &config_map,
            enroll_id: &self.req.enroll_id,
            home_dir: self.client.home_dir(),
            mode: self.mode,
        })?;

        let mut job = EnrollJob::create(orchestrator, &spec).await?;
        job.wait_active(self.ctx.timeouts.job_start).await?;
        if job.wait_finished(self.ctx.timeouts.job_completion).await? == JobState::Failed {
            return Err(EnrollError::JobFailed(job.name().to_string()));
        }

        job.delete().await?;
        orchestrator
            .delete_secret(namespace, &tls_secret)
            .await
            .map_err(|e| {
                EnrollError::orchestration(format!("failed to delete secret '{}'", tls_secret), e)
            })?;
        orchestrator
            .delete_config_map(namespace, &config_map)
            .await
            .map_err(|e| {
                EnrollError::orchestration(
                    format!("failed to delete config map '{}'", config_map),
                    e,
                )
            })?;
        info!("Job '{}' completed, transient objects removed", job.name());

        wait_for_output(orchestrator, instance, OUTPUT_SECRET_TIMEOUT).await?;
        let adopted = adopt_output_secrets(orchestrator, instance).await?;
        Ok(response_from_output_secrets(&adopted))
    }

    async fn create_tls_secret(
        &self,
        orchestrator: &dyn Orchestrator,
        instance: &dyn Instance,
        name: &str,
    ) -> Result<()> {
        let namespace = instance.namespace();
        let secret = Secret {
            metadata: transient_meta(instance, name),
            data: Some(BTreeMap::from([
                (
                    TLS_CERT_KEY.to_string(),
                    ByteString(self.client.tls_cert().to_vec()),
                ),
                (
                    ENROLL_SECRET_KEY.to_string(),
                    ByteString(self.req.enroll_secret.clone().into_bytes()),
                ),
            ])),
            ..Default::default()
        };

        match orchestrator.create_secret(namespace, &secret).await {
            Ok(_) => Ok(()),
            // Left behind by a failed attempt.
            Err(OrchestratorError::AlreadyExists { .. }) => {
                debug!("Secret '{}' exists, replacing", name);
                orchestrator
                    .update_secret(namespace, &secret)
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        EnrollError::orchestration(format!("failed to update secret '{}'", name), e)
                    })
            }
            Err(e) => Err(EnrollError::orchestration(
                format!("failed to create secret '{}'", name),
                e,
            )),
        }
    }

    async fn create_config_map(
        &self,
        orchestrator: &dyn Orchestrator,
        instance: &dyn Instance,
        name: &str,
    ) -> Result<()> {
        let config_map = ConfigMap {
            metadata: transient_meta(instance, name),
            data: Some(BTreeMap::from([(
                CLIENT_CONFIG_KEY.to_string(),
                self.client.config().to_yaml()?,
            )])),
            ..Default::default()
        };

        orchestrator
            .create_config_map(instance.namespace(), &config_map)
            .await
            .map(|_| ())
            .map_err(|e| {
                EnrollError::orchestration(format!("failed to create config map '{}'", name), e)
            })
    }
}

fn transient_meta(instance: &dyn Instance, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(instance.namespace().to_string()),
        labels: Some(BTreeMap::from([(
            "app".to_string(),
            instance.name().to_string(),
        )])),
        owner_references: Some(vec![owner_reference(instance)]),
        ..Default::default()
    }
}

async fn delete_stale_config_map(
    orchestrator: &dyn Orchestrator,
    namespace: &str,
    name: &str,
) -> Result<()> {
    match orchestrator.delete_config_map(namespace, name).await {
        Ok(()) => {
            debug!("Deleted stale config map '{}'", name);
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(EnrollError::orchestration(
            format!("failed to delete config map '{}'", name),
            e,
        )),
    }
}

async fn wait_for_output(
    orchestrator: &dyn Orchestrator,
    instance: &dyn Instance,
    timeout: Duration,
) -> Result<()> {
    let namespace = instance.namespace();
    let name = OutputSecret::SignCert.secret_name(instance.name());
    let secret_name = name.as_str();

    let found = poll_until(POLL_INTERVAL, timeout, || async move {
        match orchestrator.get_secret(namespace, secret_name).await {
            Ok(_) => Ok(Some(())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(EnrollError::orchestration(
                format!("failed to get secret '{}'", secret_name),
                e,
            )),
        }
    })
    .await?;

    if found.is_none() {
        warn!("Secret '{}' did not appear within {:?}", name, timeout);
        return Err(EnrollError::SecretTimeout(name));
    }
    Ok(())
}

#[async_trait]
impl EnrollStrategy for HsmJobEnroller {
    fn enrollment_request(&self) -> &EnrollmentRequest {
        &self.req
    }

    async fn ping_ca(&self, timeout: Duration) -> Result<()> {
        self.client
            .ping_ca(timeout)
            .instrument(self.span.clone())
            .await
    }

    async fn enroll(&mut self) -> Result<EnrollmentResponse> {
        let span = self.span.clone();
        self.enroll_inner().instrument(span).await
    }
}
