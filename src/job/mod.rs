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

//! Enrollment job lifecycle.
//!
//! An enrollment job moves `Created -> Active -> Completed | Failed`. Both
//! transitions are observed by polling at [`POLL_INTERVAL`] until a
//! caller-supplied deadline:
//!
//! - `Active` once the job reports an active replica (or has already
//!   succeeded or failed),
//! - `Completed` or `Failed` once the `certgen` container of one of the job's
//!   pods terminates, depending on its exit code.
//!
//! The job's own completion status is not used because in daemon mode the
//! daemon container keeps the pod running after enrollment has finished.

mod spec;

pub use spec::{
    build_job, JobMode, JobSpecParams, CLIENT_CONFIG_PATH, ENROLL_SECRET_ENV, HSM_LIBRARY_DIR,
    TLS_CERT_PATH,
};

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{EnrollError, Result};
use crate::orchestrator::Orchestrator;

/// Name of the enrollment container.
pub const ENROLLER_CONTAINER: &str = "certgen";

/// Name of the init container staging the HSM library.
pub const HSM_CLIENT_CONTAINER: &str = "hsm-client";

/// Name of the PKCS#11 daemon container.
pub const HSM_DAEMON_CONTAINER: &str = "hsm-daemon";

/// Key of the CA TLS certificate in the transient secret.
pub const TLS_CERT_KEY: &str = "cert.pem";

/// Key of the enrollment secret in the transient secret.
pub const ENROLL_SECRET_KEY: &str = "enroll-secret";

/// Key of the CA client configuration in the transient config map.
pub const CLIENT_CONFIG_KEY: &str = "fabric-ca-client-config.yaml";

/// Interval between status checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long to wait for the job's output secret after the job completed.
pub const OUTPUT_SECRET_TIMEOUT: Duration = Duration::from_secs(30);

/// A unique job name for `instance`, so a retry never collides with a job
/// preserved from a failed attempt.
pub fn job_name(instance: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-enroll-{}", instance, &suffix[..10])
}

/// Name of the transient secret holding the CA TLS certificate.
pub fn tls_secret_name(instance: &str) -> String {
    format!("{}-init-roottls", instance)
}

/// Name of the transient config map holding the CA client configuration.
pub fn config_map_name(instance: &str) -> String {
    format!("{}-init-config", instance)
}

/// Observed state of an enrollment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Submitted, no replica observed yet.
    Created,
    /// A replica is running.
    Active,
    /// The enrollment container exited with 0.
    Completed,
    /// The enrollment container exited with a non-zero code.
    Failed,
}

/// Call `check` every `interval` until it yields a value or `timeout` elapses.
///
/// Returns `Ok(None)` on timeout. Errors from `check` end the wait.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await? {
            return Ok(Some(value));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// A submitted enrollment job.
pub struct EnrollJob<'a> {
    orchestrator: &'a dyn Orchestrator,
    namespace: String,
    name: String,
    state: JobState,
}

impl<'a> EnrollJob<'a> {
    /// Submit `job`.
    pub async fn create(orchestrator: &'a dyn Orchestrator, job: &Job) -> Result<EnrollJob<'a>> {
        let namespace = job.metadata.namespace.clone().unwrap_or_default();
        let name = job.metadata.name.clone().unwrap_or_default();

        orchestrator
            .create_job(&namespace, job)
            .await
            .map_err(|e| EnrollError::orchestration(format!("failed to create job '{}'", name), e))?;
        info!("Created enrollment job '{}'", name);

        Ok(Self {
            orchestrator,
            namespace,
            name,
            state: JobState::Created,
        })
    }

    /// Job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last observed state.
    pub fn state(&self) -> JobState {
        self.state
    }

    fn pod_selector(&self) -> String {
        format!("job-name={}", self.name)
    }

    /// Wait for the job to report an active replica.
    pub async fn wait_active(&mut self, timeout: Duration) -> Result<()> {
        let (orchestrator, namespace, name) =
            (self.orchestrator, self.namespace.as_str(), self.name.as_str());

        let started = poll_until(POLL_INTERVAL, timeout, || async move {
            let job = orchestrator.get_job(namespace, name).await.map_err(|e| {
                EnrollError::orchestration(format!("failed to get job '{}'", name), e)
            })?;
            Ok(has_started(&job).then_some(()))
        })
        .await?;

        if started.is_none() {
            warn!("Job '{}' did not start within {:?}", self.name, timeout);
            return Err(EnrollError::JobStart(self.name.clone()));
        }

        debug!("Job '{}' is active", self.name);
        self.state = JobState::Active;
        Ok(())
    }

    /// Wait for the enrollment container to terminate.
    ///
    /// Returns [`JobState::Completed`] or [`JobState::Failed`]; running out of
    /// time is an error.
    pub async fn wait_finished(&mut self, timeout: Duration) -> Result<JobState> {
        let (orchestrator, namespace) = (self.orchestrator, self.namespace.as_str());
        let selector = self.pod_selector();
        let selector = selector.as_str();

        let exit_code = poll_until(POLL_INTERVAL, timeout, || async move {
            let pods = orchestrator.list_pods(namespace, selector).await.map_err(|e| {
                EnrollError::orchestration(format!("failed to list pods for '{}'", selector), e)
            })?;
            Ok(pods.iter().find_map(enroller_exit_code))
        })
        .await?;

        let Some(exit_code) = exit_code else {
            warn!("Job '{}' did not finish within {:?}", self.name, timeout);
            return Err(EnrollError::JobFinish(self.name.clone()));
        };

        self.state = if exit_code == 0 {
            JobState::Completed
        } else {
            warn!(
                "Job '{}' enrollment container exited with {}",
                self.name, exit_code
            );
            JobState::Failed
        };
        Ok(self.state)
    }

    /// Delete the job and its pods.
    pub async fn delete(&self) -> Result<()> {
        self.orchestrator
            .delete_job(&self.namespace, &self.name)
            .await
            .map_err(|e| {
                EnrollError::orchestration(format!("failed to delete job '{}'", self.name), e)
            })?;

        let selector = self.pod_selector();
        let pods = self
            .orchestrator
            .list_pods(&self.namespace, &selector)
            .await
            .map_err(|e| {
                EnrollError::orchestration(format!("failed to list pods for '{}'", selector), e)
            })?;

        for pod in pods {
            let Some(pod_name) = pod.metadata.name else {
                continue;
            };
            match self.orchestrator.delete_pod(&self.namespace, &pod_name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(EnrollError::orchestration(
                        format!("failed to delete pod '{}'", pod_name),
                        e,
                    ))
                }
            }
        }

        debug!("Deleted job '{}'", self.name);
        Ok(())
    }
}

fn has_started(job: &Job) -> bool {
    job.status
        .as_ref()
        .map(|s| {
            s.active.unwrap_or(0) >= 1 || s.succeeded.unwrap_or(0) > 0 || s.failed.unwrap_or(0) > 0
        })
        .unwrap_or(false)
}

fn enroller_exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .filter(|status| status.name == ENROLLER_CONTAINER)
        .find_map(|status| {
            status
                .state
                .as_ref()
                .and_then(|state| state.terminated.as_ref())
                .map(|terminated| terminated.exit_code)
        })
}
