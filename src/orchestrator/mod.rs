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

//! Cluster orchestration seam.
//!
//! Job-based enrollment creates and removes a handful of cluster objects. The
//! [`Orchestrator`] trait is the narrow typed API it needs over secrets,
//! config maps, jobs and pods. [`KubeOrchestrator`] implements it against the
//! Kubernetes API; tests use an in-memory fake that records every call.
//!
//! The component being enrolled is described by the [`Instance`] trait.

#[cfg(test)]
pub(crate) mod fake;
#[cfg(feature = "kube-client")]
mod kube;

#[cfg(feature = "kube-client")]
pub use self::kube::KubeOrchestrator;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, ResourceRequirements, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use thiserror::Error;

use crate::config::Pkcs11Config;
use crate::error::Result;

/// Result type for orchestrator calls.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Errors reported by an [`Orchestrator`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The object does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Object kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Object kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// Any other API failure.
    #[error("{0}")]
    Api(String),
}

impl OrchestratorError {
    /// Create a generic API error.
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns true if the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Typed access to the cluster objects used by job-based enrollment.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Create a secret.
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> OrchestratorResult<Secret>;

    /// Fetch a secret.
    async fn get_secret(&self, namespace: &str, name: &str) -> OrchestratorResult<Secret>;

    /// Replace a secret.
    async fn update_secret(&self, namespace: &str, secret: &Secret) -> OrchestratorResult<Secret>;

    /// Delete a secret.
    async fn delete_secret(&self, namespace: &str, name: &str) -> OrchestratorResult<()>;

    /// Create a config map.
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> OrchestratorResult<ConfigMap>;

    /// Fetch a config map.
    async fn get_config_map(&self, namespace: &str, name: &str) -> OrchestratorResult<ConfigMap>;

    /// Delete a config map.
    async fn delete_config_map(&self, namespace: &str, name: &str) -> OrchestratorResult<()>;

    /// Create a job.
    async fn create_job(&self, namespace: &str, job: &Job) -> OrchestratorResult<Job>;

    /// Fetch a job.
    async fn get_job(&self, namespace: &str, name: &str) -> OrchestratorResult<Job>;

    /// Delete a job; its pods are left to [`delete_pod`](Self::delete_pod).
    async fn delete_job(&self, namespace: &str, name: &str) -> OrchestratorResult<()>;

    /// List pods matching a label selector such as `job-name=peer0-enroll-1a2b`.
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> OrchestratorResult<Vec<Pod>>;

    /// Delete a pod.
    async fn delete_pod(&self, namespace: &str, name: &str) -> OrchestratorResult<()>;
}

/// Component names used to look up per-container resources.
pub mod component {
    /// Container staging the HSM library.
    pub const HSM_CLIENT: &str = "init";
    /// Container running the enrollment.
    pub const ENROLLER: &str = "enroller";
    /// Container running the PKCS#11 daemon.
    pub const HSM_DAEMON: &str = "hsmdaemon";
}

/// The component instance (CA, orderer or peer) being enrolled.
pub trait Instance: Send + Sync {
    /// Instance name.
    fn name(&self) -> &str;

    /// Namespace the instance lives in.
    fn namespace(&self) -> &str;

    /// Unique ID, used for owner references.
    fn uid(&self) -> &str;

    /// API version of the instance's resource type, e.g. `ibp.com/v1beta1`.
    fn api_version(&self) -> &str;

    /// Kind of the instance's resource type, e.g. `IBPPeer`.
    fn kind(&self) -> &str;

    /// Image pull secrets of the instance.
    fn pull_secrets(&self) -> Vec<String>;

    /// Persistent volume claim holding the instance's data, if any.
    fn pvc_name(&self) -> Option<String>;

    /// Resource requirements for a container of the given component.
    fn resources(&self, component: &str) -> Option<ResourceRequirements>;

    /// Image that runs the `enroller` binary.
    fn enroller_image(&self) -> String;

    /// Whether the instance keeps its keys in an HSM.
    fn is_hsm_enabled(&self) -> bool;

    /// Whether the HSM is reached through a PKCS#11 proxy.
    fn using_hsm_proxy(&self) -> bool;

    /// PKCS#11 token settings from the instance's configuration override.
    fn config_override(&self) -> Result<Option<Pkcs11Config>>;
}

/// A controller owner reference pointing at `instance`.
pub fn owner_reference(instance: &dyn Instance) -> OwnerReference {
    OwnerReference {
        api_version: instance.api_version().to_string(),
        kind: instance.kind().to_string(),
        name: instance.name().to_string(),
        uid: instance.uid().to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
