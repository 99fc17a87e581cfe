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

//! [`Orchestrator`] backed by the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

use super::{Orchestrator, OrchestratorError, OrchestratorResult};

/// Kubernetes implementation of [`Orchestrator`].
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster or kubeconfig environment.
    pub async fn try_default() -> OrchestratorResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| OrchestratorError::api(format!("failed to create client: {}", e)))?;
        Ok(Self::new(client))
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_err(kind: &'static str, name: &str, err: kube::Error) -> OrchestratorError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => OrchestratorError::not_found(kind, name),
        kube::Error::Api(ae) if ae.code == 409 => OrchestratorError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        other => OrchestratorError::api(other.to_string()),
    }
}

fn object_name(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or_default()
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> OrchestratorResult<Secret> {
        let name = object_name(&secret.metadata.name);
        debug!("Creating secret {}/{}", namespace, name);
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| map_err("secret", name, e))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> OrchestratorResult<Secret> {
        self.secrets(namespace)
            .get(name)
            .await
            .map_err(|e| map_err("secret", name, e))
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> OrchestratorResult<Secret> {
        let name = object_name(&secret.metadata.name);
        debug!("Updating secret {}/{}", namespace, name);
        self.secrets(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
            .map_err(|e| map_err("secret", name, e))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> OrchestratorResult<()> {
        debug!("Deleting secret {}/{}", namespace, name);
        self.secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_err("secret", name, e))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> OrchestratorResult<ConfigMap> {
        let name = object_name(&config_map.metadata.name);
        debug!("Creating config map {}/{}", namespace, name);
        self.config_maps(namespace)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| map_err("config map", name, e))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> OrchestratorResult<ConfigMap> {
        self.config_maps(namespace)
            .get(name)
            .await
            .map_err(|e| map_err("config map", name, e))
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> OrchestratorResult<()> {
        debug!("Deleting config map {}/{}", namespace, name);
        self.config_maps(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_err("config map", name, e))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> OrchestratorResult<Job> {
        let name = object_name(&job.metadata.name);
        debug!("Creating job {}/{}", namespace, name);
        self.jobs(namespace)
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| map_err("job", name, e))
    }

    async fn get_job(&self, namespace: &str, name: &str) -> OrchestratorResult<Job> {
        self.jobs(namespace)
            .get(name)
            .await
            .map_err(|e| map_err("job", name, e))
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> OrchestratorResult<()> {
        debug!("Deleting job {}/{}", namespace, name);
        self.jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_err("job", name, e))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> OrchestratorResult<Vec<Pod>> {
        self.pods(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map(|list| list.items)
            .map_err(|e| map_err("pod", label_selector, e))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> OrchestratorResult<()> {
        debug!("Deleting pod {}/{}", namespace, name);
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_err("pod", name, e))
    }
}
