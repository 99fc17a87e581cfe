//! In-memory orchestrator for tests.
//!
//! Every call is recorded. Job behaviour is scripted: whether the job reports
//! an active replica, the exit code of the enrollment container, and whether
//! the job "produces" the output secrets it would create in a real cluster.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{
    ConfigMap, ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodStatus,
    ResourceRequirements, Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use super::{Instance, Orchestrator, OrchestratorError, OrchestratorResult};
use crate::config::Pkcs11Config;
use crate::error::Result;
use crate::job::ENROLLER_CONTAINER;
use crate::secrets::ALL_OUTPUT_SECRETS;

/// Kind of orchestrator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Get,
    Update,
    Delete,
    List,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub kind: &'static str,
    pub name: String,
}

type Key = (String, String);

#[derive(Default)]
struct State {
    secrets: BTreeMap<Key, Secret>,
    config_maps: BTreeMap<Key, ConfigMap>,
    jobs: BTreeMap<Key, Job>,
    pods: BTreeMap<Key, Pod>,
    calls: Vec<Call>,
}

pub struct FakeOrchestrator {
    state: Mutex<State>,
    job_active: bool,
    exit_code: Option<i32>,
    produces_output_for: Option<String>,
}

impl FakeOrchestrator {
    /// Jobs become active and the enrollment container exits with 0.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            job_active: true,
            exit_code: Some(0),
            produces_output_for: None,
        }
    }

    pub fn with_job_active(mut self, active: bool) -> Self {
        self.job_active = active;
        self
    }

    /// `None` leaves the enrollment container running.
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// A successful job creates all four output secrets for `instance`.
    pub fn with_job_output(mut self, instance: &str) -> Self {
        self.produces_output_for = Some(instance.to_string());
        self
    }

    pub fn insert_config_map(&self, config_map: ConfigMap) {
        let mut state = self.state.lock().unwrap();
        let key = key_of(&config_map.metadata);
        state.config_maps.insert(key, config_map);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, verb: Verb) -> usize {
        self.calls().iter().filter(|c| c.verb == verb).count()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        let state = self.state.lock().unwrap();
        state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        let state = self.state.lock().unwrap();
        state
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().unwrap().jobs.values().cloned().collect()
    }

    pub fn pod_count(&self) -> usize {
        self.state.lock().unwrap().pods.len()
    }

    fn record(&self, verb: Verb, kind: &'static str, name: &str) {
        self.state.lock().unwrap().calls.push(Call {
            verb,
            kind,
            name: name.to_string(),
        });
    }

    fn run_job(&self, namespace: &str, job: &mut Job) {
        let job_name = job.metadata.name.clone().unwrap_or_default();
        if !self.job_active {
            return;
        }
        job.status = Some(JobStatus {
            active: Some(1),
            ..Default::default()
        });

        let terminated = self.exit_code.map(|exit_code| ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code,
                ..Default::default()
            }),
            ..Default::default()
        });
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(format!("{}-pod", job_name)),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([("job-name".to_string(), job_name)])),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: ENROLLER_CONTAINER.to_string(),
                    state: terminated,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut state = self.state.lock().unwrap();
        state.pods.insert(key_of(&pod.metadata), pod);

        if let (Some(instance), Some(0)) = (&self.produces_output_for, self.exit_code) {
            for kind in ALL_OUTPUT_SECRETS {
                let secret = output_secret(namespace, kind.secret_name(instance));
                state.secrets.insert(key_of(&secret.metadata), secret);
            }
        }
    }
}

fn output_secret(namespace: &str, name: String) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "cert.pem".to_string(),
            ByteString(b"-----BEGIN CERTIFICATE-----\n".to_vec()),
        )])),
        ..Default::default()
    }
}

fn key_of(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn with_namespace(meta: &ObjectMeta, namespace: &str) -> ObjectMeta {
    let mut meta = meta.clone();
    meta.namespace = Some(namespace.to_string());
    meta
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> OrchestratorResult<Secret> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.record(Verb::Create, "secret", &name);
        let mut secret = secret.clone();
        secret.metadata = with_namespace(&secret.metadata, namespace);
        let mut state = self.state.lock().unwrap();
        if state.secrets.contains_key(&key(namespace, &name)) {
            return Err(OrchestratorError::AlreadyExists { kind: "secret", name });
        }
        state.secrets.insert(key(namespace, &name), secret.clone());
        Ok(secret)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> OrchestratorResult<Secret> {
        self.record(Verb::Get, "secret", name);
        self.secret(namespace, name)
            .ok_or_else(|| OrchestratorError::not_found("secret", name))
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> OrchestratorResult<Secret> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.record(Verb::Update, "secret", &name);
        let mut state = self.state.lock().unwrap();
        match state.secrets.get_mut(&key(namespace, &name)) {
            Some(existing) => {
                *existing = secret.clone();
                Ok(secret.clone())
            }
            None => Err(OrchestratorError::not_found("secret", name)),
        }
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> OrchestratorResult<()> {
        self.record(Verb::Delete, "secret", name);
        let mut state = self.state.lock().unwrap();
        state
            .secrets
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::not_found("secret", name))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> OrchestratorResult<ConfigMap> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.record(Verb::Create, "config map", &name);
        let mut config_map = config_map.clone();
        config_map.metadata = with_namespace(&config_map.metadata, namespace);
        let mut state = self.state.lock().unwrap();
        if state.config_maps.contains_key(&key(namespace, &name)) {
            return Err(OrchestratorError::AlreadyExists {
                kind: "config map",
                name,
            });
        }
        state
            .config_maps
            .insert(key(namespace, &name), config_map.clone());
        Ok(config_map)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> OrchestratorResult<ConfigMap> {
        self.record(Verb::Get, "config map", name);
        self.config_map(namespace, name)
            .ok_or_else(|| OrchestratorError::not_found("config map", name))
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> OrchestratorResult<()> {
        self.record(Verb::Delete, "config map", name);
        let mut state = self.state.lock().unwrap();
        state
            .config_maps
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::not_found("config map", name))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> OrchestratorResult<Job> {
        let name = job.metadata.name.clone().unwrap_or_default();
        self.record(Verb::Create, "job", &name);
        let mut job = job.clone();
        job.metadata = with_namespace(&job.metadata, namespace);
        self.run_job(namespace, &mut job);
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(key(namespace, &name), job.clone());
        Ok(job)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> OrchestratorResult<Job> {
        self.record(Verb::Get, "job", name);
        let state = self.state.lock().unwrap();
        state
            .jobs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found("job", name))
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> OrchestratorResult<()> {
        self.record(Verb::Delete, "job", name);
        let mut state = self.state.lock().unwrap();
        state
            .jobs
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::not_found("job", name))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> OrchestratorResult<Vec<Pod>> {
        self.record(Verb::List, "pod", label_selector);
        let (label, value) = label_selector
            .split_once('=')
            .ok_or_else(|| OrchestratorError::api("unsupported label selector"))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, pod)| {
                pod.metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(label))
                    .map(|v| v == value)
                    .unwrap_or(false)
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> OrchestratorResult<()> {
        self.record(Verb::Delete, "pod", name);
        let mut state = self.state.lock().unwrap();
        state
            .pods
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::not_found("pod", name))
    }
}

/// Instance double with HSM flags and an optional PKCS#11 override.
pub struct TestInstance {
    pub name: String,
    pub namespace: String,
    pub hsm_enabled: bool,
    pub hsm_proxy: bool,
    pub pkcs11: Option<Pkcs11Config>,
    pub pvc: Option<String>,
}

impl TestInstance {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: "org1".to_string(),
            hsm_enabled: false,
            hsm_proxy: false,
            pkcs11: None,
            pvc: None,
        }
    }

    pub fn hsm(mut self, proxy: bool) -> Self {
        self.hsm_enabled = true;
        self.hsm_proxy = proxy;
        self.pkcs11 = Some(Pkcs11Config {
            label: "fabric".into(),
            pin: "98765432".into(),
            ..Default::default()
        });
        self
    }
}

impl Instance for TestInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn uid(&self) -> &str {
        "0b7c7c6e-7f6f-4a53-9c55-8e2f2b1c1d01"
    }

    fn api_version(&self) -> &str {
        "ibp.com/v1beta1"
    }

    fn kind(&self) -> &str {
        "IBPPeer"
    }

    fn pull_secrets(&self) -> Vec<String> {
        vec!["regcred".to_string()]
    }

    fn pvc_name(&self) -> Option<String> {
        self.pvc.clone()
    }

    fn resources(&self, _component: &str) -> Option<ResourceRequirements> {
        None
    }

    fn enroller_image(&self) -> String {
        "registry.example.com/enroller:1.0".to_string()
    }

    fn is_hsm_enabled(&self) -> bool {
        self.hsm_enabled
    }

    fn using_hsm_proxy(&self) -> bool {
        self.hsm_proxy
    }

    fn config_override(&self) -> Result<Option<Pkcs11Config>> {
        Ok(self.pkcs11.clone())
    }
}
