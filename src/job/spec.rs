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

//! Enrollment job construction.
//!
//! The pod has an init container that copies the PKCS#11 library out of the
//! HSM client image into an in-memory volume, and the `certgen` container that
//! runs `enroller enroll` with that library mounted at `/hsm/lib`. In daemon
//! mode an `hsm-daemon` container runs beside `certgen` and shares the same
//! in-memory volume.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    LocalObjectReference, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    SecretKeySelector, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{
    CLIENT_CONFIG_KEY, ENROLLER_CONTAINER, ENROLL_SECRET_KEY, HSM_CLIENT_CONTAINER,
    HSM_DAEMON_CONTAINER, TLS_CERT_KEY,
};
use crate::error::Result;
use crate::hsm::HsmConfig;
use crate::orchestrator::{component, owner_reference, Instance};

const SHARED_VOLUME: &str = "shared";
const SHARED_MOUNT: &str = "/shared";
const TLS_VOLUME: &str = "tlscertfile";
const CONFIG_VOLUME: &str = "clientconfig";
const DATA_VOLUME: &str = "fabric-data";

/// Directory the enrollment container sees the HSM library in.
pub const HSM_LIBRARY_DIR: &str = "/hsm/lib";

/// Location of the CA's TLS certificate inside the enrollment container.
pub const TLS_CERT_PATH: &str = "/tls/cert.pem";

/// Location of the CA client configuration inside the enrollment container.
pub const CLIENT_CONFIG_PATH: &str = "/tmp/fabric-ca-client-config.yaml";

/// Environment variable carrying the enrollment secret.
pub const ENROLL_SECRET_ENV: &str = "ENROLL_SECRET";

/// Whether the job runs a PKCS#11 daemon beside the enroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    /// The enroller loads the HSM library directly.
    Library,
    /// The enroller talks to a co-located daemon.
    Daemon,
}

/// Inputs for building an enrollment job.
pub struct JobSpecParams<'a> {
    /// Instance being enrolled.
    pub instance: &'a dyn Instance,
    /// Cluster HSM configuration.
    pub hsm: &'a HsmConfig,
    /// Job name.
    pub job_name: &'a str,
    /// Transient secret holding the TLS certificate and enrollment secret.
    pub tls_secret_name: &'a str,
    /// Transient config map holding the CA client configuration.
    pub config_map_name: &'a str,
    /// Enrollment ID passed on the command line.
    pub enroll_id: &'a str,
    /// Home directory of the CA client inside the job.
    pub home_dir: &'a Path,
    /// Library or daemon mode.
    pub mode: JobMode,
}

/// Build the enrollment job.
pub fn build_job(params: &JobSpecParams<'_>) -> Result<Job> {
    let instance = params.instance;
    let hsm = params.hsm;

    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), instance.name().to_string());
    labels.insert("enrollment".to_string(), "hsm".to_string());

    let mut volumes = vec![
        Volume {
            name: SHARED_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: TLS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(params.tls_secret_name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: params.config_map_name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if let Some(claim) = instance.pvc_name() {
        volumes.push(Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim,
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    volumes.extend(hsm.volumes()?);

    let mut containers = vec![enroller_container(params)];
    if params.mode == JobMode::Daemon {
        containers.push(daemon_container(params));
    }

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(params.job_name.to_string()),
            namespace: Some(instance.namespace().to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(instance)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    image_pull_secrets: Some(pull_secrets(instance, hsm)),
                    init_containers: Some(vec![hsm_client_container(params)]),
                    containers,
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn pull_secrets(instance: &dyn Instance, hsm: &HsmConfig) -> Vec<LocalObjectReference> {
    let mut refs: Vec<LocalObjectReference> = instance
        .pull_secrets()
        .into_iter()
        .map(|name| LocalObjectReference { name })
        .collect();
    for r in hsm.pull_secrets() {
        if !refs.iter().any(|existing| existing.name == r.name) {
            refs.push(r);
        }
    }
    refs
}

fn shared_mount() -> VolumeMount {
    VolumeMount {
        name: SHARED_VOLUME.to_string(),
        mount_path: SHARED_MOUNT.to_string(),
        ..Default::default()
    }
}

fn hsm_client_container(params: &JobSpecParams<'_>) -> Container {
    let library_dir = Path::new(&params.hsm.library.filepath)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string());

    Container {
        name: HSM_CLIENT_CONTAINER.to_string(),
        image: Some(params.hsm.library.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![format!(
            "mkdir -p {shared}/hsm && cp -r {dir}/* {shared}/hsm",
            shared = SHARED_MOUNT,
            dir = library_dir.trim_end_matches('/'),
        )]),
        volume_mounts: Some(vec![shared_mount()]),
        resources: params.instance.resources(component::HSM_CLIENT),
        ..Default::default()
    }
}

fn enroller_container(params: &JobSpecParams<'_>) -> Container {
    let instance = params.instance;

    let mut env = vec![EnvVar {
        name: ENROLL_SECRET_ENV.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: params.tls_secret_name.to_string(),
                key: ENROLL_SECRET_KEY.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }];
    env.extend(params.hsm.envs());

    let mut mounts = vec![
        VolumeMount {
            name: SHARED_VOLUME.to_string(),
            mount_path: HSM_LIBRARY_DIR.to_string(),
            sub_path: Some("hsm".to_string()),
            ..Default::default()
        },
        VolumeMount {
            name: TLS_VOLUME.to_string(),
            mount_path: TLS_CERT_PATH.to_string(),
            sub_path: Some(TLS_CERT_KEY.to_string()),
            ..Default::default()
        },
        VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CLIENT_CONFIG_PATH.to_string(),
            sub_path: Some(CLIENT_CONFIG_KEY.to_string()),
            ..Default::default()
        },
    ];
    if instance.pvc_name().is_some() {
        mounts.push(VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: params.home_dir.to_string_lossy().into_owned(),
            ..Default::default()
        });
    }
    if params.mode == JobMode::Daemon {
        mounts.push(shared_mount());
    }
    mounts.extend(params.hsm.volume_mounts());

    Container {
        name: ENROLLER_CONTAINER.to_string(),
        image: Some(instance.enroller_image()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec!["enroller".to_string()]),
        args: Some(vec![
            "enroll".to_string(),
            "--config".to_string(),
            CLIENT_CONFIG_PATH.to_string(),
            "--tls-cert".to_string(),
            TLS_CERT_PATH.to_string(),
            "--name".to_string(),
            instance.name().to_string(),
            "--namespace".to_string(),
            instance.namespace().to_string(),
            "--enroll-id".to_string(),
            params.enroll_id.to_string(),
        ]),
        env: Some(env),
        volume_mounts: Some(mounts),
        resources: instance.resources(component::ENROLLER),
        ..Default::default()
    }
}

fn daemon_container(params: &JobSpecParams<'_>) -> Container {
    let daemon = params.hsm.daemon.clone().unwrap_or_default();

    let mut mounts = vec![shared_mount()];
    mounts.extend(params.hsm.volume_mounts());

    Container {
        name: HSM_DAEMON_CONTAINER.to_string(),
        image: Some(daemon.image),
        image_pull_policy: Some("Always".to_string()),
        env: Some(daemon.envs),
        volume_mounts: Some(mounts),
        resources: params.instance.resources(component::HSM_DAEMON),
        ..Default::default()
    }
}
