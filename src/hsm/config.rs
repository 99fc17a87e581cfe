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

//! HSM configuration as stored by the cluster operator.
//!
//! The configuration lives in the `ibp-hsm-config` config map under the
//! `ibp-hsm-config.yaml` key. It names the PKCS#11 library and the image that
//! ships it, optional pull credentials, extra environment, extra mounts, and
//! an optional daemon that fronts the HSM for the enrollment container.

use std::path::Path;

use k8s_openapi::api::core::v1::{
    EnvVar, KeyToPath, LocalObjectReference, SecretVolumeSource, Volume, VolumeMount,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EnrollError, Result};
use crate::orchestrator::Orchestrator;

/// Name of the config map holding the HSM configuration.
pub const HSM_CONFIG_MAP_NAME: &str = "ibp-hsm-config";

/// Key of the HSM configuration document inside the config map.
pub const HSM_CONFIG_KEY: &str = "ibp-hsm-config.yaml";

/// HSM configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HsmConfig {
    /// Kind of document, informational.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Document version, informational.
    #[serde(default)]
    pub version: String,

    /// PKCS#11 client library.
    #[serde(default)]
    pub library: Library,

    /// Additional mounts for the enrollment container.
    #[serde(default)]
    pub mountpaths: Vec<MountPath>,

    /// Additional environment for the enrollment container.
    #[serde(default)]
    pub envs: Vec<EnvVar>,

    /// Long-running PKCS#11 daemon; when set the job runs it beside the enroller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon: Option<Daemon>,
}

/// PKCS#11 client library and the image it ships in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    /// Path of the library inside the image.
    #[serde(default)]
    pub filepath: String,

    /// Image holding the library.
    #[serde(default)]
    pub image: String,

    /// Pull credentials for the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

/// Image pull credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    /// Name of the image pull secret.
    #[serde(default)]
    pub image_pull_secret: String,
}

/// Long-running PKCS#11 daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Daemon {
    /// Daemon image.
    #[serde(default)]
    pub image: String,

    /// Daemon environment.
    #[serde(default)]
    pub envs: Vec<EnvVar>,

    /// Pull credentials for the daemon image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

/// A declarative mount.
///
/// Three shapes are supported: a plain volume described by `volumeSource`, a
/// secret mounted as a directory, and a secret whose keys are mounted as
/// individual files through `paths`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPath {
    /// Volume name.
    pub name: String,

    /// Mount location inside the container.
    #[serde(default)]
    pub mountpath: String,

    /// Secret backing the volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Secret keys mounted as individual files.
    #[serde(default)]
    pub paths: Vec<KeyPath>,

    /// Project each key to its path inside the volume and mount that path.
    #[serde(default)]
    pub use_path_as_key: bool,

    /// Raw volume source, used verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_source: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A secret key mounted as a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPath {
    /// Key inside the secret.
    pub key: String,

    /// File name under the mount path.
    pub path: String,
}

impl MountPath {
    fn volume(&self) -> Result<Volume> {
        if let Some(source) = &self.volume_source {
            let mut source = source.clone();
            source.insert("name".to_string(), serde_json::Value::String(self.name.clone()));
            let volume = serde_json::from_value(serde_json::Value::Object(source)).map_err(|e| {
                EnrollError::HsmConfig(format!("invalid volume source for '{}': {}", self.name, e))
            })?;
            return Ok(volume);
        }

        // Every mount path is mounted, so it needs a volume to back it.
        let Some(secret) = &self.secret else {
            return Err(EnrollError::HsmConfig(format!(
                "mount path '{}' has neither a secret nor a volume source",
                self.name
            )));
        };

        let items = if self.use_path_as_key && !self.paths.is_empty() {
            Some(
                self.paths
                    .iter()
                    .map(|p| KeyToPath {
                        key: p.key.clone(),
                        path: p.path.clone(),
                        mode: None,
                    })
                    .collect(),
            )
        } else {
            None
        };

        Ok(Volume {
            name: self.name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.clone()),
                items,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn volume_mounts(&self) -> Vec<VolumeMount> {
        if self.paths.is_empty() {
            return vec![VolumeMount {
                name: self.name.clone(),
                mount_path: self.mountpath.clone(),
                ..Default::default()
            }];
        }

        self.paths
            .iter()
            .map(|p| {
                let sub_path = if self.use_path_as_key { &p.path } else { &p.key };
                VolumeMount {
                    name: self.name.clone(),
                    mount_path: Path::new(&self.mountpath)
                        .join(&p.path)
                        .to_string_lossy()
                        .into_owned(),
                    sub_path: Some(sub_path.clone()),
                    ..Default::default()
                }
            })
            .collect()
    }
}

impl HsmConfig {
    /// Parse the YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| EnrollError::HsmConfig(e.to_string()))
    }

    /// Volumes declared by the mount paths.
    pub fn volumes(&self) -> Result<Vec<Volume>> {
        self.mountpaths.iter().map(MountPath::volume).collect()
    }

    /// Volume mounts declared by the mount paths.
    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.mountpaths.iter().flat_map(MountPath::volume_mounts).collect()
    }

    /// Environment for the enrollment container.
    pub fn envs(&self) -> Vec<EnvVar> {
        self.envs.clone()
    }

    /// Image pull secrets needed by the library and daemon images.
    pub fn pull_secrets(&self) -> Vec<LocalObjectReference> {
        let mut names: Vec<String> = Vec::new();
        let auths = [
            self.library.auth.as_ref(),
            self.daemon.as_ref().and_then(|d| d.auth.as_ref()),
        ];
        for auth in auths.into_iter().flatten() {
            if !auth.image_pull_secret.is_empty() && !names.contains(&auth.image_pull_secret) {
                names.push(auth.image_pull_secret.clone());
            }
        }
        names
            .into_iter()
            .map(|name| LocalObjectReference { name })
            .collect()
    }

    /// File name of the PKCS#11 library.
    pub fn library_file_name(&self) -> Result<String> {
        Path::new(&self.library.filepath)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| EnrollError::HsmConfig("library filepath not specified".to_string()))
    }

    /// Returns true if a daemon is configured.
    pub fn has_daemon(&self) -> bool {
        self.daemon.is_some()
    }
}

/// Load the HSM configuration from the `ibp-hsm-config` config map in `namespace`.
pub async fn read_hsm_config(orchestrator: &dyn Orchestrator, namespace: &str) -> Result<HsmConfig> {
    let cm = orchestrator
        .get_config_map(namespace, HSM_CONFIG_MAP_NAME)
        .await
        .map_err(|e| {
            EnrollError::HsmConfig(format!(
                "failed to get config map '{}': {}",
                HSM_CONFIG_MAP_NAME, e
            ))
        })?;

    let yaml = cm
        .data
        .as_ref()
        .and_then(|data| data.get(HSM_CONFIG_KEY))
        .ok_or_else(|| {
            EnrollError::HsmConfig(format!(
                "config map '{}' has no '{}' entry",
                HSM_CONFIG_MAP_NAME, HSM_CONFIG_KEY
            ))
        })?;

    let config = HsmConfig::from_yaml(yaml)?;
    debug!(
        "Loaded HSM config: library={}, daemon={}",
        config.library.filepath,
        config.has_daemon()
    );
    Ok(config)
}
