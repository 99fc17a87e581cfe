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

//! # fabric-enroller
//!
//! Certificate enrollment for ledger network components (CAs, orderers and
//! peers) against a Fabric-style CA.
//!
//! An enrollment turns an enrollment ID and secret into an X.509 identity: a
//! signed certificate, the CA's root certificates, the intermediate chain
//! when there is one, and, for software keys, the private key.
//!
//! ## Features
//!
//! - **Async-first design** using Tokio
//! - **Four strategies**: software keys, HSM through a PKCS#11 proxy, HSM
//!   through an enrollment job, and HSM through a job with a PKCS#11 daemon
//! - **Chain classification** into roots and an intermediate bundle
//! - **CA trust pinned** to the CA's own TLS certificate
//! - **Orchestrator seam** with a Kubernetes implementation (feature-gated)
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fabric_enroller::{new_enroller, EnrollmentRequest, Instance, JobTimeouts, Orchestrator};
//!
//! # async fn example(
//! #     orchestrator: Arc<dyn Orchestrator>,
//! #     instance: Arc<dyn Instance>,
//! #     ca_tls_b64: String,
//! # ) -> fabric_enroller::Result<()> {
//! let req = EnrollmentRequest::new("ca.example.com", "7054", "peer0", "peer0pw", ca_tls_b64);
//! let ca_tls = req.ca_tls_cert_pem()?;
//!
//! let mut enroller = new_enroller(
//!     req,
//!     orchestrator,
//!     instance,
//!     "/crypto/peer0",
//!     ca_tls,
//!     JobTimeouts::new(Duration::from_secs(60), Duration::from_secs(300)),
//! )
//! .await?;
//!
//! enroller.ping_ca(Duration::from_secs(10)).await?;
//! let crypto = enroller.get_crypto().await?;
//! println!("{} root certificate(s)", crypto.ca_certs.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `pkcs11` (default): generate keys inside a PKCS#11 token
//! - `kube-client` (default): [`orchestrator::KubeOrchestrator`] and the
//!   `enroller` binary

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod chain;
pub mod client;
pub mod config;
pub mod csr;
pub mod enroller;
pub mod error;
pub mod hsm;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod secrets;
pub mod tls;
pub mod types;

#[cfg(test)]
mod testutil;

// Re-export main types at crate root
pub use client::{CaClient, EnrolledIdentity};
pub use config::{CaClientConfig, CaClientConfigBuilder, JobTimeouts, Pkcs11Config};
pub use enroller::{new_enroller, EnrollStrategy, Enroller, Strategy, StrategyKind};
pub use error::{EnrollError, Result};
pub use orchestrator::{Instance, Orchestrator, OrchestratorError};
pub use types::{EnrollmentRequest, EnrollmentResponse};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("fabric-enroller/", env!("CARGO_PKG_VERSION"));
