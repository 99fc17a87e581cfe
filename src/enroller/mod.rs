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

//! Enrollment strategies.
//!
//! Where the private key is generated decides how an identity is enrolled:
//!
//! | Strategy | Key material |
//! |---|---|
//! | [`SoftwareEnroller`] | generated in process, returned in the response |
//! | [`HsmProxyEnroller`] | generated in an HSM reached through a PKCS#11 proxy |
//! | [`HsmJobEnroller`] ([`JobMode::Library`]) | generated by a job loading the HSM library |
//! | [`HsmJobEnroller`] ([`JobMode::Daemon`]) | generated by a job talking to a PKCS#11 daemon |
//!
//! [`Enroller`] wraps the chosen [`Strategy`] and adds the request-level
//! steps every strategy shares. Use [`new_enroller`] to pick the strategy for
//! an instance.

mod factory;
mod job;
mod proxy;
mod software;

pub use factory::{new_enroller, select_strategy, StrategyKind};
pub use job::{HsmJobEnroller, JobContext};
pub use proxy::{HsmProxyEnroller, HSM_PROXY_LIBRARY};
pub use software::SoftwareEnroller;

pub use crate::job::JobMode;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, Instrument, Span};

use crate::chain::parse_chain;
use crate::client::CaClient;
use crate::error::Result;
use crate::types::{EnrollmentRequest, EnrollmentResponse};

/// What every enrollment strategy can do.
#[async_trait]
pub trait EnrollStrategy: Send + Sync {
    /// The request this strategy enrolls.
    fn enrollment_request(&self) -> &EnrollmentRequest;

    /// Check that the CA is reachable within `timeout`.
    async fn ping_ca(&self, timeout: Duration) -> Result<()>;

    /// Obtain identity material for the request.
    async fn enroll(&mut self) -> Result<EnrollmentResponse>;
}

/// The closed set of enrollment strategies.
pub enum Strategy {
    /// Key generated in process.
    Software(SoftwareEnroller),
    /// Key generated through a PKCS#11 proxy.
    HsmProxy(HsmProxyEnroller),
    /// Key generated by a job loading the HSM library.
    HsmSidecarJob(HsmJobEnroller),
    /// Key generated by a job talking to a PKCS#11 daemon.
    HsmDaemonSidecarJob(HsmJobEnroller),
}

impl Strategy {
    /// Which variant this is.
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Software(_) => StrategyKind::Software,
            Self::HsmProxy(_) => StrategyKind::HsmProxy,
            Self::HsmSidecarJob(_) => StrategyKind::HsmSidecarJob,
            Self::HsmDaemonSidecarJob(_) => StrategyKind::HsmDaemonSidecarJob,
        }
    }

    fn inner(&self) -> &dyn EnrollStrategy {
        match self {
            Self::Software(s) => s,
            Self::HsmProxy(s) => s,
            Self::HsmSidecarJob(s) | Self::HsmDaemonSidecarJob(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn EnrollStrategy {
        match self {
            Self::Software(s) => s,
            Self::HsmProxy(s) => s,
            Self::HsmSidecarJob(s) | Self::HsmDaemonSidecarJob(s) => s,
        }
    }
}

#[async_trait]
impl EnrollStrategy for Strategy {
    fn enrollment_request(&self) -> &EnrollmentRequest {
        self.inner().enrollment_request()
    }

    async fn ping_ca(&self, timeout: Duration) -> Result<()> {
        self.inner().ping_ca(timeout).await
    }

    async fn enroll(&mut self) -> Result<EnrollmentResponse> {
        self.inner_mut().enroll().await
    }
}

/// Enrolls one identity using a [`Strategy`].
pub struct Enroller {
    strategy: Strategy,
    span: Span,
}

impl Enroller {
    /// Wrap `strategy`; all events of the enrollment are recorded in `span`.
    pub fn new(strategy: Strategy, span: Span) -> Self {
        Self { strategy, span }
    }

    /// Which strategy this enroller uses.
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// The underlying strategy.
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// The request being enrolled.
    pub fn enrollment_request(&self) -> &EnrollmentRequest {
        self.strategy.enrollment_request()
    }

    /// Check that the CA is reachable within `timeout`.
    pub async fn ping_ca(&self, timeout: Duration) -> Result<()> {
        self.strategy
            .ping_ca(timeout)
            .instrument(self.span.clone())
            .await
    }

    /// Validate the request, enroll, and attach the request's admin certificates.
    pub async fn get_crypto(&mut self) -> Result<EnrollmentResponse> {
        let span = self.span.clone();
        self.get_crypto_inner().instrument(span).await
    }

    async fn get_crypto_inner(&mut self) -> Result<EnrollmentResponse> {
        let req = self.strategy.enrollment_request();
        req.validate()?;
        let admin_certs = req.decoded_admin_certs()?;
        info!("Enrolling '{}'", req.enroll_id);

        let mut resp = self.strategy.enroll().await?;
        resp.admin_certs = admin_certs;
        Ok(resp)
    }
}

/// Enroll directly with the CA from this process.
///
/// Writes the CA's TLS certificate, prepares the client home, enrolls and
/// classifies the returned chain.
pub async fn enroll_with_client(client: &CaClient) -> Result<EnrollmentResponse> {
    client.init().await?;
    let identity = client.enroll().await?;

    let mut resp = EnrollmentResponse {
        sign_cert: identity.cert,
        ..Default::default()
    };
    parse_chain(&identity.ca_chain, &mut resp)?;

    info!(
        "Enrolled with CA '{}' ({} root, {} intermediate bundle)",
        identity.ca_name,
        resp.ca_certs.len(),
        resp.intermediate_certs.len()
    );
    Ok(resp)
}
