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

//! Enrollment through a PKCS#11 proxy.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{Instrument, Span};

use super::{enroll_with_client, EnrollStrategy};
use crate::client::CaClient;
use crate::error::Result;
use crate::types::{EnrollmentRequest, EnrollmentResponse};

/// Where the PKCS#11 proxy library is installed in the enroller image.
pub const HSM_PROXY_LIBRARY: &str = "/usr/local/lib/libpkcs11-proxy.so";

/// Enrolls with a key generated in an HSM reached through the PKCS#11 proxy.
///
/// The key never leaves the HSM, so the response carries no keystore.
pub struct HsmProxyEnroller {
    req: EnrollmentRequest,
    client: CaClient,
    span: Span,
}

impl HsmProxyEnroller {
    /// Create a proxy enroller for `req` using `client`.
    pub fn new(req: EnrollmentRequest, client: CaClient, span: Span) -> Self {
        Self { req, client, span }
    }

    /// The CA client.
    pub fn client(&self) -> &CaClient {
        &self.client
    }
}

#[async_trait]
impl EnrollStrategy for HsmProxyEnroller {
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
        self.client.set_hsm_library(HSM_PROXY_LIBRARY);
        enroll_with_client(&self.client).instrument(span).await
    }
}
