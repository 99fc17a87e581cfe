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

//! Enrollment with an in-process software key.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, Instrument, Span};

use super::{enroll_with_client, EnrollStrategy};
use crate::client::CaClient;
use crate::error::Result;
use crate::hsm::software::read_keystore;
use crate::types::{EnrollmentRequest, EnrollmentResponse};

/// Enrolls with a key generated in process and returns the key in the response.
pub struct SoftwareEnroller {
    req: EnrollmentRequest,
    client: CaClient,
    span: Span,
}

impl SoftwareEnroller {
    /// Create a software enroller for `req` using `client`.
    pub fn new(req: EnrollmentRequest, client: CaClient, span: Span) -> Self {
        Self { req, client, span }
    }

    /// The CA client.
    pub fn client(&self) -> &CaClient {
        &self.client
    }

    async fn enroll_inner(&self) -> Result<EnrollmentResponse> {
        let mut resp = enroll_with_client(&self.client).await?;

        let keystore = self.client.config().keystore_dir();
        resp.keystore = read_keystore(&keystore)?;
        debug!("Read private key from {}", keystore.display());
        Ok(resp)
    }
}

#[async_trait]
impl EnrollStrategy for SoftwareEnroller {
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
        self.enroll_inner().instrument(self.span.clone()).await
    }
}
