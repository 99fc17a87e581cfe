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

//! Job-side enrollment tool.
//!
//! Runs inside the enrollment job's `certgen` container. It enrolls against
//! the CA with the PKCS#11 library mounted into the pod and publishes the
//! result as `ecert-<name>-*` secrets.
//!
//! # Usage
//!
//! ```text
//! enroller enroll --config <PATH> --tls-cert <PATH> --name <NAME> --namespace <NS> [--enroll-id <ID>]
//!
//! Environment:
//!   ENROLL_SECRET   Enrollment secret registered with the CA
//!   RUST_LOG        Log filter, overrides --log-level
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use fabric_enroller::enroller::enroll_with_client;
use fabric_enroller::logging::{init_logging, LogConfig, LogLevel};
use fabric_enroller::orchestrator::KubeOrchestrator;
use fabric_enroller::secrets::create_output_secrets;
use fabric_enroller::{CaClient, CaClientConfig, EnrollError, Result};

/// Enrollment job tool
#[derive(Parser)]
#[command(name = "enroller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Enroll with a CA and publish the identity as secrets", long_about = None)]
struct Cli {
    /// Minimum log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", value_name = "LEVEL")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll and store the result in output secrets
    Enroll(EnrollArgs),
}

#[derive(clap::Args)]
struct EnrollArgs {
    /// CA client configuration (YAML)
    #[arg(long, value_name = "PATH")]
    config: PathBuf,

    /// TLS certificate of the CA (PEM)
    #[arg(long, value_name = "PATH")]
    tls_cert: PathBuf,

    /// Name of the instance being enrolled
    #[arg(long)]
    name: String,

    /// Namespace to create the output secrets in
    #[arg(long)]
    namespace: String,

    /// Enrollment ID; defaults to the CSR common name in the configuration
    #[arg(long)]
    enroll_id: Option<String>,

    /// Enrollment secret
    #[arg(long, env = "ENROLL_SECRET", hide_env_values = true)]
    enroll_secret: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match LogLevel::parse(&cli.log_level) {
        Some(level) => level,
        None => {
            eprintln!("Invalid log level: {}", cli.log_level);
            return ExitCode::FAILURE;
        }
    };
    let mut log_config = LogConfig::default().with_level(level);
    if cli.json_logs {
        log_config = log_config.with_json();
    }
    if let Err(e) = init_logging(&log_config) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Enroll(args) => runtime.block_on(cmd_enroll(args)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_enroll(args: EnrollArgs) -> Result<()> {
    let config = CaClientConfig::from_file(&args.config)?;
    let tls_cert = tokio::fs::read(&args.tls_cert).await?;
    let enroll_id = args.enroll_id.unwrap_or_else(|| config.csr.cn.clone());
    if enroll_id.is_empty() {
        return Err(EnrollError::MissingField("enrollment ID"));
    }

    tracing::info!(
        "Enrolling '{}' for {}/{} against {}",
        enroll_id,
        args.namespace,
        args.name,
        config.url
    );
    let client = CaClient::new(config, tls_cert, enroll_id, args.enroll_secret)?;
    let resp = enroll_with_client(&client).await?;

    let orchestrator = KubeOrchestrator::try_default()
        .await
        .map_err(|e| EnrollError::orchestration("failed to connect to the cluster", e))?;
    create_output_secrets(&orchestrator, &args.name, &args.namespace, &resp).await?;

    tracing::info!("Enrollment of '{}' complete", args.name);
    Ok(())
}
