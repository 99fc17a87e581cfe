//! Error types for enrollment.
//!
//! Errors fall into a handful of groups: request validation, CA connectivity,
//! CA protocol (malformed chains), local keystore and HSM problems,
//! orchestration failures, and enrollment job outcomes. All of them are fatal
//! for the current attempt; retrying is left to the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::orchestrator::OrchestratorError;

/// Result type alias using [`EnrollError`].
pub type Result<T> = std::result::Result<T, EnrollError>;

/// Errors that can occur while obtaining identity material from a CA.
#[derive(Debug, Error)]
pub enum EnrollError {
    /// A required enrollment request field is empty.
    #[error("unable to enroll, {0} not specified")]
    MissingField(&'static str),

    /// The CA health check failed.
    #[error("pinging '{url}' failed: {reason}")]
    Ping {
        /// URL that was pinged.
        url: String,
        /// Underlying transport or status error.
        reason: String,
    },

    /// The enrollment exchange with the CA failed.
    #[error("failed to enroll with CA: {0}")]
    Enroll(String),

    /// The CA answered but reported a failure.
    #[error("CA returned an error: {0}")]
    CaResponse(String),

    /// TLS configuration or connection error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A certificate in the returned CA chain has no CA basic constraint.
    #[error("a certificate in the CA chain is not a CA certificate")]
    NotCaCertificate,

    /// Failed to parse an X.509 certificate.
    #[error("Certificate parsing error: {0}")]
    CertificateParsing(String),

    /// Invalid PEM data.
    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    /// Failed to generate a key pair or CSR.
    #[error("CSR error: {0}")]
    Csr(String),

    /// More than one file found in the local keystore.
    #[error("expecting only one key file to present in keystore '{}', but found multiple", .0.display())]
    MultipleKeyFiles(PathBuf),

    /// No usable PKCS#8 private key in the local keystore.
    #[error("failed to read private key")]
    PrivateKey,

    /// PKCS#11 library or token error.
    #[error("HSM error: {0}")]
    Hsm(String),

    /// The HSM configuration could not be read or parsed.
    #[error("failed to read HSM config: {0}")]
    HsmConfig(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An orchestrator call failed.
    #[error("{context}: {source}")]
    Orchestration {
        /// Which resource operation failed.
        context: String,
        /// Error reported by the orchestrator.
        #[source]
        source: OrchestratorError,
    },

    /// The enrollment job never reported an active replica.
    #[error("job '{0}' failed to start")]
    JobStart(String),

    /// The enrollment container never reached a terminal state.
    #[error("job '{0}' failed to finish")]
    JobFinish(String),

    /// The enrollment container exited with a non-zero code.
    #[error("job '{0}' finished unsuccessfully, not cleaning up pods to allow for error evaluation")]
    JobFailed(String),

    /// The job's output secret did not appear in time.
    #[error("failed to create secret '{0}'")]
    SecretTimeout(String),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnrollError {
    /// Create a ping error for the given URL.
    pub fn ping(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Ping {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an enrollment error with the given message.
    pub fn enroll(msg: impl std::fmt::Display) -> Self {
        Self::Enroll(msg.to_string())
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a certificate parsing error with the given message.
    pub fn certificate_parsing(msg: impl Into<String>) -> Self {
        Self::CertificateParsing(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Create a CSR error with the given message.
    pub fn csr(msg: impl Into<String>) -> Self {
        Self::Csr(msg.into())
    }

    /// Create an HSM error with the given message.
    pub fn hsm(msg: impl Into<String>) -> Self {
        Self::Hsm(msg.into())
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an orchestrator error with the operation that failed.
    pub fn orchestration(context: impl Into<String>, source: OrchestratorError) -> Self {
        Self::Orchestration {
            context: context.into(),
            source,
        }
    }

    /// Returns true for errors raised by request validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::MissingField(_))
    }

    /// Returns true when the enrollment job failed and was left in place for inspection.
    pub fn is_job_preserved(&self) -> bool {
        matches!(self, Self::JobFailed(_))
    }
}
