//! Error types
//!
//! One enum covers every failure the subsystem reports. Messages stay
//! deliberately generic on cryptographic paths: signatures, counters,
//! and key material never appear in error text.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StepkeyError {
    #[error("Challenge not found")]
    ChallengeNotFound,

    #[error("Challenge expired")]
    ChallengeExpired,

    #[error("Challenge already consumed")]
    ChallengeAlreadyConsumed,

    #[error("Challenge invalid: {0}")]
    ChallengeInvalid(String),

    #[error("Attestation malformed: {0}")]
    AttestationMalformed(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Replay detected")]
    ReplayDetected,

    #[error("Credential already registered")]
    DuplicateCredential,

    #[error("Credential not found")]
    CredentialNotFound,

    #[error("Signature counter regression")]
    CounterRegression,

    #[error("Cannot remove the only remaining authentication method")]
    LastMethodViolation,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Audit write failure: {0}")]
    AuditWriteFailure(String),

    #[error("Policy evaluation error: {0}")]
    PolicyEvaluationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl StepkeyError {
    /// Stable identifier for logs and audit metadata
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChallengeNotFound => "challenge_not_found",
            Self::ChallengeExpired => "challenge_expired",
            Self::ChallengeAlreadyConsumed => "challenge_already_consumed",
            Self::ChallengeInvalid(_) => "challenge_invalid",
            Self::AttestationMalformed(_) => "attestation_malformed",
            Self::SignatureInvalid => "signature_invalid",
            Self::ReplayDetected => "replay_detected",
            Self::DuplicateCredential => "duplicate_credential",
            Self::CredentialNotFound => "credential_not_found",
            Self::CounterRegression => "counter_regression",
            Self::LastMethodViolation => "last_method_violation",
            Self::NotSupported(_) => "not_supported",
            Self::AuditWriteFailure(_) => "audit_write_failure",
            Self::PolicyEvaluationError(_) => "policy_evaluation_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::StorageError(_) => "storage_error",
        }
    }

    /// Whether the client must restart the ceremony from new options
    ///
    /// Challenge failures burn the nonce, so retrying with the same
    /// payload can never succeed.
    #[must_use]
    pub fn requires_ceremony_restart(&self) -> bool {
        matches!(
            self,
            Self::ChallengeNotFound
                | Self::ChallengeExpired
                | Self::ChallengeAlreadyConsumed
                | Self::ChallengeInvalid(_)
        )
    }
}
