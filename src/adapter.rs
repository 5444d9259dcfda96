//! Host application facade
//!
//! `AuthenticationAdapter` owns every component and exposes the
//! operations a host application calls: ceremony option issuance,
//! ceremony verification, access checks, credential management, and
//! audit administration. All security-relevant outcomes are written to
//! the audit trail here, so individual components stay audit-free.

use crate::audit::{AuditFilter, AuditLog, AuditQuery, AuditStore, EventKey, ExportFormat, MemoryAuditStore};
use crate::challenges::ChallengeManager;
use crate::credentials::CredentialStore;
use crate::directory::UserDirectory;
use crate::elevation::ElevationTracker;
use crate::errors::StepkeyError;
use crate::models::{
    ActionType, AuditEvent, Challenge, ChallengePurpose, Credential, ElevationRecord, Outcome,
    Policy,
};
use crate::policy::{AccessDecision, DenyReason, PolicyEngine};
use crate::settings::StepkeySettings;
use crate::webauthn::{Assertion, Attestation, Verifier};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Request-scoped facts recorded with every audit event
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub source_ip: String,
    pub client_info: String,
}

impl RequestContext {
    #[must_use]
    pub fn new(source_ip: &str, client_info: &str) -> Self {
        Self {
            source_ip: source_ip.to_string(),
            client_info: client_info.to_string(),
        }
    }
}

/// Parameters handed to the client to start a ceremony
#[derive(Debug, Clone, Serialize)]
pub struct CeremonyOptions {
    pub challenge: String,
    pub rp_id: String,
    pub rp_name: String,
    pub timeout_ms: u64,
    pub user_verification: String,
    /// Credential IDs the client may use; empty for registration
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_credentials: Vec<String>,
    /// Already-registered credential IDs the client must not re-enroll;
    /// empty for authentication
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_credentials: Vec<String>,
}

/// What a completed authentication ceremony produced
#[derive(Debug, Clone)]
pub struct AuthenticationOutcome {
    pub owner_id: String,
    pub credential_id: String,
    /// Present when the ceremony was a step-up and elevated the account
    pub elevation: Option<ElevationRecord>,
}

/// Elevation state reported to the host application
#[derive(Debug, Clone, Serialize)]
pub struct ElevationStatus {
    pub elevated: bool,
    /// `None` when not elevated, so zero seconds left is still
    /// distinguishable from expired
    pub seconds_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct AuthenticationAdapter {
    settings: StepkeySettings,
    challenges: ChallengeManager,
    credentials: CredentialStore,
    verifier: Verifier,
    elevation: Arc<ElevationTracker>,
    policy: PolicyEngine,
    audit: AuditLog,
    directory: Arc<dyn UserDirectory>,
}

impl AuthenticationAdapter {
    /// Build an adapter with an in-memory audit store
    ///
    /// # Errors
    ///
    /// Returns `PolicyEvaluationError` if a configured protected
    /// pattern cannot be compiled.
    pub fn new(
        settings: StepkeySettings,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self, StepkeyError> {
        Self::with_store(settings, directory, Arc::new(MemoryAuditStore::new()))
    }

    /// Build an adapter on a caller-supplied audit store
    ///
    /// # Errors
    ///
    /// Returns `PolicyEvaluationError` if a configured protected
    /// pattern cannot be compiled.
    pub fn with_store(
        settings: StepkeySettings,
        directory: Arc<dyn UserDirectory>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Result<Self, StepkeyError> {
        let elevation = Arc::new(ElevationTracker::new(settings.elevation.window_seconds));
        let policy = PolicyEngine::new(elevation.clone(), &settings.policy.protected_patterns)?;
        let audit = AuditLog::new(
            audit_store,
            settings.audit.failure_mode,
            settings.audit.retention_days,
        );

        Ok(Self {
            challenges: ChallengeManager::new(settings.challenge.ttl_seconds),
            credentials: CredentialStore::new(directory.clone()),
            verifier: Verifier::new(settings.webauthn.clone()),
            elevation,
            policy,
            audit,
            directory,
            settings,
        })
    }

    fn record(
        &self,
        owner_id: &str,
        action: ActionType,
        outcome: Outcome,
        ctx: &RequestContext,
        metadata: serde_json::Value,
    ) -> Result<(), StepkeyError> {
        let event = AuditEvent::new(
            owner_id,
            action,
            outcome,
            Some(&ctx.source_ip).filter(|s| !s.is_empty()).map(String::as_str),
            Some(&ctx.client_info).filter(|s| !s.is_empty()).map(String::as_str),
            metadata,
        );
        self.audit.record(event)
    }

    /// Begin a registration ceremony for an account
    ///
    /// # Errors
    ///
    /// Returns `AuditWriteFailure` in strict audit mode when the start
    /// event cannot be recorded.
    pub fn registration_options(
        &self,
        owner_id: &str,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<CeremonyOptions, StepkeyError> {
        let challenge = self
            .challenges
            .issue(ChallengePurpose::Registration, Some(owner_id), now);
        self.record(
            owner_id,
            ActionType::RegistrationStart,
            Outcome::Success,
            ctx,
            json!({}),
        )?;
        let exclude: Vec<String> = self
            .credentials
            .list(owner_id)
            .into_iter()
            .map(|c| c.credential_id)
            .collect();
        Ok(self.options_for(challenge, Vec::new(), exclude))
    }

    /// Complete a registration ceremony and store the new credential
    ///
    /// # Errors
    ///
    /// Challenge, parsing, and validation failures propagate; each is
    /// audited as a registration failure against the challenge's
    /// account when the challenge named one.
    pub fn verify_registration(
        &self,
        challenge_value: &str,
        attestation: &Attestation,
        device_label: Option<&str>,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<Credential, StepkeyError> {
        let (owner, result) = match self.challenges.consume(challenge_value, now) {
            Ok(challenge) => {
                let owner = challenge.owner_id.clone();
                let result = self
                    .verifier
                    .verify_registration(&challenge, attestation, device_label, now)
                    .and_then(|credential| {
                        self.credentials.add(credential.clone())?;
                        Ok(credential)
                    });
                (owner, result)
            }
            Err(err) => (None, Err(err)),
        };

        match &result {
            Ok(credential) => {
                self.record(
                    &credential.owner_id,
                    ActionType::RegistrationSuccess,
                    Outcome::Success,
                    ctx,
                    json!({
                        "credential_id": credential.credential_id,
                        "counter_exempt": credential.counter_exempt,
                    }),
                )?;
            }
            Err(err) => {
                self.record(
                    owner.as_deref().unwrap_or("anonymous"),
                    ActionType::RegistrationFailure,
                    Outcome::Failure,
                    ctx,
                    json!({ "reason": err.kind() }),
                )?;
            }
        }
        result
    }

    /// Begin an authentication ceremony
    ///
    /// With an account, the options carry that account's credential IDs
    /// as the allow list. Without one (discoverable-credential flow),
    /// the challenge is unbound and the allow list stays empty.
    ///
    /// # Errors
    ///
    /// - `CredentialNotFound` when a named account has no credentials
    /// - `AuditWriteFailure` in strict audit mode
    pub fn authentication_options(
        &self,
        owner_id: Option<&str>,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<CeremonyOptions, StepkeyError> {
        let allow: Vec<String> = match owner_id {
            Some(owner) => {
                let ids: Vec<String> = self
                    .credentials
                    .list(owner)
                    .into_iter()
                    .map(|c| c.credential_id)
                    .collect();
                if ids.is_empty() {
                    return Err(StepkeyError::CredentialNotFound);
                }
                ids
            }
            None => Vec::new(),
        };

        let challenge = self
            .challenges
            .issue(ChallengePurpose::Authentication, owner_id, now);
        self.record(
            owner_id.unwrap_or(""),
            ActionType::AuthenticationStart,
            Outcome::Success,
            ctx,
            json!({}),
        )?;
        Ok(self.options_for(challenge, allow, Vec::new()))
    }

    /// Complete an authentication ceremony
    ///
    /// A verified assertion updates credential usage; when `step_up` is
    /// set the account is also elevated for the configured window.
    /// Replays are audited twice: once as an authentication failure and
    /// once as a replay anomaly.
    ///
    /// # Errors
    ///
    /// Challenge, signature, and replay failures propagate; each is
    /// audited first.
    pub fn verify_authentication(
        &self,
        challenge_value: &str,
        assertion: &Assertion,
        step_up: bool,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<AuthenticationOutcome, StepkeyError> {
        let owner_for_audit = self
            .credentials
            .get(&assertion.credential_id)
            .map(|c| c.owner_id)
            .unwrap_or_else(|_| "anonymous".to_string());

        match self.try_verify_authentication(challenge_value, assertion, step_up, now) {
            Ok(outcome) => {
                self.record(
                    &outcome.owner_id,
                    ActionType::AuthenticationSuccess,
                    Outcome::Success,
                    ctx,
                    json!({ "credential_id": assertion.credential_id }),
                )?;
                if let Some(elevation) = &outcome.elevation {
                    self.record(
                        &outcome.owner_id,
                        ActionType::ElevationSet,
                        Outcome::Success,
                        ctx,
                        json!({
                            "expires_at": self.elevation.expires_at(&elevation.owner_id),
                        }),
                    )?;
                }
                Ok(outcome)
            }
            Err(err) => {
                self.record(
                    &owner_for_audit,
                    ActionType::AuthenticationFailure,
                    Outcome::Failure,
                    ctx,
                    json!({ "reason": err.kind() }),
                )?;
                if matches!(err, StepkeyError::ReplayDetected | StepkeyError::CounterRegression) {
                    self.record(
                        &owner_for_audit,
                        ActionType::ReplayDetected,
                        Outcome::Failure,
                        ctx,
                        json!({ "credential_id": assertion.credential_id }),
                    )?;
                }
                Err(err)
            }
        }
    }

    fn try_verify_authentication(
        &self,
        challenge_value: &str,
        assertion: &Assertion,
        step_up: bool,
        now: DateTime<Utc>,
    ) -> Result<AuthenticationOutcome, StepkeyError> {
        let challenge = self.challenges.consume(challenge_value, now)?;
        let stored = self.credentials.get(&assertion.credential_id)?;

        if let Some(owner) = &challenge.owner_id {
            if owner != &stored.owner_id {
                return Err(StepkeyError::ChallengeInvalid(
                    "challenge was issued for a different account".into(),
                ));
            }
        }

        let result = self
            .verifier
            .verify_authentication(&challenge, assertion, &stored)?;

        if result.exempt_use {
            self.credentials.record_use(&result.credential_id, now)?;
        } else {
            // Re-checked under the store's write lock, so racing
            // assertions with the same counter produce one success.
            self.credentials
                .update_usage(&result.credential_id, result.new_counter, now)?;
        }

        let elevation = step_up.then(|| {
            self.elevation
                .elevate(&stored.owner_id, &result.credential_id, now)
        });

        Ok(AuthenticationOutcome {
            owner_id: stored.owner_id,
            credential_id: result.credential_id,
            elevation,
        })
    }

    fn options_for(
        &self,
        challenge: Challenge,
        allow: Vec<String>,
        exclude: Vec<String>,
    ) -> CeremonyOptions {
        CeremonyOptions {
            challenge: challenge.value,
            rp_id: self.settings.webauthn.rp_id.clone(),
            rp_name: self.settings.webauthn.rp_name.clone(),
            timeout_ms: self.settings.webauthn.timeout_seconds * 1000,
            user_verification: self.settings.webauthn.user_verification.clone(),
            allow_credentials: allow,
            exclude_credentials: exclude,
        }
    }

    /// Decide whether an account may access a resource right now
    ///
    /// Grants on unprotected resources are not audited; decisions on
    /// protected resources are.
    ///
    /// # Errors
    ///
    /// Returns `AuditWriteFailure` in strict audit mode when the
    /// decision cannot be recorded.
    pub fn check_access(
        &self,
        owner_id: &str,
        resource_ref: &str,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, StepkeyError> {
        let roles = self.directory.roles(owner_id);
        let protected = self.policy.requires_elevation(resource_ref, &roles);
        let decision = self.policy.check_access(owner_id, resource_ref, &roles, now);

        if protected {
            let (action, outcome) = match &decision {
                AccessDecision::Allowed => (ActionType::AccessGranted, Outcome::Success),
                AccessDecision::Denied(_) => (ActionType::AccessDenied, Outcome::Failure),
            };
            let reason = match &decision {
                AccessDecision::Denied(DenyReason::NotElevated) => Some("not_elevated"),
                AccessDecision::Denied(DenyReason::EvaluationError) => Some("evaluation_error"),
                AccessDecision::Allowed => None,
            };
            self.record(
                owner_id,
                action,
                outcome,
                ctx,
                json!({ "resource": resource_ref, "reason": reason }),
            )?;
        }
        Ok(decision)
    }

    /// Credentials registered to an account, in stable order
    #[must_use]
    pub fn list_credentials(&self, owner_id: &str) -> Vec<Credential> {
        self.credentials.list(owner_id)
    }

    /// Relabel a credential
    ///
    /// # Errors
    ///
    /// Propagates `CredentialNotFound` and audit write failures
    pub fn rename_credential(
        &self,
        credential_id: &str,
        label: &str,
        ctx: &RequestContext,
    ) -> Result<(), StepkeyError> {
        self.credentials.rename(credential_id, label)?;
        let owner = self.credentials.get(credential_id)?.owner_id;
        self.record(
            &owner,
            ActionType::CredentialUpdated,
            Outcome::Success,
            ctx,
            json!({ "credential_id": credential_id }),
        )
    }

    /// Delete a credential, refusing to lock the account out
    ///
    /// # Errors
    ///
    /// Propagates `CredentialNotFound`, `LastMethodViolation`, and
    /// audit write failures
    pub fn delete_credential(
        &self,
        credential_id: &str,
        ctx: &RequestContext,
    ) -> Result<(), StepkeyError> {
        let removed = self.credentials.delete(credential_id)?;
        self.record(
            &removed.owner_id,
            ActionType::CredentialDeleted,
            Outcome::Success,
            ctx,
            json!({ "credential_id": credential_id }),
        )
    }

    /// Install or replace a resource policy
    ///
    /// # Errors
    ///
    /// Returns `AuditWriteFailure` in strict audit mode
    pub fn set_policy(&self, policy: Policy, ctx: &RequestContext) -> Result<(), StepkeyError> {
        let resource = policy.resource_ref.clone();
        let required = policy.required;
        self.policy.set_policy(policy);
        self.record(
            "system",
            ActionType::PolicySet,
            Outcome::Success,
            ctx,
            json!({ "resource": resource, "required": required }),
        )
    }

    /// Remove a resource policy, returning whether one existed
    pub fn clear_policy(&self, resource_ref: &str) -> bool {
        self.policy.clear_policy(resource_ref)
    }

    /// Current elevation state for an account
    #[must_use]
    pub fn elevation_status(&self, owner_id: &str, now: DateTime<Utc>) -> ElevationStatus {
        let elevated = self.elevation.is_valid(owner_id, now);
        ElevationStatus {
            elevated,
            seconds_remaining: self.elevation.time_remaining(owner_id, now),
            expires_at: elevated.then(|| self.elevation.expires_at(owner_id)).flatten(),
        }
    }

    /// Drop an account's elevation immediately
    pub fn clear_elevation(&self, owner_id: &str) -> bool {
        self.elevation.clear(owner_id)
    }

    /// Drop all expired elevation records
    pub fn prune_elevations(&self, now: DateTime<Utc>) -> usize {
        self.elevation.prune(now)
    }

    /// Iterate audit events matching a filter
    #[must_use]
    pub fn query_audit(&self, filter: AuditFilter) -> AuditQuery {
        self.audit.query(filter)
    }

    /// Resume an audit query from a saved cursor
    #[must_use]
    pub fn query_audit_after(&self, filter: AuditFilter, cursor: EventKey) -> AuditQuery {
        self.audit.query_after(filter, cursor)
    }

    /// Export matching audit events as CSV or JSON
    #[must_use]
    pub fn export_audit(&self, filter: AuditFilter, format: ExportFormat) -> String {
        self.audit.export(filter, format)
    }

    /// Apply the audit retention policy
    pub fn cleanup_audit(&self, now: DateTime<Utc>) -> usize {
        self.audit.cleanup(now)
    }

    /// Summary counts over the audit trail
    #[must_use]
    pub fn audit_stats(&self, now: DateTime<Utc>) -> serde_json::Value {
        self.audit.stats(now)
    }
}
