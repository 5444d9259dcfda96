//! Core data types for `stepkey`
//!
//! This module defines the serializable records owned by the subsystem:
//! credentials, challenges, elevation state, policies, and audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One enrolled authenticator binding for a user
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Credential {
    pub credential_id: String, // Base64URL-encoded credential ID (globally unique)
    pub owner_id: String,
    pub public_key: Vec<u8>, // COSE-encoded public key
    pub signature_counter: u32,
    /// Set at registration time for authenticators that legitimately never
    /// increment their counter (stateless type). Only such records may
    /// authenticate without a counter bump.
    pub counter_exempt: bool,
    pub device_label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// What a challenge was issued for
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    Registration,
    Authentication,
}

/// An issued one-time nonce for a ceremony
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Challenge {
    pub value: String, // Base64URL-encoded random value
    /// None for username-less authentication flows
    pub owner_id: Option<String>,
    pub purpose: ChallengePurpose,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl Challenge {
    /// Whether the challenge has outlived its TTL at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Per-user step-up state: the moment of the last successful elevation
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ElevationRecord {
    pub owner_id: String,
    pub elevated_at: DateTime<Utc>,
    /// Credential id that performed the step-up (kept for audit)
    pub method: String,
}

/// Declares that a resource requires elevated assurance
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Policy {
    pub resource_ref: String,
    pub required: bool,
    /// When non-empty, only users holding one of these roles are subject
    /// to the requirement
    #[serde(default)]
    pub required_roles: Vec<String>,
}

/// The closed set of security-relevant actions the audit log records
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    RegistrationStart,
    RegistrationSuccess,
    RegistrationFailure,
    AuthenticationStart,
    AuthenticationSuccess,
    AuthenticationFailure,
    ReplayDetected,
    CredentialUpdated,
    CredentialDeleted,
    ElevationSet,
    AccessGranted,
    AccessDenied,
    PolicySet,
}

impl ActionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::RegistrationStart => "registration_start",
            ActionType::RegistrationSuccess => "registration_success",
            ActionType::RegistrationFailure => "registration_failure",
            ActionType::AuthenticationStart => "authentication_start",
            ActionType::AuthenticationSuccess => "authentication_success",
            ActionType::AuthenticationFailure => "authentication_failure",
            ActionType::ReplayDetected => "replay_detected",
            ActionType::CredentialUpdated => "credential_updated",
            ActionType::CredentialDeleted => "credential_deleted",
            ActionType::ElevationSet => "elevation_set",
            ActionType::AccessGranted => "access_granted",
            ActionType::AccessDenied => "access_denied",
            ActionType::PolicySet => "policy_set",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the operation an audit event records
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one security-relevant occurrence
///
/// The metadata value is action-specific and must never contain secrets
/// or raw credential material.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub owner_id: String,
    pub action_type: ActionType,
    pub outcome: Outcome,
    pub source_ip: String,
    pub client_info: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// Create a new audit event stamped with the current time
    #[must_use]
    pub fn new(
        owner_id: &str,
        action_type: ActionType,
        outcome: Outcome,
        source_ip: Option<&str>,
        client_info: Option<&str>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            owner_id: if owner_id.is_empty() {
                "anonymous".to_string()
            } else {
                owner_id.to_string()
            },
            action_type,
            outcome,
            source_ip: source_ip.unwrap_or("unknown").to_string(),
            client_info: client_info.unwrap_or("unknown").to_string(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_challenge_expiry() {
        let now = Utc::now();
        let challenge = Challenge {
            value: "abc".to_string(),
            owner_id: Some("alice".to_string()),
            purpose: ChallengePurpose::Registration,
            issued_at: now,
            expires_at: now + Duration::seconds(300),
            consumed: false,
        };

        assert!(!challenge.is_expired(now));
        assert!(!challenge.is_expired(now + Duration::seconds(300)));
        assert!(challenge.is_expired(now + Duration::seconds(301)));
    }

    #[test]
    fn test_action_type_round_trip() {
        let json = serde_json::to_string(&ActionType::AuthenticationFailure).unwrap();
        assert_eq!(json, "\"authentication_failure\"");
        let back: ActionType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ActionType::AuthenticationFailure);
        assert_eq!(back.as_str(), "authentication_failure");
    }

    #[test]
    fn test_audit_event_defaults() {
        let event = AuditEvent::new(
            "",
            ActionType::AccessDenied,
            Outcome::Failure,
            None,
            None,
            serde_json::Value::Null,
        );
        assert_eq!(event.owner_id, "anonymous");
        assert_eq!(event.source_ip, "unknown");
        assert_eq!(event.client_info, "unknown");
        assert!(!event.event_id.is_empty());

        let other = AuditEvent::new(
            "bob",
            ActionType::AccessDenied,
            Outcome::Failure,
            Some("10.0.0.1"),
            Some("Mozilla/5.0"),
            serde_json::Value::Null,
        );
        assert_ne!(event.event_id, other.event_id);
        assert_eq!(other.owner_id, "bob");
        assert_eq!(other.source_ip, "10.0.0.1");
    }
}
