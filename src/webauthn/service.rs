//! Ceremony verification service

use crate::errors::StepkeyError;
use crate::models::{Challenge, ChallengePurpose, Credential};
use crate::settings::WebAuthnSettings;
use crate::webauthn::cbor;
use crate::webauthn::types::{Assertion, Attestation, ClientData};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use ring::digest;
use ring::signature::{
    RsaPublicKeyComponents, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1,
    RSA_PKCS1_2048_8192_SHA256,
};

/// What a verified assertion tells the caller to do with the credential
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    pub credential_id: String,
    /// Counter reported by the authenticator
    pub new_counter: u32,
    /// True when this use is covered by the credential's counter
    /// exemption and the stored counter must be left untouched
    pub exempt_use: bool,
}

pub struct Verifier {
    settings: WebAuthnSettings,
}

impl Verifier {
    #[must_use]
    pub fn new(settings: WebAuthnSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &WebAuthnSettings {
        &self.settings
    }

    /// Verify a registration ceremony response against its challenge
    ///
    /// Checks client data type, challenge binding, and origin, then
    /// extracts and validates the attested credential. The returned
    /// credential is ready for storage; the caller decides whether to
    /// accept it.
    ///
    /// # Errors
    ///
    /// - `ChallengeInvalid` if the challenge was issued for a different
    ///   ceremony or the client data does not match it
    /// - `AttestationMalformed` for undecodable or unsupported payloads
    pub fn verify_registration(
        &self,
        challenge: &Challenge,
        attestation: &Attestation,
        device_label: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Credential, StepkeyError> {
        if challenge.purpose != ChallengePurpose::Registration {
            return Err(StepkeyError::ChallengeInvalid(
                "challenge was not issued for registration".into(),
            ));
        }
        let owner_id = challenge.owner_id.clone().ok_or_else(|| {
            StepkeyError::ChallengeInvalid("registration challenge has no account".into())
        })?;

        self.check_client_data(
            &attestation.client_data_json,
            "webauthn.create",
            &challenge.value,
        )?;

        let attested = cbor::extract_attested_credential(&attestation.attestation_object)?;
        if attested.credential_id != attestation.credential_id {
            return Err(StepkeyError::AttestationMalformed(
                "credential id does not match attested data".into(),
            ));
        }

        let counter_exempt =
            attested.initial_counter == 0 && self.settings.allow_counter_exempt;

        Ok(Credential {
            credential_id: attested.credential_id,
            owner_id,
            public_key: attested.public_key,
            signature_counter: attested.initial_counter,
            counter_exempt,
            device_label: device_label.map(String::from),
            created_at: now,
            last_used_at: None,
        })
    }

    /// Verify an authentication ceremony response
    ///
    /// Checks client data, verifies the signature with the stored
    /// public key, and applies the replay rules: the reported counter
    /// must exceed the stored one unless the credential is
    /// counter-exempt and both the stored and reported counters are
    /// still zero.
    ///
    /// # Errors
    ///
    /// - `ChallengeInvalid` for purpose or client data mismatches
    /// - `SignatureInvalid` when the signature does not verify
    /// - `ReplayDetected` when the counter regresses
    pub fn verify_authentication(
        &self,
        challenge: &Challenge,
        assertion: &Assertion,
        stored: &Credential,
    ) -> Result<AuthenticationResult, StepkeyError> {
        if challenge.purpose != ChallengePurpose::Authentication {
            return Err(StepkeyError::ChallengeInvalid(
                "challenge was not issued for authentication".into(),
            ));
        }

        self.check_client_data(
            &assertion.client_data_json,
            "webauthn.get",
            &challenge.value,
        )?;

        let auth_data = URL_SAFE_NO_PAD
            .decode(&assertion.authenticator_data)
            .map_err(|_| {
                StepkeyError::AttestationMalformed("invalid authenticator data encoding".into())
            })?;
        let client_data_bytes = URL_SAFE_NO_PAD
            .decode(&assertion.client_data_json)
            .map_err(|_| {
                StepkeyError::AttestationMalformed("invalid client data encoding".into())
            })?;
        let signature = URL_SAFE_NO_PAD
            .decode(&assertion.signature)
            .map_err(|_| StepkeyError::SignatureInvalid)?;

        self.verify_signature(&stored.public_key, &auth_data, &client_data_bytes, &signature)?;

        let new_counter = cbor::extract_counter(&auth_data)?;
        // A nonzero stored counter disproves the never-increments
        // premise, so the exemption only applies while both sides are
        // still zero.
        let exempt_use = stored.counter_exempt
            && stored.signature_counter == 0
            && new_counter == 0
            && self.settings.allow_counter_exempt;
        if !exempt_use && new_counter <= stored.signature_counter {
            return Err(StepkeyError::ReplayDetected);
        }

        Ok(AuthenticationResult {
            credential_id: stored.credential_id.clone(),
            new_counter,
            exempt_use,
        })
    }

    /// Decode client data JSON and check type, challenge, and origin
    fn check_client_data(
        &self,
        client_data_b64: &str,
        expected_type: &str,
        expected_challenge: &str,
    ) -> Result<(), StepkeyError> {
        let bytes = URL_SAFE_NO_PAD.decode(client_data_b64).map_err(|_| {
            StepkeyError::AttestationMalformed("invalid client data encoding".into())
        })?;
        let client_data: ClientData = serde_json::from_slice(&bytes)
            .map_err(|_| StepkeyError::AttestationMalformed("invalid client data JSON".into()))?;

        if client_data.type_ != expected_type {
            return Err(StepkeyError::ChallengeInvalid(format!(
                "unexpected client data type: {}",
                client_data.type_
            )));
        }
        if client_data.challenge != expected_challenge {
            return Err(StepkeyError::ChallengeInvalid(
                "challenge does not match".into(),
            ));
        }
        if client_data.origin != self.settings.rp_origin {
            return Err(StepkeyError::ChallengeInvalid(format!(
                "unexpected origin: {}",
                client_data.origin
            )));
        }
        Ok(())
    }

    /// Verify the assertion signature over
    /// `authenticator_data || SHA-256(client_data)` with whichever
    /// algorithm the stored key registered under
    fn verify_signature(
        &self,
        cose_public_key: &[u8],
        auth_data: &[u8],
        client_data: &[u8],
        signature: &[u8],
    ) -> Result<(), StepkeyError> {
        let client_data_hash = digest::digest(&digest::SHA256, client_data);
        let mut signed = Vec::with_capacity(auth_data.len() + client_data_hash.as_ref().len());
        signed.extend_from_slice(auth_data);
        signed.extend_from_slice(client_data_hash.as_ref());

        match cbor::parse_cose_key(cose_public_key)? {
            cbor::CosePublicKey::Es256 { point } => {
                UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, &point)
                    .verify(&signed, signature)
                    .map_err(|_| StepkeyError::SignatureInvalid)
            }
            cbor::CosePublicKey::Rs256 { n, e } => RsaPublicKeyComponents { n: &n, e: &e }
                .verify(&RSA_PKCS1_2048_8192_SHA256, &signed, signature)
                .map_err(|_| StepkeyError::SignatureInvalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn settings() -> WebAuthnSettings {
        WebAuthnSettings::default()
    }

    fn challenge(purpose: ChallengePurpose, owner: Option<&str>) -> Challenge {
        let now = Utc::now();
        Challenge {
            value: "test-challenge-value".to_string(),
            owner_id: owner.map(String::from),
            purpose,
            issued_at: now,
            expires_at: now + Duration::seconds(300),
            consumed: true,
        }
    }

    fn client_data_b64(type_: &str, challenge: &str, origin: &str) -> String {
        let json = serde_json::json!({
            "type": type_,
            "challenge": challenge,
            "origin": origin,
        });
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json).unwrap())
    }

    #[test]
    fn test_registration_rejects_wrong_purpose() {
        let verifier = Verifier::new(settings());
        let ch = challenge(ChallengePurpose::Authentication, Some("alice"));
        let attestation = Attestation {
            credential_id: "id".to_string(),
            client_data_json: String::new(),
            attestation_object: String::new(),
        };
        let result = verifier.verify_registration(&ch, &attestation, None, Utc::now());
        assert!(matches!(result, Err(StepkeyError::ChallengeInvalid(_))));
    }

    #[test]
    fn test_client_data_type_mismatch() {
        let verifier = Verifier::new(settings());
        let ch = challenge(ChallengePurpose::Registration, Some("alice"));
        let attestation = Attestation {
            credential_id: "id".to_string(),
            client_data_json: client_data_b64(
                "webauthn.get",
                "test-challenge-value",
                "http://localhost:8080",
            ),
            attestation_object: String::new(),
        };
        let result = verifier.verify_registration(&ch, &attestation, None, Utc::now());
        assert!(matches!(result, Err(StepkeyError::ChallengeInvalid(_))));
    }

    #[test]
    fn test_client_data_challenge_mismatch() {
        let verifier = Verifier::new(settings());
        let ch = challenge(ChallengePurpose::Registration, Some("alice"));
        let attestation = Attestation {
            credential_id: "id".to_string(),
            client_data_json: client_data_b64(
                "webauthn.create",
                "some-other-challenge",
                "http://localhost:8080",
            ),
            attestation_object: String::new(),
        };
        let result = verifier.verify_registration(&ch, &attestation, None, Utc::now());
        assert!(matches!(result, Err(StepkeyError::ChallengeInvalid(_))));
    }

    #[test]
    fn test_client_data_origin_mismatch() {
        let verifier = Verifier::new(settings());
        let ch = challenge(ChallengePurpose::Registration, Some("alice"));
        let attestation = Attestation {
            credential_id: "id".to_string(),
            client_data_json: client_data_b64(
                "webauthn.create",
                "test-challenge-value",
                "https://evil.example",
            ),
            attestation_object: String::new(),
        };
        let result = verifier.verify_registration(&ch, &attestation, None, Utc::now());
        assert!(matches!(result, Err(StepkeyError::ChallengeInvalid(_))));
    }

    #[test]
    fn test_authentication_rejects_wrong_purpose() {
        let verifier = Verifier::new(settings());
        let ch = challenge(ChallengePurpose::Registration, Some("alice"));
        let assertion = Assertion {
            credential_id: "id".to_string(),
            client_data_json: String::new(),
            authenticator_data: String::new(),
            signature: String::new(),
            user_handle: None,
        };
        let stored = Credential {
            credential_id: "id".to_string(),
            owner_id: "alice".to_string(),
            public_key: vec![],
            signature_counter: 0,
            counter_exempt: false,
            device_label: None,
            created_at: Utc::now(),
            last_used_at: None,
        };
        let result = verifier.verify_authentication(&ch, &assertion, &stored);
        assert!(matches!(result, Err(StepkeyError::ChallengeInvalid(_))));
    }
}
