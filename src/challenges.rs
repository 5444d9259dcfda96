//! One-time challenge issuance and consumption
//!
//! Challenges are opaque random nonces bound to a ceremony purpose and
//! optionally an account. Each challenge is single-use: consumption
//! marks it consumed before its validity is even examined, so a value
//! can never be redeemed twice regardless of the outcome of the first
//! attempt.

use crate::errors::StepkeyError;
use crate::models::{Challenge, ChallengePurpose};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Mutex;

const CHALLENGE_BYTES: usize = 32;

pub struct ChallengeManager {
    ttl_seconds: u64,
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl ChallengeManager {
    #[must_use]
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            challenges: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh challenge for the given ceremony purpose
    ///
    /// Expired challenges are pruned opportunistically on each issue so
    /// the table does not grow with abandoned ceremonies.
    pub fn issue(
        &self,
        purpose: ChallengePurpose,
        owner_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Challenge {
        let mut bytes = [0u8; CHALLENGE_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);

        let challenge = Challenge {
            value: value.clone(),
            owner_id: owner_id.map(String::from),
            purpose,
            issued_at: now,
            expires_at: now + Duration::seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX)),
            consumed: false,
        };

        let mut challenges = self
            .challenges
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        challenges.retain(|_, c| !c.is_expired(now));
        challenges.insert(value, challenge.clone());
        challenge
    }

    /// Consume a challenge, enforcing single use
    ///
    /// The challenge is marked consumed before expiry is checked: a
    /// failed consumption still burns the value.
    ///
    /// # Errors
    ///
    /// - `ChallengeNotFound` if the value was never issued (or was pruned)
    /// - `ChallengeAlreadyConsumed` if it was redeemed before
    /// - `ChallengeExpired` if its validity window has passed
    pub fn consume(&self, value: &str, now: DateTime<Utc>) -> Result<Challenge, StepkeyError> {
        let mut challenges = self
            .challenges
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let challenge = challenges
            .get_mut(value)
            .ok_or(StepkeyError::ChallengeNotFound)?;

        if challenge.consumed {
            return Err(StepkeyError::ChallengeAlreadyConsumed);
        }
        challenge.consumed = true;

        if challenge.is_expired(now) {
            return Err(StepkeyError::ChallengeExpired);
        }

        Ok(challenge.clone())
    }

    /// Number of live (unexpired, unconsumed) challenges
    #[must_use]
    pub fn pending_count(&self, now: DateTime<Utc>) -> usize {
        let challenges = self
            .challenges
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        challenges
            .values()
            .filter(|c| !c.consumed && !c.is_expired(now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn manager() -> ChallengeManager {
        ChallengeManager::new(300)
    }

    #[test]
    fn test_issue_produces_unique_values() {
        let mgr = manager();
        let now = Utc::now();
        let a = mgr.issue(ChallengePurpose::Registration, Some("alice"), now);
        let b = mgr.issue(ChallengePurpose::Registration, Some("alice"), now);
        assert_ne!(a.value, b.value);
        assert_eq!(a.owner_id.as_deref(), Some("alice"));
        assert_eq!(a.expires_at, now + Duration::seconds(300));
    }

    #[test]
    fn test_consume_once() {
        let mgr = manager();
        let now = Utc::now();
        let issued = mgr.issue(ChallengePurpose::Authentication, Some("alice"), now);

        let consumed = mgr.consume(&issued.value, now).unwrap();
        assert_eq!(consumed.value, issued.value);

        let second = mgr.consume(&issued.value, now);
        assert!(matches!(second, Err(StepkeyError::ChallengeAlreadyConsumed)));
    }

    #[test]
    fn test_consume_unknown() {
        let mgr = manager();
        let result = mgr.consume("never-issued", Utc::now());
        assert!(matches!(result, Err(StepkeyError::ChallengeNotFound)));
    }

    #[test]
    fn test_expired_challenge_is_burned() {
        let mgr = manager();
        let now = Utc::now();
        let issued = mgr.issue(ChallengePurpose::Authentication, None, now);

        let later = now + Duration::seconds(301);
        let result = mgr.consume(&issued.value, later);
        assert!(matches!(result, Err(StepkeyError::ChallengeExpired)));

        // The failed attempt still consumed it
        let retry = mgr.consume(&issued.value, later);
        assert!(matches!(retry, Err(StepkeyError::ChallengeAlreadyConsumed)));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let mgr = manager();
        let now = Utc::now();
        let issued = mgr.issue(ChallengePurpose::Registration, None, now);

        // Exactly at expiry the challenge is still valid
        let at_expiry = now + Duration::seconds(300);
        assert!(mgr.consume(&issued.value, at_expiry).is_ok());
    }

    #[test]
    fn test_issue_prunes_expired() {
        let mgr = manager();
        let now = Utc::now();
        let stale = mgr.issue(ChallengePurpose::Registration, None, now);

        let later = now + Duration::seconds(400);
        mgr.issue(ChallengePurpose::Registration, None, later);

        // The stale entry was pruned, so it now reads as unknown
        let result = mgr.consume(&stale.value, later);
        assert!(matches!(result, Err(StepkeyError::ChallengeNotFound)));
        assert_eq!(mgr.pending_count(later), 1);
    }
}
