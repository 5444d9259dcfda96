//! Credential storage
//!
//! Credentials are keyed by their base64url credential ID with a
//! secondary per-owner index. `BTreeMap` keeps listing order stable
//! across restarts, which matters for management UIs and for audit
//! reproducibility.

use crate::directory::UserDirectory;
use crate::errors::StepkeyError;
use crate::models::Credential;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

struct CredentialTables {
    by_id: BTreeMap<String, Credential>,
    by_owner: BTreeMap<String, BTreeSet<String>>,
}

pub struct CredentialStore {
    tables: RwLock<CredentialTables>,
    directory: Arc<dyn UserDirectory>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            tables: RwLock::new(CredentialTables {
                by_id: BTreeMap::new(),
                by_owner: BTreeMap::new(),
            }),
            directory,
        }
    }

    /// Store a newly registered credential
    ///
    /// # Errors
    ///
    /// Returns `DuplicateCredential` if a credential with the same ID
    /// already exists, regardless of owner.
    pub fn add(&self, credential: Credential) -> Result<(), StepkeyError> {
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if tables.by_id.contains_key(&credential.credential_id) {
            return Err(StepkeyError::DuplicateCredential);
        }

        tables
            .by_owner
            .entry(credential.owner_id.clone())
            .or_default()
            .insert(credential.credential_id.clone());
        tables
            .by_id
            .insert(credential.credential_id.clone(), credential);
        Ok(())
    }

    /// Fetch a credential by ID
    ///
    /// # Errors
    ///
    /// Returns `CredentialNotFound` if the ID is unknown
    pub fn get(&self, credential_id: &str) -> Result<Credential, StepkeyError> {
        let tables = self
            .tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables
            .by_id
            .get(credential_id)
            .cloned()
            .ok_or(StepkeyError::CredentialNotFound)
    }

    /// All credentials for an account, in stable ID order
    #[must_use]
    pub fn list(&self, owner_id: &str) -> Vec<Credential> {
        let tables = self
            .tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables
            .by_owner
            .get(owner_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of credentials registered to an account
    #[must_use]
    pub fn count(&self, owner_id: &str) -> usize {
        let tables = self
            .tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables.by_owner.get(owner_id).map_or(0, BTreeSet::len)
    }

    /// Change a credential's human-readable label
    ///
    /// # Errors
    ///
    /// Returns `CredentialNotFound` if the ID is unknown
    pub fn rename(&self, credential_id: &str, label: &str) -> Result<(), StepkeyError> {
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let credential = tables
            .by_id
            .get_mut(credential_id)
            .ok_or(StepkeyError::CredentialNotFound)?;
        credential.device_label = Some(label.to_string());
        Ok(())
    }

    /// Record a successful authentication with a strictly increasing counter
    ///
    /// The regression check runs under the write lock, so two racing
    /// authentications with the same counter resolve to exactly one
    /// success.
    ///
    /// # Errors
    ///
    /// - `CredentialNotFound` if the ID is unknown
    /// - `CounterRegression` if `new_counter` does not exceed the stored value
    pub fn update_usage(
        &self,
        credential_id: &str,
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), StepkeyError> {
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let credential = tables
            .by_id
            .get_mut(credential_id)
            .ok_or(StepkeyError::CredentialNotFound)?;

        if new_counter <= credential.signature_counter {
            return Err(StepkeyError::CounterRegression);
        }

        credential.signature_counter = new_counter;
        credential.last_used_at = Some(used_at);
        Ok(())
    }

    /// Record a successful authentication without touching the counter
    ///
    /// Used for counter-exempt credentials whose authenticator always
    /// reports zero.
    ///
    /// # Errors
    ///
    /// Returns `CredentialNotFound` if the ID is unknown
    pub fn record_use(
        &self,
        credential_id: &str,
        used_at: DateTime<Utc>,
    ) -> Result<(), StepkeyError> {
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let credential = tables
            .by_id
            .get_mut(credential_id)
            .ok_or(StepkeyError::CredentialNotFound)?;
        credential.last_used_at = Some(used_at);
        Ok(())
    }

    /// Delete a credential, refusing to lock the account out
    ///
    /// # Errors
    ///
    /// - `CredentialNotFound` if the ID is unknown
    /// - `LastMethodViolation` if this is the account's only credential
    ///   and the directory reports no fallback sign-in method
    pub fn delete(&self, credential_id: &str) -> Result<Credential, StepkeyError> {
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let owner_id = tables
            .by_id
            .get(credential_id)
            .map(|c| c.owner_id.clone())
            .ok_or(StepkeyError::CredentialNotFound)?;

        let remaining = tables.by_owner.get(&owner_id).map_or(0, BTreeSet::len);
        if remaining <= 1 && !self.directory.has_fallback_method(&owner_id) {
            return Err(StepkeyError::LastMethodViolation);
        }

        let credential = tables
            .by_id
            .remove(credential_id)
            .ok_or(StepkeyError::CredentialNotFound)?;
        if let Some(ids) = tables.by_owner.get_mut(&owner_id) {
            ids.remove(credential_id);
            if ids.is_empty() {
                tables.by_owner.remove(&owner_id);
            }
        }
        Ok(credential)
    }
}
