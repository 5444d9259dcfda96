//! User directory abstraction
//!
//! Credential deletion and policy evaluation need facts that live
//! outside this subsystem: whether an account has another way to sign
//! in, and which roles it holds. The host application supplies them
//! through this trait.

use std::collections::HashMap;
use std::sync::RwLock;

/// Account facts provided by the host application
pub trait UserDirectory: Send + Sync {
    /// Whether the account can still authenticate without passkeys
    /// (e.g. a password or a recovery flow)
    fn has_fallback_method(&self, owner_id: &str) -> bool;

    /// Roles granted to the account, for policy role matching
    fn roles(&self, owner_id: &str) -> Vec<String>;
}

/// In-memory directory backed by explicit per-account entries
///
/// Accounts without an entry are assumed to have a fallback method and
/// no roles. Suitable for small deployments and as a default wiring.
#[derive(Default)]
pub struct StaticDirectory {
    entries: RwLock<HashMap<String, DirectoryEntry>>,
}

#[derive(Debug, Clone)]
struct DirectoryEntry {
    has_fallback: bool,
    roles: Vec<String>,
}

impl StaticDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&self, owner_id: &str, has_fallback: bool, roles: Vec<String>) {
        let mut entries = self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(
            owner_id.to_string(),
            DirectoryEntry {
                has_fallback,
                roles,
            },
        );
    }
}

impl UserDirectory for StaticDirectory {
    fn has_fallback_method(&self, owner_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.get(owner_id).map_or(true, |e| e.has_fallback)
    }

    fn roles(&self, owner_id: &str) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.get(owner_id).map(|e| e.roles.clone()).unwrap_or_default()
    }
}
