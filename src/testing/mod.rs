//! Test utilities
//!
//! Available to integration tests and downstream test suites through
//! the `testing` feature. Nothing here is meant for production use.

mod authenticator;
mod mock;

pub use authenticator::SoftAuthenticator;
pub use mock::{FailingAuditStore, MockDirectory};

use crate::settings::StepkeySettings;

/// Settings wired for tests: localhost relying party, short windows
#[must_use]
pub fn test_settings() -> StepkeySettings {
    let mut settings = StepkeySettings::default();
    settings.webauthn.rp_id = "localhost".to_string();
    settings.webauthn.rp_origin = "http://localhost:8080".to_string();
    settings
}
