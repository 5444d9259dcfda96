//! Step-up passkey authentication
//!
//! A self-contained subsystem for elevating already-authenticated
//! sessions with a WebAuthn ceremony: credential storage, one-time
//! challenges, attestation and assertion verification, a timed
//! elevation window, resource policies, and an append-only audit
//! trail. The host application integrates through
//! [`adapter::AuthenticationAdapter`] and supplies account facts via
//! [`directory::UserDirectory`].

#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod adapter;
pub mod audit;
pub mod challenges;
pub mod credentials;
pub mod directory;
pub mod elevation;
pub mod errors;
pub mod models;
pub mod policy;
pub mod settings;
pub mod webauthn;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{
    AuthenticationAdapter, AuthenticationOutcome, CeremonyOptions, ElevationStatus, RequestContext,
};
pub use errors::StepkeyError;
pub use settings::StepkeySettings;

/// Crate version, for diagnostics
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
