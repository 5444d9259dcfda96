//! WebAuthn ceremony verification
//!
//! Parsing of attestation and assertion payloads plus cryptographic
//! checks. Policy decisions (elevation, audit) live elsewhere; this
//! module answers only "is this response genuine and bound to the
//! challenge we issued".

mod cbor;
mod service;
mod types;

pub use cbor::AttestedCredential;
pub use service::{AuthenticationResult, Verifier};
pub use types::{Assertion, Attestation, ClientData};
