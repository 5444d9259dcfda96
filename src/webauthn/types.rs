use serde::{Deserialize, Serialize};

/// Registration ceremony response from the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    /// Base64url credential ID chosen by the authenticator
    pub credential_id: String,
    /// Base64url-encoded client data JSON
    pub client_data_json: String,
    /// Base64url-encoded CBOR attestation object
    pub attestation_object: String,
}

/// Authentication ceremony response from the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    /// Base64url credential ID of the credential used
    pub credential_id: String,
    /// Base64url-encoded client data JSON
    pub client_data_json: String,
    /// Base64url-encoded raw authenticator data
    pub authenticator_data: String,
    /// Base64url-encoded signature over authenticator data and
    /// the client data hash
    pub signature: String,
    /// Base64url user handle, when the authenticator supplies one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

/// The fields of client data JSON this subsystem checks
#[derive(Debug, Clone, Deserialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub type_: String,
    pub challenge: String,
    pub origin: String,
}
