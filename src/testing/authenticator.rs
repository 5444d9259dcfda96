//! Software authenticator
//!
//! Produces real signed ceremony responses so verification paths can
//! be exercised end to end without hardware. ES256 devices get a fresh
//! P-256 key pair; RS256 devices use a fixed 2048-bit key, since RSA
//! key generation is outside ring's scope.

use crate::webauthn::{Assertion, Attestation};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ciborium::Value as CborValue;
use rand::RngCore;
use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, RsaKeyPair, RsaPublicKeyComponents, ECDSA_P256_SHA256_ASN1_SIGNING,
    RSA_PKCS1_SHA256,
};
use serde_json::json;

/// 2048-bit PKCS#8 key used by every RS256 soft authenticator
static RS256_TEST_KEY: &[u8] = include_bytes!("rs256_test_key.der");

enum DeviceKey {
    Es256(EcdsaKeyPair),
    Rs256(RsaKeyPair),
}

pub struct SoftAuthenticator {
    rp_id: String,
    origin: String,
    credential_id: Vec<u8>,
    key: DeviceKey,
    rng: SystemRandom,
}

impl SoftAuthenticator {
    /// Create an ES256 authenticator with a fresh P-256 key pair
    ///
    /// # Panics
    ///
    /// Panics if key generation fails, which only happens when the
    /// system randomness source is broken.
    #[must_use]
    pub fn new(rp_id: &str, origin: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .expect("key generation");
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
                .expect("key parsing");
        Self::with_key(rp_id, origin, DeviceKey::Es256(key_pair), rng)
    }

    /// Create an RS256 authenticator with the built-in test key
    ///
    /// # Panics
    ///
    /// Panics if the embedded key fails to parse.
    #[must_use]
    pub fn new_rs256(rp_id: &str, origin: &str) -> Self {
        let key_pair = RsaKeyPair::from_pkcs8(RS256_TEST_KEY).expect("key parsing");
        Self::with_key(rp_id, origin, DeviceKey::Rs256(key_pair), SystemRandom::new())
    }

    fn with_key(rp_id: &str, origin: &str, key: DeviceKey, rng: SystemRandom) -> Self {
        let mut credential_id = vec![0u8; 16];
        rand::rng().fill_bytes(&mut credential_id);

        Self {
            rp_id: rp_id.to_string(),
            origin: origin.to_string(),
            credential_id,
            key,
            rng,
        }
    }

    #[must_use]
    pub fn credential_id(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.credential_id)
    }

    /// COSE key map for the authenticator's public key
    fn cose_public_key(&self) -> Vec<u8> {
        let key = match &self.key {
            DeviceKey::Es256(key_pair) => {
                // x and y from the uncompressed SEC1 point
                let point = key_pair.public_key().as_ref();
                let x = point[1..33].to_vec();
                let y = point[33..65].to_vec();
                CborValue::Map(vec![
                    (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
                    (CborValue::Integer(3.into()), CborValue::Integer((-7).into())),
                    (CborValue::Integer((-1).into()), CborValue::Integer(1.into())),
                    (CborValue::Integer((-2).into()), CborValue::Bytes(x)),
                    (CborValue::Integer((-3).into()), CborValue::Bytes(y)),
                ])
            }
            DeviceKey::Rs256(key_pair) => {
                let components: RsaPublicKeyComponents<Vec<u8>> = key_pair.public().into();
                CborValue::Map(vec![
                    (CborValue::Integer(1.into()), CborValue::Integer(3.into())),
                    (
                        CborValue::Integer(3.into()),
                        CborValue::Integer((-257).into()),
                    ),
                    (
                        CborValue::Integer((-1).into()),
                        CborValue::Bytes(components.n),
                    ),
                    (
                        CborValue::Integer((-2).into()),
                        CborValue::Bytes(components.e),
                    ),
                ])
            }
        };
        let mut out = Vec::new();
        ciborium::into_writer(&key, &mut out).expect("CBOR encoding");
        out
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.key {
            DeviceKey::Es256(key_pair) => key_pair
                .sign(&self.rng, message)
                .expect("signing")
                .as_ref()
                .to_vec(),
            DeviceKey::Rs256(key_pair) => {
                let mut signature = vec![0u8; key_pair.public().modulus_len()];
                key_pair
                    .sign(&RSA_PKCS1_SHA256, &self.rng, message, &mut signature)
                    .expect("signing");
                signature
            }
        }
    }

    fn rp_id_hash(&self) -> Vec<u8> {
        digest::digest(&digest::SHA256, self.rp_id.as_bytes())
            .as_ref()
            .to_vec()
    }

    fn client_data(&self, type_: &str, challenge: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": type_,
            "challenge": challenge,
            "origin": self.origin,
        }))
        .expect("client data JSON")
    }

    /// Produce a registration ceremony response for a challenge
    #[must_use]
    pub fn attestation(&self, challenge: &str, initial_counter: u32) -> Attestation {
        let mut auth_data = self.rp_id_hash();
        auth_data.push(0x45); // UP | UV | AT
        auth_data.extend_from_slice(&initial_counter.to_be_bytes());
        auth_data.extend_from_slice(&[0u8; 16]);
        auth_data.extend_from_slice(
            &u16::try_from(self.credential_id.len())
                .expect("credential id length")
                .to_be_bytes(),
        );
        auth_data.extend_from_slice(&self.credential_id);
        auth_data.extend_from_slice(&self.cose_public_key());

        let attestation_object = CborValue::Map(vec![
            (
                CborValue::Text("fmt".to_string()),
                CborValue::Text("none".to_string()),
            ),
            (
                CborValue::Text("attStmt".to_string()),
                CborValue::Map(vec![]),
            ),
            (
                CborValue::Text("authData".to_string()),
                CborValue::Bytes(auth_data),
            ),
        ]);
        let mut object_bytes = Vec::new();
        ciborium::into_writer(&attestation_object, &mut object_bytes).expect("CBOR encoding");

        Attestation {
            credential_id: self.credential_id(),
            client_data_json: URL_SAFE_NO_PAD
                .encode(self.client_data("webauthn.create", challenge)),
            attestation_object: URL_SAFE_NO_PAD.encode(object_bytes),
        }
    }

    /// Produce an authentication ceremony response for a challenge,
    /// reporting the given signature counter
    #[must_use]
    pub fn assertion(&self, challenge: &str, counter: u32) -> Assertion {
        let mut auth_data = self.rp_id_hash();
        auth_data.push(0x05); // UP | UV
        auth_data.extend_from_slice(&counter.to_be_bytes());

        let client_data = self.client_data("webauthn.get", challenge);
        let client_data_hash = digest::digest(&digest::SHA256, &client_data);

        let mut signed = auth_data.clone();
        signed.extend_from_slice(client_data_hash.as_ref());
        let signature = self.sign(&signed);

        Assertion {
            credential_id: self.credential_id(),
            client_data_json: URL_SAFE_NO_PAD.encode(client_data),
            authenticator_data: URL_SAFE_NO_PAD.encode(auth_data),
            signature: URL_SAFE_NO_PAD.encode(signature),
            user_handle: None,
        }
    }
}
