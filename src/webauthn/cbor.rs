//! CBOR parsing of attestation objects and COSE public keys

use crate::errors::StepkeyError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ciborium::Value as CborValue;

/// Flag bit set when attested credential data is present
const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;

/// Byte offset of the signature counter within authenticator data
const COUNTER_OFFSET: usize = 33;
/// First byte past the fixed rpIdHash/flags/counter prefix
const ATTESTED_DATA_OFFSET: usize = 37;
const AAGUID_LEN: usize = 16;

/// Credential material extracted from an attestation object
#[derive(Debug, Clone)]
pub struct AttestedCredential {
    /// Base64url credential ID
    pub credential_id: String,
    /// COSE public key, CBOR-encoded as received
    pub public_key: Vec<u8>,
    /// Signature counter reported at registration
    pub initial_counter: u32,
}

/// Parse an attestation object and pull out the attested credential
///
/// # Errors
///
/// Returns `AttestationMalformed` when the payload is not valid
/// base64url, not valid CBOR, lacks attested credential data, or
/// carries an unsupported COSE key.
pub fn extract_attested_credential(
    attestation_object_b64: &str,
) -> Result<AttestedCredential, StepkeyError> {
    let attestation_bytes = URL_SAFE_NO_PAD
        .decode(attestation_object_b64)
        .map_err(|_| StepkeyError::AttestationMalformed("invalid base64 encoding".into()))?;

    let attestation: CborValue = ciborium::from_reader(attestation_bytes.as_slice())
        .map_err(|_| StepkeyError::AttestationMalformed("invalid CBOR".into()))?;

    let auth_data = attestation
        .as_map()
        .and_then(|map| {
            map.iter()
                .find(|(k, _)| k.as_text() == Some("authData"))
                .and_then(|(_, v)| v.as_bytes())
        })
        .ok_or_else(|| StepkeyError::AttestationMalformed("missing authData".into()))?;

    parse_authenticator_data(auth_data)
}

/// Walk the binary authenticator data layout:
/// rpIdHash (32) | flags (1) | counter (4 BE) | AAGUID (16) |
/// credential ID length (2 BE) | credential ID | COSE key (CBOR)
fn parse_authenticator_data(auth_data: &[u8]) -> Result<AttestedCredential, StepkeyError> {
    if auth_data.len() < ATTESTED_DATA_OFFSET {
        return Err(StepkeyError::AttestationMalformed(
            "authenticator data too short".into(),
        ));
    }

    let flags = auth_data[32];
    if flags & FLAG_ATTESTED_CREDENTIAL_DATA == 0 {
        return Err(StepkeyError::AttestationMalformed(
            "no attested credential data".into(),
        ));
    }

    let initial_counter = extract_counter(auth_data)?;

    let mut pos = ATTESTED_DATA_OFFSET + AAGUID_LEN;
    if auth_data.len() < pos + 2 {
        return Err(StepkeyError::AttestationMalformed(
            "truncated attested credential data".into(),
        ));
    }
    let id_len = usize::from(u16::from_be_bytes([auth_data[pos], auth_data[pos + 1]]));
    pos += 2;
    if auth_data.len() < pos + id_len {
        return Err(StepkeyError::AttestationMalformed(
            "truncated credential id".into(),
        ));
    }
    let credential_id = URL_SAFE_NO_PAD.encode(&auth_data[pos..pos + id_len]);
    pos += id_len;

    let public_key = auth_data[pos..].to_vec();
    validate_cose_key(&public_key)?;

    Ok(AttestedCredential {
        credential_id,
        public_key,
        initial_counter,
    })
}

/// Read the big-endian signature counter from raw authenticator data
///
/// # Errors
///
/// Returns `AttestationMalformed` when the data is shorter than the
/// fixed prefix.
pub fn extract_counter(auth_data: &[u8]) -> Result<u32, StepkeyError> {
    if auth_data.len() < ATTESTED_DATA_OFFSET {
        return Err(StepkeyError::AttestationMalformed(
            "authenticator data too short".into(),
        ));
    }
    Ok(u32::from_be_bytes([
        auth_data[COUNTER_OFFSET],
        auth_data[COUNTER_OFFSET + 1],
        auth_data[COUNTER_OFFSET + 2],
        auth_data[COUNTER_OFFSET + 3],
    ]))
}

/// Look up an integer-labelled entry in a COSE key map
fn cose_map_get(map: &[(CborValue, CborValue)], label: i64) -> Option<&CborValue> {
    map.iter().find_map(|(k, v)| {
        k.as_integer()
            .and_then(|i| i128::from(i).try_into().ok())
            .filter(|l: &i64| *l == label)
            .map(|_| v)
    })
}

/// Verification-ready key material decoded from a COSE key map
#[derive(Debug, Clone)]
pub enum CosePublicKey {
    /// EC2/ES256 key as an uncompressed SEC1 point (0x04 || x || y)
    Es256 { point: Vec<u8> },
    /// RSA/RS256 key as big-endian modulus and exponent
    Rs256 { n: Vec<u8>, e: Vec<u8> },
}

/// Decode a COSE key into verification-ready material
///
/// Accepted: EC2 (kty 2) with ES256 (alg -7), or RSA (kty 3) with
/// RS256 (alg -257).
///
/// # Errors
///
/// Returns `AttestationMalformed` for invalid CBOR, an unsupported
/// key type or algorithm, or missing key parameters.
pub fn parse_cose_key(cose_key: &[u8]) -> Result<CosePublicKey, StepkeyError> {
    let key: CborValue = ciborium::from_reader(cose_key)
        .map_err(|_| StepkeyError::AttestationMalformed("public key is not valid CBOR".into()))?;
    let map = key
        .as_map()
        .ok_or_else(|| StepkeyError::AttestationMalformed("public key is not a COSE map".into()))?;

    let kty: i64 = cose_map_get(map, 1)
        .and_then(CborValue::as_integer)
        .and_then(|i| i128::from(i).try_into().ok())
        .ok_or_else(|| StepkeyError::AttestationMalformed("COSE key missing kty".into()))?;
    let alg: i64 = cose_map_get(map, 3)
        .and_then(CborValue::as_integer)
        .and_then(|i| i128::from(i).try_into().ok())
        .ok_or_else(|| StepkeyError::AttestationMalformed("COSE key missing alg".into()))?;

    match (kty, alg) {
        (2, -7) => {
            let x = cose_map_get(map, -2).and_then(CborValue::as_bytes);
            let y = cose_map_get(map, -3).and_then(CborValue::as_bytes);
            match (x, y) {
                (Some(x), Some(y)) if x.len() == 32 && y.len() == 32 => {
                    let mut point = Vec::with_capacity(65);
                    point.push(0x04);
                    point.extend_from_slice(x);
                    point.extend_from_slice(y);
                    Ok(CosePublicKey::Es256 { point })
                }
                _ => Err(StepkeyError::AttestationMalformed(
                    "EC2 key missing or malformed coordinates".into(),
                )),
            }
        }
        (3, -257) => {
            let n = cose_map_get(map, -1)
                .and_then(CborValue::as_bytes)
                .ok_or_else(|| {
                    StepkeyError::AttestationMalformed("RSA key missing modulus".into())
                })?;
            let e = cose_map_get(map, -2)
                .and_then(CborValue::as_bytes)
                .ok_or_else(|| {
                    StepkeyError::AttestationMalformed("RSA key missing exponent".into())
                })?;
            Ok(CosePublicKey::Rs256 {
                n: n.clone(),
                e: e.clone(),
            })
        }
        _ => Err(StepkeyError::AttestationMalformed(format!(
            "unsupported COSE key type {kty} with algorithm {alg}"
        ))),
    }
}

/// Check the COSE key is one of the supported shapes
fn validate_cose_key(cose_key: &[u8]) -> Result<(), StepkeyError> {
    parse_cose_key(cose_key).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cose_ec2_key(x: &[u8], y: &[u8]) -> Vec<u8> {
        let key = CborValue::Map(vec![
            (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
            (CborValue::Integer(3.into()), CborValue::Integer((-7).into())),
            (CborValue::Integer((-1).into()), CborValue::Integer(1.into())),
            (CborValue::Integer((-2).into()), CborValue::Bytes(x.to_vec())),
            (CborValue::Integer((-3).into()), CborValue::Bytes(y.to_vec())),
        ]);
        let mut out = Vec::new();
        ciborium::into_writer(&key, &mut out).unwrap();
        out
    }

    fn auth_data_with(flags: u8, counter: u32, cred_id: &[u8], cose_key: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 32];
        data.push(flags);
        data.extend_from_slice(&counter.to_be_bytes());
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(
            &u16::try_from(cred_id.len()).unwrap().to_be_bytes(),
        );
        data.extend_from_slice(cred_id);
        data.extend_from_slice(cose_key);
        data
    }

    #[test]
    fn test_parse_attested_credential() {
        let key = cose_ec2_key(&[1u8; 32], &[2u8; 32]);
        let auth_data = auth_data_with(0x45, 7, b"credential-id-bytes", &key);
        let parsed = parse_authenticator_data(&auth_data).unwrap();

        assert_eq!(parsed.initial_counter, 7);
        assert_eq!(
            parsed.credential_id,
            URL_SAFE_NO_PAD.encode(b"credential-id-bytes")
        );
        assert_eq!(parsed.public_key, key);
    }

    #[test]
    fn test_missing_at_flag() {
        let key = cose_ec2_key(&[1u8; 32], &[2u8; 32]);
        let auth_data = auth_data_with(0x05, 0, b"id", &key);
        let result = parse_authenticator_data(&auth_data);
        assert!(matches!(result, Err(StepkeyError::AttestationMalformed(_))));
    }

    #[test]
    fn test_extract_counter() {
        let key = cose_ec2_key(&[1u8; 32], &[2u8; 32]);
        let auth_data = auth_data_with(0x45, 0x0102_0304, b"id", &key);
        assert_eq!(extract_counter(&auth_data).unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_counter_too_short() {
        assert!(extract_counter(&[0u8; 36]).is_err());
    }

    #[test]
    fn test_parse_es256_key_builds_uncompressed_point() {
        let key = cose_ec2_key(&[0xAA; 32], &[0xBB; 32]);
        let CosePublicKey::Es256 { point } = parse_cose_key(&key).unwrap() else {
            panic!("expected an ES256 key");
        };
        assert_eq!(point.len(), 65);
        assert_eq!(point[0], 0x04);
        assert_eq!(&point[1..33], &[0xAA; 32]);
        assert_eq!(&point[33..], &[0xBB; 32]);
    }

    #[test]
    fn test_parse_rs256_key_carries_components() {
        let key = CborValue::Map(vec![
            (CborValue::Integer(1.into()), CborValue::Integer(3.into())),
            (
                CborValue::Integer(3.into()),
                CborValue::Integer((-257).into()),
            ),
            (
                CborValue::Integer((-1).into()),
                CborValue::Bytes(vec![0x7F; 256]),
            ),
            (
                CborValue::Integer((-2).into()),
                CborValue::Bytes(vec![0x01, 0x00, 0x01]),
            ),
        ]);
        let mut out = Vec::new();
        ciborium::into_writer(&key, &mut out).unwrap();

        let CosePublicKey::Rs256 { n, e } = parse_cose_key(&out).unwrap() else {
            panic!("expected an RS256 key");
        };
        assert_eq!(n.len(), 256);
        assert_eq!(e, vec![0x01, 0x00, 0x01]);
    }

    #[test]
    fn test_rejects_unsupported_key_type() {
        // OKP key (kty 1) with EdDSA (alg -8)
        let key = CborValue::Map(vec![
            (CborValue::Integer(1.into()), CborValue::Integer(1.into())),
            (CborValue::Integer(3.into()), CborValue::Integer((-8).into())),
        ]);
        let mut out = Vec::new();
        ciborium::into_writer(&key, &mut out).unwrap();
        assert!(matches!(
            validate_cose_key(&out),
            Err(StepkeyError::AttestationMalformed(_))
        ));
    }

    #[test]
    fn test_rejects_short_coordinates() {
        let key = cose_ec2_key(&[1u8; 16], &[2u8; 32]);
        assert!(validate_cose_key(&key).is_err());
    }

    #[test]
    fn test_malformed_base64() {
        let result = extract_attested_credential("***not base64***");
        assert!(matches!(result, Err(StepkeyError::AttestationMalformed(_))));
    }
}
