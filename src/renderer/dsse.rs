//! DSSE envelopes and Ed25519 signing
//!
//! Signatures cover the pre-authentication encoding
//! `DSSEv1 <len(type)> <type> <len(payload)> <payload>`, never the raw payload.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature as Ed25519Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::RenderError;

/// Payload type of an in-toto statement
pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// Pre-authentication encoding
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    )
    .into_bytes();
    out.extend_from_slice(payload);
    out
}

/// One signature over the envelope's PAE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keyid: String,
    /// Base64 signature bytes
    pub sig: String,
}

/// Dead Simple Signing Envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Base64 payload
    pub payload: String,
    pub payload_type: String,
    pub signatures: Vec<EnvelopeSignature>,
}

impl Envelope {
    /// Parse and check the envelope carries something signed
    pub fn from_json(bytes: &[u8]) -> Result<Self, RenderError> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        if envelope.payload_type.is_empty() {
            return Err(RenderError::InvalidEnvelope("empty payloadType".into()));
        }
        if envelope.payload.is_empty() {
            return Err(RenderError::InvalidEnvelope("empty payload".into()));
        }
        if envelope.signatures.is_empty() {
            return Err(RenderError::InvalidEnvelope("no signatures".into()));
        }
        Ok(envelope)
    }

    pub fn decode_payload(&self) -> Result<Vec<u8>, RenderError> {
        Ok(STANDARD.decode(&self.payload)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Black-box signing backend
pub trait Signer {
    /// Identifier recorded next to each signature; may be empty
    fn key_id(&self) -> String;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, RenderError>;
}

/// Wrap `payload` and sign its PAE
pub fn sign_envelope(
    payload_type: &str,
    payload: &[u8],
    signer: &dyn Signer,
) -> Result<Envelope, RenderError> {
    let sig = signer.sign(&pae(payload_type, payload))?;
    Ok(Envelope {
        payload: STANDARD.encode(payload),
        payload_type: payload_type.to_string(),
        signatures: vec![EnvelopeSignature {
            keyid: signer.key_id(),
            sig: STANDARD.encode(sig),
        }],
    })
}

/// SHA-256 fingerprint of an Ed25519 public key, hex-encoded
pub fn key_fingerprint(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// In-process Ed25519 signer
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::thread_rng()))
    }

    /// Load a 32-byte seed stored as base64 or hex text
    pub fn from_seed_file(path: &Path) -> Result<Self, RenderError> {
        let text = fs::read_to_string(path)?;
        Self::from_encoded_seed(text.trim())
    }

    pub fn from_encoded_seed(encoded: &str) -> Result<Self, RenderError> {
        let bytes = match hex::decode(encoded) {
            Ok(bytes) => bytes,
            Err(_) => STANDARD.decode(encoded)?,
        };
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| RenderError::InvalidKey("seed must be 32 bytes".into()))?;
        Ok(Self::new(SigningKey::from_bytes(&seed)))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn encoded_seed(&self) -> String {
        STANDARD.encode(self.key.to_bytes())
    }
}

impl Signer for Ed25519Signer {
    fn key_id(&self) -> String {
        key_fingerprint(&self.key.verifying_key())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, RenderError> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

/// Check at least one signature verifies under `key`, returning the payload
pub fn verify_envelope(envelope: &Envelope, key: &VerifyingKey) -> Result<Vec<u8>, RenderError> {
    let payload = envelope.decode_payload()?;
    let message = pae(&envelope.payload_type, &payload);

    for signature in &envelope.signatures {
        let Ok(bytes) = STANDARD.decode(&signature.sig) else {
            continue;
        };
        let Ok(sig) = Ed25519Signature::from_slice(&bytes) else {
            continue;
        };
        if key.verify(&message, &sig).is_ok() {
            return Ok(payload);
        }
    }
    Err(RenderError::SignatureMismatch)
}
