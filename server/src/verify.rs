//! Ed25519 verification of inbound interaction webhooks.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::error;

use crate::error::ApiError;

pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

/// Checks `signature` over `timestamp || body` against the application key.
///
/// Built from configuration once. A missing or malformed key produces a
/// verifier that rejects everything.
#[derive(Clone, Debug)]
pub struct RequestVerifier {
    key: Option<VerifyingKey>,
}

impl RequestVerifier {
    pub fn from_hex(public_key: Option<&str>) -> Self {
        let key = match public_key {
            None => {
                error!("DISCORD_PUBLIC_KEY is not set, all interactions will be rejected");
                None
            }
            Some(hex_key) => match parse_key(hex_key) {
                Ok(key) => Some(key),
                Err(reason) => {
                    error!("DISCORD_PUBLIC_KEY is invalid ({reason}), all interactions will be rejected");
                    None
                }
            },
        };
        Self { key }
    }

    pub fn new(key: VerifyingKey) -> Self {
        Self { key: Some(key) }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), ApiError> {
        let key = self.key.as_ref().ok_or(ApiError::SignatureInvalid)?;
        let timestamp = timestamp.ok_or(ApiError::SignatureInvalid)?;
        let signature = signature
            .and_then(|s| hex::decode(s.trim()).ok())
            .and_then(|bytes| Signature::from_slice(&bytes).ok())
            .ok_or(ApiError::SignatureInvalid)?;

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);

        key.verify(&message, &signature)
            .map_err(|_| ApiError::SignatureInvalid)
    }
}

fn parse_key(hex_key: &str) -> Result<VerifyingKey, String> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| format!("not hex: {e}"))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| format!("not a valid point: {e}"))
}
