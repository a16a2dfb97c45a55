//! Public-key identity and PIN validation (spec §4.2).

use base64::{engine::general_purpose::STANDARD, Engine as _};
pub use ed25519_dalek::PublicKey;
use ed25519_dalek::{Signature, Verifier};

use crate::error::HandlerError;

/// Parse and validate a base64-encoded 32-byte Ed25519 public key.
///
/// This is deliberately string-in, string-out at the call sites: the server
/// treats `public_key` as an opaque identity string everywhere except here,
/// where it is decoded just far enough to prove it names a real Ed25519 key.
pub fn parse_public_key(encoded: &str) -> Result<PublicKey, HandlerError> {
    if encoded.is_empty() {
        return Err(HandlerError::Validation("public_key is required".into()));
    }
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| HandlerError::Validation("public_key is not valid base64".into()))?;
    PublicKey::from_bytes(&bytes)
        .map_err(|_| HandlerError::Validation("public_key is not a valid Ed25519 key".into()))
}

/// Validate that a string is a well-formed public key without needing the parsed value.
pub fn validate_public_key(encoded: &str) -> Result<(), HandlerError> {
    parse_public_key(encoded).map(|_| ())
}

/// Verify a base64-encoded Ed25519 signature over `message`, proving possession
/// of the private key matching `public_key`. Used for owner-privileged
/// operations when `REQUIRE_SIGNATURES` is enabled (see SPEC_FULL.md §4.2, §9).
pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), HandlerError> {
    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|_| HandlerError::Auth("signature is not valid base64".into()))?;
    let signature = Signature::from_bytes(&sig_bytes)
        .map_err(|_| HandlerError::Auth("malformed signature".into()))?;
    public_key
        .verify(message, &signature)
        .map_err(|_| HandlerError::Auth("signature verification failed".into()))
}

/// Validate a PIN: exactly 4 decimal digits.
pub fn validate_pin(pin: &str) -> Result<(), HandlerError> {
    if pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(HandlerError::Validation(
            "pin must be exactly 4 decimal digits".into(),
        ))
    }
}
