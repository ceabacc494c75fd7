use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

pub fn parse_public_key_hex(public_key_hex: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(public_key_hex.trim()).context("failed to decode catalog public key hex")?;
    let len = bytes.len();
    let array: [u8; 32] = bytes.try_into().map_err(|_| {
        anyhow!("invalid catalog public key length: expected 32 bytes, got {len}")
    })?;
    VerifyingKey::from_bytes(&array).context("invalid catalog public key bytes")
}

/// Checks a detached Ed25519 signature over the raw catalog payload bytes.
pub fn verify_catalog_signature(
    payload: &[u8],
    public_key: &VerifyingKey,
    signature_hex: &str,
) -> Result<bool> {
    let bytes = hex::decode(signature_hex.trim()).context("failed to decode catalog signature hex")?;
    let len = bytes.len();
    let array: [u8; 64] = bytes
        .try_into()
        .map_err(|_| anyhow!("invalid catalog signature length: expected 64 bytes, got {len}"))?;
    let signature = Signature::from_bytes(&array);

    Ok(public_key.verify(payload, &signature).is_ok())
}
