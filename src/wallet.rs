//! Signer key decoding.

use anyhow::{bail, Context, Result};
use solana_sdk::signature::Keypair;

/// Decode a base58-encoded 64-byte keypair as exported by common
/// wallet tooling.
pub fn keypair_from_base58(encoded: &str) -> Result<Keypair> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .context("private key is not valid base58")?;

    if bytes.len() != 64 {
        bail!("invalid key length: expected 64 bytes, got {}", bytes.len());
    }

    Keypair::try_from(&bytes[..]).context("key bytes do not form a valid ed25519 keypair")
}
