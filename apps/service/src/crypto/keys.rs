use anyhow::{Context, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::Path;

/// Ed25519 key the caller signs probe tokens with.
#[derive(Clone)]
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl KeyPair {
    pub fn new(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self { signing_key, verifying_key }
    }

    /// Hex public key, published as the token `kid`.
    pub fn key_id(&self) -> String {
        hex::encode(self.verifying_key.to_bytes())
    }
}

pub fn generate_keypair() -> KeyPair {
    let mut secret = [0u8; 32];
    rand::RngCore::fill_bytes(&mut OsRng, &mut secret);
    KeyPair::new(SigningKey::from_bytes(&secret))
}

/// The secret is stored hex-encoded on a single line.
pub fn save_keypair(keypair: &KeyPair, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, hex::encode(keypair.signing_key.to_bytes()))
        .with_context(|| format!("Failed to write signing key to {}", path.display()))?;

    tracing::info!(key_id = %keypair.key_id(), "Saved signing key to: {}", path.display());
    Ok(())
}

pub fn load_keypair(path: &Path) -> Result<KeyPair> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read signing key {}", path.display()))?;
    let secret = hex::decode(raw.trim()).context("Signing key file is not hex")?;

    let bytes: [u8; 32] = secret
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("Invalid signing key: expected 32 bytes, got {}", secret.len()))?;

    Ok(KeyPair::new(SigningKey::from_bytes(&bytes)))
}

pub fn load_or_generate_keypair(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        tracing::info!("Loading signing key from: {}", path.display());
        load_keypair(path)
    } else {
        tracing::info!("Generating new signing key at: {}", path.display());
        let keypair = generate_keypair();
        save_keypair(&keypair, path)?;
        Ok(keypair)
    }
}
