//! Peer identity derivation.
//!
//! A hoster is addressed by `did:sight:hoster:<base58btc(0xED 0x01 ‖ pubkey)>`,
//! i.e. the ed25519-pub multicodec prefix followed by the raw 32-byte public key.
//! The relay node is addressed by the fixed literal `gateway`.

use anyhow::{anyhow, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const DID_PREFIX: &str = "did:sight:hoster:";
pub const GATEWAY_ID: &str = "gateway";

/// Multicodec varint for `ed25519-pub`.
const ED25519_MULTICODEC: [u8; 2] = [0xED, 0x01];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self::from_public_key_bytes(key.as_bytes())
    }

    pub fn from_public_key_bytes(public_key: &[u8; 32]) -> Self {
        let mut buf = Vec::with_capacity(ED25519_MULTICODEC.len() + public_key.len());
        buf.extend_from_slice(&ED25519_MULTICODEC);
        buf.extend_from_slice(public_key);
        PeerIdentity(format!("{}{}", DID_PREFIX, bs58::encode(buf).into_string()))
    }

    pub fn gateway() -> Self {
        PeerIdentity(GATEWAY_ID.to_string())
    }

    pub fn is_gateway(&self) -> bool {
        self.0 == GATEWAY_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the raw public key from a hoster DID.
    pub fn public_key_bytes(&self) -> Result<[u8; 32]> {
        let encoded = self
            .0
            .strip_prefix(DID_PREFIX)
            .ok_or_else(|| anyhow!("Not a hoster DID: {}", self.0))?;
        let decoded = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| anyhow!("Invalid base58 in DID: {}", e))?;
        if decoded.len() != 34 || decoded[..2] != ED25519_MULTICODEC {
            return Err(anyhow!("DID does not carry an ed25519 multicodec key"));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded[2..]);
        Ok(key)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerIdentity {
    fn from(value: &str) -> Self {
        PeerIdentity(value.to_string())
    }
}

/// Source of the node's long-term key pair. Keys are provisioned elsewhere;
/// this crate only reads them.
pub trait KeyProvider: Send + Sync {
    fn signing_key(&self) -> Result<SigningKey>;
}

/// Reads a hex-encoded 32-byte ed25519 secret key from disk.
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KeyProvider for FileKeyProvider {
    fn signing_key(&self) -> Result<SigningKey> {
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| anyhow!("Failed to read node key {:?}: {}", self.path, e))?;
        let secret_bytes = hex::decode(contents.trim())
            .map_err(|e| anyhow!("Failed to decode node key: {}", e))?;

        let secret: [u8; 32] = secret_bytes.as_slice().try_into().map_err(|_| {
            anyhow!(
                "Invalid node key length: expected 32 bytes, got {}",
                secret_bytes.len()
            )
        })?;

        Ok(SigningKey::from_bytes(&secret))
    }
}
