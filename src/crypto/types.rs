//! Key material and signature types.

use super::traits::{CryptoError, CryptoResult};
use frost_ed25519 as frost;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One participant's secret share, as stored on disk.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyShare {
    pub participant_id: String,
    pub threshold: u16,
    pub key_package: frost::keys::KeyPackage,
}

impl KeyShare {
    pub fn identifier(&self) -> frost::Identifier {
        *self.key_package.identifier()
    }

    /// Threshold baked into the key package at generation time.
    pub fn min_signers(&self) -> u16 {
        *self.key_package.min_signers()
    }
}

// Never print secret material.
impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("participant_id", &self.participant_id)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Group public key package (verifying key plus per-share verifying shares).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey {
    package: frost::keys::PublicKeyPackage,
}

impl GroupKey {
    pub fn new(package: frost::keys::PublicKeyPackage) -> Self {
        Self { package }
    }

    pub fn package(&self) -> &frost::keys::PublicKeyPackage {
        &self.package
    }

    pub fn verifying_key(&self) -> GroupVerifyingKey {
        GroupVerifyingKey(*self.package.verifying_key())
    }
}

/// The group's single verifying key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupVerifyingKey(frost::VerifyingKey);

impl GroupVerifyingKey {
    pub fn inner(&self) -> &frost::VerifyingKey {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.serialize())
    }

    pub fn from_hex(input: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(input.trim()).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::Encoding("verifying key must be 32 bytes".to_string()))?;
        frost::VerifyingKey::deserialize(bytes)
            .map(Self)
            .map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

/// Opaque aggregate signature bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSignature(pub Vec<u8>);

impl AggregateSignature {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(input: &str) -> CryptoResult<Self> {
        hex::decode(input.trim())
            .map(Self)
            .map_err(|e| CryptoError::Encoding(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for AggregateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Output of trusted-dealer key generation.
#[derive(Debug, Clone)]
pub struct GeneratedKeys {
    pub group_key: GroupKey,
    pub shares: Vec<KeyShare>,
}
