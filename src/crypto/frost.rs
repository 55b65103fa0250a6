//! FROST (Ed25519) implementation of [`ThresholdScheme`].
//!
//! Keys are dealt by a trusted dealer. Signing runs both FROST rounds
//! locally over the supplied shares, which is how a single aggregator holding
//! the contributing participants' shares produces the group signature.

use super::traits::{CryptoError, CryptoResult, ThresholdScheme};
use super::types::{AggregateSignature, GeneratedKeys, GroupKey, GroupVerifyingKey, KeyShare};
use frost_ed25519 as frost;
use std::collections::BTreeMap;
use tracing::debug;

/// Smallest threshold FROST accepts.
pub const MIN_THRESHOLD: u16 = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct FrostScheme;

impl FrostScheme {
    pub fn new() -> Self {
        Self
    }
}

fn validate_parameters(n: u16, t: u16) -> CryptoResult<()> {
    let invalid = |reason: &str| CryptoError::InvalidThreshold {
        n,
        t,
        reason: reason.to_string(),
    };
    if t < MIN_THRESHOLD {
        return Err(invalid("threshold must be at least 2"));
    }
    if t > n {
        return Err(invalid("threshold cannot exceed participant count"));
    }
    Ok(())
}

impl ThresholdScheme for FrostScheme {
    fn generate_keys(&self, n: u16, t: u16) -> CryptoResult<GeneratedKeys> {
        validate_parameters(n, t)?;

        let mut rng = rand::thread_rng();
        let (secret_shares, public_package) =
            frost::keys::generate_with_dealer(n, t, frost::keys::IdentifierList::Default, &mut rng)
                .map_err(|e| CryptoError::Primitive(e.to_string()))?;

        // Default identifiers are 1..=n in order.
        let shares = secret_shares
            .into_values()
            .enumerate()
            .map(|(index, secret_share)| {
                let key_package = frost::keys::KeyPackage::try_from(secret_share)
                    .map_err(|e| CryptoError::Primitive(e.to_string()))?;
                Ok(KeyShare {
                    participant_id: (index + 1).to_string(),
                    threshold: t,
                    key_package,
                })
            })
            .collect::<CryptoResult<Vec<_>>>()?;

        debug!(n, t, "Dealt threshold key shares");
        Ok(GeneratedKeys {
            group_key: GroupKey::new(public_package),
            shares,
        })
    }

    fn sign(
        &self,
        message: &[u8],
        shares: &[KeyShare],
        threshold: u16,
        group: &GroupKey,
    ) -> CryptoResult<AggregateSignature> {
        for share in shares {
            if share.min_signers() != threshold {
                return Err(CryptoError::ThresholdMismatch {
                    participant: share.participant_id.clone(),
                    share_threshold: share.min_signers(),
                    requested: threshold,
                });
            }
        }

        // Round 1: commitments, one per distinct signer.
        let mut rng = rand::thread_rng();
        let mut nonces = BTreeMap::new();
        let mut commitments = BTreeMap::new();
        let mut signers = Vec::new();
        for share in shares {
            let identifier = share.identifier();
            if nonces.contains_key(&identifier) {
                continue;
            }
            let (nonce, commitment) =
                frost::round1::commit(share.key_package.signing_share(), &mut rng);
            nonces.insert(identifier, nonce);
            commitments.insert(identifier, commitment);
            signers.push(share);
        }

        if commitments.len() < usize::from(threshold) {
            return Err(CryptoError::InsufficientShares {
                have: commitments.len(),
                need: threshold,
            });
        }

        // Round 2: signature shares over the shared signing package.
        let signing_package = frost::SigningPackage::new(commitments, message);
        let mut signature_shares = BTreeMap::new();
        for share in signers {
            let identifier = share.identifier();
            let Some(nonce) = nonces.get(&identifier) else {
                continue;
            };
            let signature_share = frost::round2::sign(&signing_package, nonce, &share.key_package)
                .map_err(|e| CryptoError::Primitive(e.to_string()))?;
            signature_shares.insert(identifier, signature_share);
        }

        let signature = frost::aggregate(&signing_package, &signature_shares, group.package())
            .map_err(|e| CryptoError::Primitive(e.to_string()))?;

        Ok(AggregateSignature(signature.serialize().to_vec()))
    }

    fn verify(
        &self,
        message: &[u8],
        signature: &AggregateSignature,
        key: &GroupVerifyingKey,
    ) -> bool {
        let Ok(bytes) = <[u8; 64]>::try_from(signature.as_bytes()) else {
            return false;
        };
        let Ok(signature) = frost::Signature::deserialize(bytes) else {
            return false;
        };
        key.inner().verify(message, &signature).is_ok()
    }
}
