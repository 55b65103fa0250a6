//! Threshold signature scheme abstraction.
//!
//! The coordination layer treats the cryptography as an opaque primitive.
//! Tests can wrap [`super::FrostScheme`] to inject verification failures.

use super::types::{AggregateSignature, GeneratedKeys, GroupKey, GroupVerifyingKey, KeyShare};

/// Result type for threshold primitive operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Threshold primitive errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid threshold {t} for {n} participants: {reason}")]
    InvalidThreshold { n: u16, t: u16, reason: String },

    #[error("Insufficient shares: got {have}, need {need}")]
    InsufficientShares { have: usize, need: u16 },

    #[error("Share for participant {participant} was generated for threshold {share_threshold}, not {requested}")]
    ThresholdMismatch {
        participant: String,
        share_threshold: u16,
        requested: u16,
    },

    #[error("Threshold primitive failed: {0}")]
    Primitive(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// (n, t) threshold signing primitive.
pub trait ThresholdScheme: Send + Sync {
    /// Deal `n` shares of a fresh group key, any `t` of which can sign.
    fn generate_keys(&self, n: u16, t: u16) -> CryptoResult<GeneratedKeys>;

    /// Produce an aggregate signature from exactly `shares`.
    ///
    /// Fails with [`CryptoError::InsufficientShares`] if fewer than
    /// `threshold` distinct shares are supplied.
    fn sign(
        &self,
        message: &[u8],
        shares: &[KeyShare],
        threshold: u16,
        group: &GroupKey,
    ) -> CryptoResult<AggregateSignature>;

    /// Check an aggregate signature against the group verifying key.
    fn verify(
        &self,
        message: &[u8],
        signature: &AggregateSignature,
        key: &GroupVerifyingKey,
    ) -> bool;
}
