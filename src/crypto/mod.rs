//! Threshold signature primitive.
//!
//! ## Scheme
//!
//! ```text
//! generate_keys(n, t) ─► n KeyShares + GroupKey
//!                              │
//!  any t contributing shares ──┴─► sign(msg) ─► AggregateSignature
//!                                                     │
//!                          GroupVerifyingKey ─► verify(msg, sig)
//! ```
//!
//! The only implementation is FROST over Ed25519 ([`FrostScheme`]), which
//! requires `2 <= t <= n`.

pub mod frost;
pub mod traits;
pub mod types;

pub use frost::{FrostScheme, MIN_THRESHOLD};
pub use traits::{CryptoError, CryptoResult, ThresholdScheme};
pub use types::{AggregateSignature, GeneratedKeys, GroupKey, GroupVerifyingKey, KeyShare};
