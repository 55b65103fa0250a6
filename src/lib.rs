//! Quorum Signer - threshold signing over a shared message ledger
//!
//! Participants each hold one share of a group key. A message submitted to
//! the ledger is signed once `t` of `n` participants have contributed, then
//! aggregated into a single verifiable signature and published.
//!
//! Key principles:
//! - The ledger is the only coordination point between participants
//! - Append-only history; status is a replay of the log
//! - Secret shares are only held in zeroizing buffers while read
//! - Every step is safe to retry

pub mod aggregator;
pub mod config;
pub mod crypto;
pub mod daemon;
pub mod fleet;
pub mod layout;
pub mod ledger;
pub mod publish;
pub mod shares;
pub mod signatures;
pub mod window;
