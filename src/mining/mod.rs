//! Proof-of-work mining

pub mod pow;

pub use pow::{CancelToken, ProofOfWork, DEFAULT_MAX_NONCE, DEFAULT_TARGET_BITS};
