//! Hashcash-style proof of work over block headers.

use crate::core::Block;
use crate::crypto::hash::Hash256;
use crate::{LedgerError, Result};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Leading zero bits required of a block hash.
pub const DEFAULT_TARGET_BITS: u32 = 24;

/// Nonce search bound; the largest signed 64-bit value.
pub const DEFAULT_MAX_NONCE: u64 = i64::MAX as u64;

const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Shared flag that aborts a running nonce search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfWork {
    target_bits: u32,
    target: Hash256,
    max_nonce: u64,
}

impl ProofOfWork {
    pub fn new(target_bits: u32) -> Result<Self> {
        Self::with_max_nonce(target_bits, DEFAULT_MAX_NONCE)
    }

    pub fn with_max_nonce(target_bits: u32, max_nonce: u64) -> Result<Self> {
        if target_bits == 0 || target_bits >= 256 {
            return Err(LedgerError::InvalidInput(format!(
                "Target bits must be between 1 and 255, got {}",
                target_bits
            )));
        }

        Ok(Self {
            target_bits,
            target: Self::target_for_bits(target_bits),
            max_nonce,
        })
    }

    /// `2^(256 - target_bits)` as a big-endian 256-bit value.
    pub fn target_for_bits(target_bits: u32) -> Hash256 {
        let shift = (256 - target_bits) as usize;
        let mut target = [0u8; 32];
        target[31 - shift / 8] = 1 << (shift % 8);
        Hash256::new(target)
    }

    pub fn target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn target(&self) -> &Hash256 {
        &self.target
    }

    pub fn max_nonce(&self) -> u64 {
        self.max_nonce
    }

    /// Header layout: prev hash (empty for genesis), payload bytes, then
    /// timestamp, target bits and nonce as 8-byte big-endian integers.
    pub fn prepare_header_bytes(&self, block: &Block, nonce: u64) -> Vec<u8> {
        let mut data = self.header_prefix(block);
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }

    fn header_prefix(&self, block: &Block) -> Vec<u8> {
        let payload = block.header_payload();
        let mut data = Vec::with_capacity(Hash256::LEN + payload.len() + 24);
        if let Some(prev_hash) = &block.prev_hash {
            data.extend_from_slice(prev_hash.as_bytes());
        }
        data.extend_from_slice(&payload);
        data.extend_from_slice(&block.timestamp.to_be_bytes());
        data.extend_from_slice(&(self.target_bits as i64).to_be_bytes());
        data
    }

    /// Searches nonces from zero upward for a header hash below the target.
    pub fn run(&self, block: &Block, cancel: &CancelToken) -> Result<(u64, Hash256)> {
        let mut prefix = Sha256::new();
        prefix.update(self.header_prefix(block));

        log::debug!(
            "Mining block with {} leading zero bits on top of {}",
            self.target_bits,
            block.prev_hash.map(|h| h.to_hex()).unwrap_or_else(|| "genesis".to_string())
        );

        let mut nonce = 0u64;
        while nonce < self.max_nonce {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                log::warn!("Mining cancelled after {} attempts", nonce);
                return Err(LedgerError::Cancelled);
            }

            let mut hasher = prefix.clone();
            hasher.update(nonce.to_be_bytes());
            let hash = Hash256::new(hasher.finalize().into());

            if hash < self.target {
                log::debug!("Found nonce {} with hash {}", nonce, hash);
                return Ok((nonce, hash));
            }

            nonce += 1;
        }

        Err(LedgerError::Consensus(format!(
            "Difficulty unattainable: no hash below target within {} nonces",
            self.max_nonce
        )))
    }

    /// Recomputes the header hash from the stored nonce; the block is valid
    /// only if it matches the stored hash and lies below the target.
    pub fn validate(&self, block: &Block) -> bool {
        let hash = Hash256::hash(&self.prepare_header_bytes(block, block.nonce));
        hash == block.hash && hash < self.target
    }
}
