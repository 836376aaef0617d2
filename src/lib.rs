//! Hashledger - a single-writer proof-of-work ledger
//!
//! This library implements:
//! - SHA-256 hash-chained blocks sealed by proof of work
//! - Atomic block persistence in sled with a tip pointer
//! - UTXO balances derived by scanning the chain
//! - A command line interface for creating, extending and auditing a chain

pub mod core;
pub mod crypto;
pub mod mining;
pub mod storage;
pub mod cli;
pub mod consensus;
pub mod error;
pub mod config;

pub use error::{LedgerError, Result};
