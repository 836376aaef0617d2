//! Command line interface for Hashledger

pub mod commands;
pub mod mining_cli;
pub mod wallet_cli;

pub use commands::run_cli;
