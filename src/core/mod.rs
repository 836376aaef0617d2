//! Core ledger components

pub mod block;
pub mod blockchain;
pub mod codec;
pub mod transaction;
pub mod utxo;

pub use block::{Block, Payload, BLOCK_FORMAT_VERSION};
pub use blockchain::{Blockchain, ChainInfo, ChainIterator, ChainReport};
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput};
pub use utxo::{UtxoEntry, UtxoResolver};
