use crate::consensus::validation::BlockValidator;
use crate::core::utxo::UtxoResolver;
use crate::core::{Block, Payload, Transaction};
use crate::crypto::hash::Hash256;
use crate::mining::{CancelToken, ProofOfWork};
use crate::storage::Database;
use crate::{LedgerError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub struct Blockchain {
    db: Arc<Database>,
    pow: ProofOfWork,
    validator: BlockValidator,
    // Serialises block appends; a chain has exactly one writer.
    writer: Mutex<()>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub tip: Hash256,
    pub height: u64,
    pub target_bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub tip: Hash256,
    pub genesis: Hash256,
    pub blocks: u64,
    pub transactions: u64,
}

/// Walks blocks from a fixed starting hash back to genesis.
///
/// The starting hash is captured when the iterator is created, so blocks
/// appended afterwards are not visited.
#[derive(Debug)]
pub struct ChainIterator<'a> {
    db: &'a Database,
    current: Option<Hash256>,
}

impl Blockchain {
    /// Opens an existing chain. A database without a tip is an error; use
    /// [`Blockchain::create`] to start a new chain.
    pub fn open(db: Arc<Database>, pow: ProofOfWork) -> Result<Self> {
        Self::open_with(db, pow, BlockValidator::new())
    }

    pub fn open_with(db: Arc<Database>, pow: ProofOfWork, validator: BlockValidator) -> Result<Self> {
        if !db.has_chain()? {
            return Err(LedgerError::NotFound(format!(
                "No blockchain found at {}; create one first",
                db.path().display()
            )));
        }

        Ok(Self::with_parts(db, pow, validator))
    }

    /// Mines a genesis block holding `coinbase` and persists it as the tip.
    pub fn create(
        db: Arc<Database>,
        pow: ProofOfWork,
        coinbase: Transaction,
        cancel: &CancelToken,
    ) -> Result<Self> {
        Self::create_with(db, pow, BlockValidator::new(), coinbase, cancel)
    }

    pub fn create_with(
        db: Arc<Database>,
        pow: ProofOfWork,
        validator: BlockValidator,
        coinbase: Transaction,
        cancel: &CancelToken,
    ) -> Result<Self> {
        if db.has_chain()? {
            return Err(LedgerError::AlreadyExists(format!(
                "Blockchain already exists at {}",
                db.path().display()
            )));
        }

        if !coinbase.is_coinbase() {
            return Err(LedgerError::Consensus(
                "Genesis block must contain a coinbase transaction".to_string(),
            ));
        }
        validator.validate_coinbase(&coinbase)?;

        let chain = Self::with_parts(db, pow, validator);
        {
            let _writer = chain.lock_writer()?;
            let genesis = Block::genesis(coinbase, &chain.pow, cancel)?;
            if !chain.pow.validate(&genesis) {
                return Err(LedgerError::Consensus("Mined genesis block failed validation".to_string()));
            }

            chain.db.insert_genesis(&genesis)?;
            log::info!("✅ Created blockchain with genesis block {}", genesis.hash);
        }

        Ok(chain)
    }

    fn with_parts(db: Arc<Database>, pow: ProofOfWork, validator: BlockValidator) -> Self {
        Self {
            db,
            pow,
            validator,
            writer: Mutex::new(()),
        }
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| LedgerError::Storage("Chain writer lock poisoned".to_string()))
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn tip(&self) -> Result<Hash256> {
        self.db
            .get_tip()?
            .ok_or_else(|| LedgerError::NotFound("Blockchain has no tip".to_string()))
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        self.db.get_block(hash)
    }

    /// Validates `transactions` against the current UTXO set, mines a block
    /// on top of the tip and persists it.
    pub fn mine_block(&self, transactions: Vec<Transaction>, cancel: &CancelToken) -> Result<Block> {
        let _writer = self.lock_writer()?;
        let tip = self.tip()?;

        self.validator
            .validate_transactions(&transactions, &UtxoResolver::new(self))?;

        self.append(Payload::Transactions(transactions), tip, cancel)
    }

    /// Appends a block carrying opaque bytes instead of transactions.
    pub fn mine_data_block(&self, data: Vec<u8>, cancel: &CancelToken) -> Result<Block> {
        let _writer = self.lock_writer()?;
        let tip = self.tip()?;
        self.append(Payload::Data(data), tip, cancel)
    }

    fn append(&self, payload: Payload, tip: Hash256, cancel: &CancelToken) -> Result<Block> {
        let block = Block::new(payload, Some(tip), &self.pow, cancel)?;

        if !self.pow.validate(&block) {
            return Err(LedgerError::Consensus(format!(
                "Mined block {} failed proof-of-work validation",
                block.hash
            )));
        }

        self.db.append_block(&tip, &block)?;
        log::info!(
            "✅ Block {} added to blockchain ({} transactions)",
            block.hash,
            block.transactions().len()
        );
        Ok(block)
    }

    pub fn iter(&self) -> Result<ChainIterator<'_>> {
        Ok(ChainIterator {
            db: self.db.as_ref(),
            current: Some(self.tip()?),
        })
    }

    pub fn get_chain_info(&self) -> Result<ChainInfo> {
        let tip = self.tip()?;
        let mut height = 0u64;
        for block in self.iter()? {
            block?;
            height += 1;
        }

        Ok(ChainInfo {
            tip,
            height,
            target_bits: self.pow.target_bits(),
        })
    }

    /// Re-validates every block from tip to genesis.
    pub fn verify(&self) -> Result<ChainReport> {
        let tip = self.tip()?;
        let mut blocks = 0u64;
        let mut transactions = 0u64;
        let mut genesis = tip;
        let mut seen_txids = HashSet::new();

        for block in self.iter()? {
            let block = block?;

            if !self.pow.validate(&block) {
                log::warn!("Block {} fails proof-of-work validation", block.hash);
                return Err(LedgerError::Consensus(format!(
                    "Block {} fails proof-of-work validation",
                    block.hash
                )));
            }

            if let Payload::Transactions(txs) = &block.payload {
                self.validator.validate_block_structure(txs)?;
                for tx in txs {
                    if tx.is_coinbase() {
                        self.validator.validate_coinbase(tx)?;
                    }
                    if !seen_txids.insert(tx.id) {
                        return Err(LedgerError::Consensus(format!(
                            "Transaction {} appears in more than one block",
                            tx.id
                        )));
                    }
                }
                transactions += txs.len() as u64;
            }

            blocks += 1;
            genesis = block.hash;
        }

        log::debug!("Verified {} blocks from {} to genesis {}", blocks, tip, genesis);
        Ok(ChainReport {
            tip,
            genesis,
            blocks,
            transactions,
        })
    }
}

impl<'a> Iterator for ChainIterator<'a> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;

        match self.db.get_block(&hash) {
            Ok(Some(block)) => {
                if block.hash != hash {
                    return Some(Err(LedgerError::Storage(format!(
                        "Block stored under {} reports hash {}",
                        hash, block.hash
                    ))));
                }
                log::trace!("Visiting block {}", hash);
                self.current = block.prev_hash;
                Some(Ok(block))
            }
            Ok(None) => Some(Err(LedgerError::NotFound(format!(
                "Block {} referenced by the chain is missing",
                hash
            )))),
            Err(e) => Some(Err(e)),
        }
    }
}
